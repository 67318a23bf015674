//! Session lifecycle and edit-history engine for docx documents.
//!
//! `SessionManager` orchestrates the content codec, the append-only WAL,
//! full-document checkpoints, the per-tenant session index, cross-process
//! locks and the structural diff engine into the observable operations:
//! open, apply_patch, undo/redo/jump, check/sync of external changes, close.
//!
//! The engine is a plain library taking its collaborators as explicit
//! constructor parameters; transports own registration, wire framing and
//! authentication.

mod config;
mod lease;
mod patch;
mod session;

pub use config::EngineConfig;
pub use patch::{OpReport, PatchReport};
pub use session::{ExternalState, SessionManager, SessionStatus, SyncReport};
