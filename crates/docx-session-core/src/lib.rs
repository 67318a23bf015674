//! Core traits and types for the docx session and history engine.
//!
//! This crate defines the abstractions shared between the content layer, the
//! storage backends and the session manager:
//! - `StorageBackend`: session image, index, WAL, and checkpoint operations
//! - `LockManager`: cross-process advisory locking with TTL
//! - `SourceStore`: reading and writing the external backing file
//! - `EngineError`: the error taxonomy surfaced to callers

mod error;
mod lock;
mod source;
mod storage;

pub use error::{ContentErrorKind, EngineError, LockErrorKind, StorageErrorKind};
pub use lock::{
    LockAcquireResult, LockManager, LockReleaseOutcome, LockReleaseResult, LockRenewOutcome,
    LockRenewResult,
};
pub use source::{SourceDescriptor, SourceMetadata, SourceStore};
pub use storage::{
    CheckpointInfo, EditKind, SessionIndex, SessionIndexEntry, StorageBackend, WalEntry,
};
