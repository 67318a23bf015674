//! Local filesystem backends for the docx session engine.
//!
//! Implements the `docx-session-core` traits against a per-tenant directory
//! tree:
//!
//! ```text
//! {base_dir}/
//!   {tenant_id}/
//!     locks/
//!       {resource_id}.lock
//!     sessions/
//!       index.json
//!       {session_id}.docx
//!       {session_id}.wal
//!       {session_id}.ckpt.{position}.docx
//! ```

pub mod lock;
pub mod source;
pub mod storage;
pub mod watch;

pub use lock::FileLock;
pub use source::LocalSourceStore;
pub use storage::LocalStorage;
pub use watch::{ExternalChange, ExternalChangeKind, NotifyWatcher};
