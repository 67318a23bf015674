mod notify_watcher;

pub use notify_watcher::{ExternalChange, ExternalChangeKind, NotifyWatcher};
