use thiserror::Error;

/// Kinds of content-layer failures (codec and patch application).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorKind {
    InvalidPath,
    ElementNotFound,
    StructuralRule,
    IdCollision,
    MalformedDocument,
}

/// Kinds of storage-layer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Io,
    Corruption,
    ConcurrentModification,
    Serialization,
}

/// Kinds of lock-layer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockErrorKind {
    AcquireTimeout,
    NotOwner,
}

/// Errors surfaced by the engine.
///
/// The engine propagates these to the caller verbatim; nothing is retried
/// internally except lock acquisition, which backs off until its deadline.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("content error ({kind:?}): {message}")]
    Content {
        kind: ContentErrorKind,
        message: String,
    },

    #[error("storage error ({kind:?}): {message}")]
    Storage {
        kind: StorageErrorKind,
        message: String,
    },

    #[error("lock error ({kind:?}): {message}")]
    Lock {
        kind: LockErrorKind,
        message: String,
    },

    #[error("session has pending external changes; sync or acknowledge before editing")]
    ExternalChangeBlocked,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl EngineError {
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::Content {
            kind: ContentErrorKind::InvalidPath,
            message: message.into(),
        }
    }

    pub fn element_not_found(message: impl Into<String>) -> Self {
        Self::Content {
            kind: ContentErrorKind::ElementNotFound,
            message: message.into(),
        }
    }

    pub fn structural_rule(message: impl Into<String>) -> Self {
        Self::Content {
            kind: ContentErrorKind::StructuralRule,
            message: message.into(),
        }
    }

    pub fn id_collision(message: impl Into<String>) -> Self {
        Self::Content {
            kind: ContentErrorKind::IdCollision,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Content {
            kind: ContentErrorKind::MalformedDocument,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Storage {
            kind: StorageErrorKind::Io,
            message: message.into(),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Storage {
            kind: StorageErrorKind::Corruption,
            message: message.into(),
        }
    }

    pub fn concurrent_modification(message: impl Into<String>) -> Self {
        Self::Storage {
            kind: StorageErrorKind::ConcurrentModification,
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Storage {
            kind: StorageErrorKind::Serialization,
            message: message.into(),
        }
    }

    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::Lock {
            kind: LockErrorKind::AcquireTimeout,
            message: message.into(),
        }
    }

    pub fn lock_not_owner(message: impl Into<String>) -> Self {
        Self::Lock {
            kind: LockErrorKind::NotOwner,
            message: message.into(),
        }
    }

    /// Whether this error is a content-layer failure of the given kind.
    pub fn is_content(&self, wanted: ContentErrorKind) -> bool {
        matches!(self, Self::Content { kind, .. } if *kind == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_and_message() {
        let err = EngineError::invalid_path("no such segment 'bogus'");
        assert!(err.to_string().contains("InvalidPath"));
        assert!(err.to_string().contains("bogus"));

        let err = EngineError::lock_timeout("session:abc held by other");
        assert!(matches!(
            err,
            EngineError::Lock {
                kind: LockErrorKind::AcquireTimeout,
                ..
            }
        ));
    }

    #[test]
    fn is_content_matches_kind() {
        let err = EngineError::element_not_found("paragraph[7]");
        assert!(err.is_content(ContentErrorKind::ElementNotFound));
        assert!(!err.is_content(ContentErrorKind::InvalidPath));
        assert!(!EngineError::ExternalChangeBlocked.is_content(ContentErrorKind::InvalidPath));
    }
}
