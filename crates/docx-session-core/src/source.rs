use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// How to reach the backing file of a session.
///
/// The cloud variant is opaque to the engine: it only ever touches sources
/// through the [`SourceStore`] trait, so a hosted deployment can plug in a
/// provider-backed implementation without the core changing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    LocalFile {
        path: PathBuf,
    },
    Cloud {
        connection_id: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
    },
}

impl SourceDescriptor {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::LocalFile { path: path.into() }
    }

    /// Human-readable location, for logs and status output.
    pub fn location(&self) -> String {
        match self {
            Self::LocalFile { path } => path.display().to_string(),
            Self::Cloud {
                connection_id,
                path,
                ..
            } => format!("{connection_id}:{path}"),
        }
    }
}

/// Metadata about a source, used for cheap change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// File size in bytes.
    pub size_bytes: u64,
    /// Last modification time (Unix timestamp).
    pub modified_at: i64,
    /// ETag for HTTP-backed sources.
    pub etag: Option<String>,
    /// SHA-256 content hash, if the implementation computes one.
    pub content_hash: Option<Vec<u8>>,
}

/// Byte-oriented access to the external backing file.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Returns the store identifier (e.g., "local").
    fn store_name(&self) -> &'static str;

    /// Read the source's current bytes.
    async fn read(&self, source: &SourceDescriptor) -> Result<Vec<u8>, EngineError>;

    /// Replace the source's bytes. Must not leave a torn file on failure.
    async fn write(&self, source: &SourceDescriptor, data: &[u8]) -> Result<(), EngineError>;

    /// Current metadata, or `None` if the source does not exist.
    async fn metadata(
        &self,
        source: &SourceDescriptor,
    ) -> Result<Option<SourceMetadata>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_through_json() {
        let local = SourceDescriptor::local("/tmp/report.docx");
        let json = serde_json::to_value(&local).unwrap();
        assert_eq!(json["type"], "local_file");
        let back: SourceDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, local);

        let cloud = SourceDescriptor::Cloud {
            connection_id: "conn-1".into(),
            path: "/Shared/report.docx".into(),
            file_id: None,
        };
        let json = serde_json::to_string(&cloud).unwrap();
        assert!(!json.contains("file_id"));
        let back: SourceDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cloud);
    }

    #[test]
    fn location_is_readable() {
        assert_eq!(
            SourceDescriptor::local("/tmp/a.docx").location(),
            "/tmp/a.docx"
        );
        let cloud = SourceDescriptor::Cloud {
            connection_id: "conn-1".into(),
            path: "/a.docx".into(),
            file_id: Some("f1".into()),
        };
        assert_eq!(cloud.location(), "conn-1:/a.docx");
    }
}
