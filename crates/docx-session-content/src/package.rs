use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use docx_session_core::EngineError;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Container parts by name, sorted so iteration order is stable.
pub type Parts = BTreeMap<String, Vec<u8>>;

/// The main word-processing part.
pub const MAIN_PART: &str = "word/document.xml";

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const RELS_PART: &str = "_rels/.rels";

const CONTENT_TYPES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
    r#"</Types>"#
);

const RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
    r#"</Relationships>"#
);

/// Read a zipped container into a parts map.
pub fn read_container(bytes: &[u8]) -> Result<Parts, EngineError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| EngineError::malformed(format!("not a zip container: {e}")))?;

    let mut parts = Parts::new();
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| EngineError::malformed(format!("unreadable container entry: {e}")))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| EngineError::malformed(format!("failed to inflate {name}: {e}")))?;
        parts.insert(name, data);
    }

    if !parts.contains_key(MAIN_PART) {
        return Err(EngineError::malformed(format!("container has no {MAIN_PART}")));
    }
    Ok(parts)
}

/// Write a parts map back to container bytes.
///
/// Parts are written in sorted name order with a fixed compression method so
/// identical parts always produce identical bytes.
pub fn write_container(parts: &Parts) -> Result<Vec<u8>, EngineError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, data) in parts {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| EngineError::serialization(format!("failed to start entry {name}: {e}")))?;
        writer
            .write_all(data)
            .map_err(|e| EngineError::serialization(format!("failed to write entry {name}: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| EngineError::serialization(format!("failed to finish container: {e}")))?;
    Ok(cursor.into_inner())
}

/// Content-addressed digest over the canonicalised container.
///
/// Hashes part names and bytes in sorted order, so the digest is independent
/// of zip metadata (timestamps, ordering, compression ratios).
pub fn digest(parts: &Parts) -> String {
    let mut hasher = Sha256::new();
    for (name, data) in parts {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
    }
    hex::encode(hasher.finalize())
}

/// The non-body parts of the empty document template.
pub fn template_parts() -> Parts {
    let mut parts = Parts::new();
    parts.insert(
        CONTENT_TYPES_PART.to_string(),
        CONTENT_TYPES_XML.as_bytes().to_vec(),
    );
    parts.insert(RELS_PART.to_string(), RELS_XML.as_bytes().to_vec());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_parts() -> Parts {
        let mut parts = template_parts();
        parts.insert(MAIN_PART.to_string(), b"<w:document/>".to_vec());
        parts
    }

    #[test]
    fn container_round_trip() {
        let parts = sample_parts();
        let bytes = write_container(&parts).unwrap();
        let back = read_container(&bytes).unwrap();
        assert_eq!(back, parts);
    }

    #[test]
    fn rejects_container_without_main_part() {
        let parts = template_parts();
        let bytes = write_container(&parts).unwrap();
        assert!(read_container(&bytes).is_err());
    }

    #[test]
    fn rejects_non_zip_bytes() {
        assert!(read_container(b"definitely not a zip").is_err());
    }

    #[test]
    fn digest_ignores_container_encoding() {
        let parts = sample_parts();
        let d1 = digest(&parts);
        // Round-tripping through zip bytes must not change the digest.
        let back = read_container(&write_container(&parts).unwrap()).unwrap();
        assert_eq!(digest(&back), d1);
    }

    #[test]
    fn digest_changes_with_content() {
        let parts = sample_parts();
        let mut altered = parts.clone();
        altered.insert(MAIN_PART.to_string(), b"<w:document>x</w:document>".to_vec());
        assert_ne!(digest(&parts), digest(&altered));
    }
}
