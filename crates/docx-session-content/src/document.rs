use std::collections::HashSet;

use docx_session_core::EngineError;

use crate::package::{self, Parts, MAIN_PART};
use crate::xml::{self, XmlElement};

/// Attribute carrying an element's stable identifier.
pub const ID_ATTR: &str = "eid:id";
/// Reserved namespace the identifier attribute lives in.
pub const ID_NAMESPACE: &str = "urn:docx-session:element-id";

const ID_NAMESPACE_ATTR: &str = "xmlns:eid";
const WORDML_NAMESPACE: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Element names that count as content elements and carry identifiers.
const CONTENT_ELEMENT_NAMES: [&str; 4] = ["w:p", "w:tbl", "w:tr", "w:tc"];

/// An open word-processing document: the container parts plus the main part
/// materialised as an element tree.
#[derive(Debug, Clone)]
pub struct Document {
    /// Every part except the main one, by name.
    parts: Parts,
    /// The parsed `w:document` root.
    root: XmlElement,
}

impl Document {
    /// The built-in empty template: minimal content types, package
    /// relationships, and a body holding only section properties.
    pub fn empty() -> Self {
        let mut body = XmlElement::new("w:body");
        body.push_element(XmlElement::new("w:sectPr"));

        let mut root = XmlElement::new("w:document");
        root.set_attr("xmlns:w", WORDML_NAMESPACE);
        root.set_attr(ID_NAMESPACE_ATTR, ID_NAMESPACE);
        root.push_element(body);

        Self {
            parts: package::template_parts(),
            root,
        }
    }

    /// Parse container bytes, assigning identifiers to any content element
    /// that lacks one.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let mut parts = package::read_container(bytes)?;
        let main = parts
            .remove(MAIN_PART)
            .ok_or_else(|| EngineError::malformed(format!("container has no {MAIN_PART}")))?;
        let root = xml::parse_part(&main)?;

        let mut doc = Self { parts, root };
        doc.body()?;
        doc.assign_missing_ids();
        Ok(doc)
    }

    /// Serialise back to container bytes, deterministically.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        package::write_container(&self.canonical_parts()?)
    }

    /// Content-addressed digest of the canonicalised container.
    pub fn digest(&self) -> Result<String, EngineError> {
        Ok(package::digest(&self.canonical_parts()?))
    }

    fn canonical_parts(&self) -> Result<Parts, EngineError> {
        let mut parts = self.parts.clone();
        parts.insert(MAIN_PART.to_string(), xml::serialize_part(&self.root)?);
        Ok(parts)
    }

    /// The non-main container parts (headers, footers, styles, media, ...).
    pub fn auxiliary_parts(&self) -> &Parts {
        &self.parts
    }

    pub fn body(&self) -> Result<&XmlElement, EngineError> {
        self.root
            .find_child("w:body")
            .ok_or_else(|| EngineError::malformed("document has no w:body"))
    }

    pub fn body_mut(&mut self) -> Result<&mut XmlElement, EngineError> {
        self.root
            .find_child_mut("w:body")
            .ok_or_else(|| EngineError::malformed("document has no w:body"))
    }

    /// Top-level content elements of the body, in document order.
    /// Section properties are not content.
    pub fn content_children(&self) -> Result<Vec<&XmlElement>, EngineError> {
        Ok(self
            .body()?
            .child_elements()
            .filter(|el| el.name != "w:sectPr")
            .collect())
    }

    /// Assign a fresh identifier to every content element that has none (or
    /// duplicates one seen earlier in document order), and make sure the
    /// reserved namespace is declared. Returns how many were assigned.
    pub fn assign_missing_ids(&mut self) -> usize {
        if self.root.attr(ID_NAMESPACE_ATTR).is_none() {
            self.root.set_attr(ID_NAMESPACE_ATTR, ID_NAMESPACE);
        }

        let mut seen = HashSet::new();
        let Some(body) = self.root.find_child_mut("w:body") else {
            return 0;
        };
        assign_ids_in(body, &mut seen)
    }

    /// All identifiers currently present in the body.
    pub fn element_ids(&self) -> Result<HashSet<String>, EngineError> {
        let mut ids = HashSet::new();
        collect_ids(self.body()?, &mut ids);
        Ok(ids)
    }
}

pub(crate) fn is_content_element(name: &str) -> bool {
    CONTENT_ELEMENT_NAMES.contains(&name)
}

/// 8-byte random identifier, hex-encoded.
pub(crate) fn fresh_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..16].to_string()
}

fn assign_ids_in(el: &mut XmlElement, seen: &mut HashSet<String>) -> usize {
    let mut assigned = 0;
    if is_content_element(&el.name) {
        let needs_fresh = match el.attr(ID_ATTR) {
            Some(id) => !seen.insert(id.to_string()),
            None => true,
        };
        if needs_fresh {
            let id = fresh_id();
            seen.insert(id.clone());
            el.set_attr(ID_ATTR, id);
            assigned += 1;
        }
    }
    for child in el.child_elements_mut() {
        assigned += assign_ids_in(child, seen);
    }
    assigned
}

fn collect_ids(el: &XmlElement, ids: &mut HashSet<String>) {
    if let Some(id) = el.attr(ID_ATTR) {
        ids.insert(id.to_string());
    }
    for child in el.child_elements() {
        collect_ids(child, ids);
    }
}

/// Strip existing identifiers from a subtree and assign fresh ones.
/// Used by `copy`, which must never duplicate an identifier.
pub(crate) fn reassign_ids(el: &mut XmlElement) {
    if is_content_element(&el.name) {
        el.set_attr(ID_ATTR, fresh_id());
    }
    for child in el.child_elements_mut() {
        reassign_ids(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_round_trips() {
        let doc = Document::empty();
        let bytes = doc.to_bytes().unwrap();
        let back = Document::from_bytes(&bytes).unwrap();
        assert!(back.content_children().unwrap().is_empty());
        assert_eq!(back.digest().unwrap(), doc.digest().unwrap());
    }

    #[test]
    fn load_assigns_ids_and_declares_namespace() {
        let xml = concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
            r#"<w:body><w:p><w:r><w:t>one</w:t></w:r></w:p><w:p/><w:sectPr/></w:body>"#,
            r#"</w:document>"#
        );
        let mut parts = package::template_parts();
        parts.insert(MAIN_PART.to_string(), xml.as_bytes().to_vec());
        let bytes = package::write_container(&parts).unwrap();

        let doc = Document::from_bytes(&bytes).unwrap();
        let children = doc.content_children().unwrap();
        assert_eq!(children.len(), 2);
        let ids: Vec<_> = children.iter().map(|el| el.attr(ID_ATTR).unwrap()).collect();
        assert_ne!(ids[0], ids[1]);
        assert!(doc
            .root
            .attr(ID_NAMESPACE_ATTR)
            .is_some_and(|ns| ns == ID_NAMESPACE));
    }

    #[test]
    fn ids_are_stable_across_save_and_load() {
        let xml = concat!(
            r#"<w:document xmlns:w="ns"><w:body>"#,
            r#"<w:p eid:id="aaaa000011112222"/><w:sectPr/>"#,
            r#"</w:body></w:document>"#
        );
        let mut parts = package::template_parts();
        parts.insert(MAIN_PART.to_string(), xml.as_bytes().to_vec());
        let doc = Document::from_bytes(&package::write_container(&parts).unwrap()).unwrap();

        let saved = doc.to_bytes().unwrap();
        let back = Document::from_bytes(&saved).unwrap();
        assert_eq!(
            back.content_children().unwrap()[0].attr(ID_ATTR),
            Some("aaaa000011112222")
        );
    }

    #[test]
    fn duplicate_ids_on_load_are_reassigned() {
        let xml = concat!(
            r#"<w:document xmlns:w="ns"><w:body>"#,
            r#"<w:p eid:id="dupdupdupdupdup0"/><w:p eid:id="dupdupdupdupdup0"/><w:sectPr/>"#,
            r#"</w:body></w:document>"#
        );
        let mut parts = package::template_parts();
        parts.insert(MAIN_PART.to_string(), xml.as_bytes().to_vec());
        let doc = Document::from_bytes(&package::write_container(&parts).unwrap()).unwrap();

        let ids = doc.element_ids().unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn fresh_ids_are_hex_and_unique() {
        let a = fresh_id();
        let b = fresh_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
