use std::collections::{BTreeMap, BTreeSet, HashMap};

use docx_session_core::EngineError;
use serde::Serialize;
use serde_json::{json, Value};

use crate::document::{Document, ID_ATTR};
use crate::xml::{XmlElement, XmlNode};

/// Kind of a body-level change, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Removed,
    Added,
    Modified,
    Moved,
}

/// One element-level change between two document versions.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub element_id: String,
    /// "paragraph", "table", or the raw element name for anything else.
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_index: Option<usize>,
    /// For added elements: where the element sits in the new body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_path: Option<String>,
}

/// A change outside the body, reported by kind without structural merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UncoveredChange {
    Header,
    Footer,
    Styles,
    Numbering,
    Settings,
    Media,
    Other,
}

/// Structured comparison of two document versions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentDiff {
    pub changes: Vec<ChangeRecord>,
    pub uncovered: Vec<UncoveredChange>,
}

impl DocumentDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.uncovered.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    /// Compact summary, recorded in `external_sync` WAL entries.
    pub fn summary(&self) -> Value {
        json!({
            "removed": self.count(ChangeKind::Removed),
            "added": self.count(ChangeKind::Added),
            "modified": self.count(ChangeKind::Modified),
            "moved": self.count(ChangeKind::Moved),
            "uncovered": self.uncovered,
        })
    }
}

struct Snapshot {
    id: String,
    element_type: String,
    index: usize,
    projection: Value,
}

/// Compare two documents, identifying body elements by their stable IDs.
pub fn diff(a: &Document, b: &Document) -> Result<DocumentDiff, EngineError> {
    let a_snaps = snapshot_body(a)?;
    let b_snaps = snapshot_body(b)?;

    let a_by_id: HashMap<&str, &Snapshot> =
        a_snaps.iter().map(|s| (s.id.as_str(), s)).collect();
    let b_by_id: HashMap<&str, &Snapshot> =
        b_snaps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut changes = Vec::new();

    for snap in &a_snaps {
        if !b_by_id.contains_key(snap.id.as_str()) {
            changes.push(ChangeRecord {
                kind: ChangeKind::Removed,
                element_id: snap.id.clone(),
                element_type: snap.element_type.clone(),
                old_index: Some(snap.index),
                new_index: None,
                insert_path: None,
            });
        }
    }

    for snap in &b_snaps {
        match a_by_id.get(snap.id.as_str()) {
            None => changes.push(ChangeRecord {
                kind: ChangeKind::Added,
                element_id: snap.id.clone(),
                element_type: snap.element_type.clone(),
                old_index: None,
                new_index: Some(snap.index),
                insert_path: Some(format!("/body/children/{}", snap.index)),
            }),
            Some(old) => {
                // Content change supersedes a position change.
                let kind = if old.projection != snap.projection {
                    Some(ChangeKind::Modified)
                } else if old.index != snap.index {
                    Some(ChangeKind::Moved)
                } else {
                    None
                };
                if let Some(kind) = kind {
                    changes.push(ChangeRecord {
                        kind,
                        element_id: snap.id.clone(),
                        element_type: snap.element_type.clone(),
                        old_index: Some(old.index),
                        new_index: Some(snap.index),
                        insert_path: None,
                    });
                }
            }
        }
    }

    changes.sort_by_key(|c| (c.kind, c.new_index.or(c.old_index).unwrap_or(0)));

    Ok(DocumentDiff {
        changes,
        uncovered: uncovered_changes(a, b),
    })
}

fn snapshot_body(doc: &Document) -> Result<Vec<Snapshot>, EngineError> {
    Ok(doc
        .content_children()?
        .into_iter()
        .enumerate()
        .map(|(index, el)| Snapshot {
            id: el.attr(ID_ATTR).unwrap_or_default().to_string(),
            element_type: element_type_of(el),
            index,
            projection: projection(el),
        })
        .collect())
}

fn element_type_of(el: &XmlElement) -> String {
    match el.name.as_str() {
        "w:p" => "paragraph".to_string(),
        "w:tbl" => "table".to_string(),
        other => other.to_string(),
    }
}

/// Structural JSON projection of an element, identifier attributes excluded:
/// identity is tracked separately, content comparison must not see it.
fn projection(el: &XmlElement) -> Value {
    let attrs: BTreeMap<&str, &str> = el
        .attrs
        .iter()
        .filter(|(k, _)| k != ID_ATTR && k != "xmlns:eid")
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let children: Vec<Value> = el
        .children
        .iter()
        .map(|node| match node {
            XmlNode::Element(child) => projection(child),
            XmlNode::Text(text) => json!({ "text": text }),
        })
        .collect();
    json!({
        "element": el.name,
        "attrs": attrs,
        "children": children,
    })
}

fn uncovered_changes(a: &Document, b: &Document) -> Vec<UncoveredChange> {
    let a_parts = a.auxiliary_parts();
    let b_parts = b.auxiliary_parts();

    let names: BTreeSet<&String> = a_parts.keys().chain(b_parts.keys()).collect();
    let mut kinds = BTreeSet::new();
    for name in names {
        if a_parts.get(name) != b_parts.get(name) {
            kinds.insert(classify_part(name));
        }
    }
    kinds.into_iter().collect()
}

fn classify_part(name: &str) -> UncoveredChange {
    if name.starts_with("word/header") {
        UncoveredChange::Header
    } else if name.starts_with("word/footer") {
        UncoveredChange::Footer
    } else if name == "word/styles.xml" {
        UncoveredChange::Styles
    } else if name == "word/numbering.xml" {
        UncoveredChange::Numbering
    } else if name == "word/settings.xml" {
        UncoveredChange::Settings
    } else if name.starts_with("word/media/") {
        UncoveredChange::Media
    } else {
        UncoveredChange::Other
    }
}
