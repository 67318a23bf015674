//! OOXML content layer for the docx session engine.
//!
//! Treats a document as a zipped container of XML parts. The main part
//! (`word/document.xml`) is materialised into an element tree on which typed
//! patch operations apply; every content element carries a stable identifier
//! in a reserved namespace so the diff engine can track elements across
//! versions instead of guessing by position.

mod diff;
mod document;
mod ops;
mod package;
mod path;
mod xml;

pub use diff::{diff, ChangeKind, ChangeRecord, DocumentDiff, UncoveredChange};
pub use document::{Document, ID_ATTR, ID_NAMESPACE};
pub use ops::{OpOutcome, PatchOp};
pub use path::{PathSegment, SegmentKind, Selector, TypedPath};
pub use xml::{XmlElement, XmlNode};
