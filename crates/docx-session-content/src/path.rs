use std::fmt;

use docx_session_core::EngineError;

use crate::xml::{XmlElement, XmlNode};

/// How a segment picks among matching children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `[n]` — the n-th matching element (0-based).
    Index(usize),
    /// `[-1]` — the last matching element.
    Last,
    /// `[*]` — an insertion point at the end.
    Append,
    /// `[text~='...']` — first element whose flattened text contains the needle.
    TextContains(String),
    /// `[style='...']` — first element with the given style.
    Style(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Paragraph,
    Table,
    Row,
    Cell,
    Children,
    Column,
}

impl SegmentKind {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "paragraph" => Some(Self::Paragraph),
            "table" => Some(Self::Table),
            "row" => Some(Self::Row),
            "cell" => Some(Self::Cell),
            "children" => Some(Self::Children),
            "column" => Some(Self::Column),
            _ => None,
        }
    }

    /// The element name this kind matches; `None` for positional kinds.
    pub fn element_name(self) -> Option<&'static str> {
        match self {
            Self::Paragraph => Some("w:p"),
            Self::Table => Some("w:tbl"),
            Self::Row => Some("w:tr"),
            Self::Cell => Some("w:tc"),
            Self::Children | Self::Column => None,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Paragraph => "paragraph",
            Self::Table => "table",
            Self::Row => "row",
            Self::Cell => "cell",
            Self::Children => "children",
            Self::Column => "column",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub kind: SegmentKind,
    pub selector: Selector,
}

/// A parsed typed path rooted at the document body.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedPath {
    pub segments: Vec<PathSegment>,
}

impl TypedPath {
    /// Parse a path of the form `/body/<kind>[<selector>]/...`.
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        let rest = input
            .strip_prefix("/body")
            .ok_or_else(|| EngineError::invalid_path(format!("{input}: must start with /body")))?;

        let mut segments = Vec::new();
        let mut rest = rest;
        while !rest.is_empty() {
            rest = rest.strip_prefix('/').ok_or_else(|| {
                EngineError::invalid_path(format!("{input}: expected '/' before segment"))
            })?;

            let bracket = rest.find('[').ok_or_else(|| {
                EngineError::invalid_path(format!("{input}: segment is missing a selector"))
            })?;
            let name = &rest[..bracket];
            let kind = SegmentKind::parse(name).ok_or_else(|| {
                EngineError::invalid_path(format!("{input}: unknown segment kind '{name}'"))
            })?;

            let after_bracket = &rest[bracket + 1..];
            let (selector, consumed) = parse_selector(input, after_bracket)?;
            segments.push(PathSegment { kind, selector });
            rest = &after_bracket[consumed..];
        }

        if segments.is_empty() {
            return Err(EngineError::invalid_path(format!(
                "{input}: path addresses no element"
            )));
        }
        Ok(Self { segments })
    }
}

/// Parse one selector body starting right after `[`. Returns the selector and
/// how many bytes were consumed, including the closing bracket.
fn parse_selector(path: &str, input: &str) -> Result<(Selector, usize), EngineError> {
    for (prefix, is_text) in [("text~='", true), ("style='", false)] {
        if let Some(quoted) = input.strip_prefix(prefix) {
            // The needle may contain ']'; the terminator is the '] sequence.
            let close = quoted.find("']").ok_or_else(|| {
                EngineError::invalid_path(format!("{path}: unterminated quoted selector"))
            })?;
            let value = quoted[..close].to_string();
            let consumed = prefix.len() + close + 2;
            let selector = if is_text {
                Selector::TextContains(value)
            } else {
                Selector::Style(value)
            };
            return Ok((selector, consumed));
        }
    }

    let close = input
        .find(']')
        .ok_or_else(|| EngineError::invalid_path(format!("{path}: unterminated selector")))?;
    let inner = &input[..close];
    let selector = match inner {
        "*" => Selector::Append,
        "-1" => Selector::Last,
        _ => {
            let index = inner.parse::<usize>().map_err(|_| {
                EngineError::invalid_path(format!("{path}: invalid selector '[{inner}]'"))
            })?;
            Selector::Index(index)
        }
    };
    Ok((selector, close + 1))
}

/// Child-index steps from the body down to an element.
pub(crate) type Address = Vec<usize>;

/// Node indices of `parent`'s children a segment kind matches.
fn candidates(parent: &XmlElement, kind: SegmentKind) -> Vec<usize> {
    parent
        .children
        .iter()
        .enumerate()
        .filter_map(|(i, node)| {
            let el = node.as_element()?;
            let matches = match kind.element_name() {
                Some(name) => el.name == name,
                None => el.name != "w:sectPr",
            };
            matches.then_some(i)
        })
        .collect()
}

/// Node index of the end-of-content insertion point: before any trailing
/// section properties.
fn insertion_end(parent: &XmlElement) -> usize {
    parent
        .children
        .iter()
        .position(|node| matches!(node, XmlNode::Element(el) if el.name == "w:sectPr"))
        .unwrap_or(parent.children.len())
}

pub(crate) fn style_of(el: &XmlElement) -> Option<&str> {
    let style = match el.name.as_str() {
        "w:p" => el.find_child("w:pPr")?.find_child("w:pStyle"),
        "w:tbl" => el.find_child("w:tblPr")?.find_child("w:tblStyle"),
        _ => None,
    }?;
    style.attr("w:val")
}

fn pick_existing(
    parent: &XmlElement,
    segment: &PathSegment,
    raw: &str,
) -> Result<usize, EngineError> {
    let cands = candidates(parent, segment.kind);
    let kind = segment.kind;
    match &segment.selector {
        Selector::Index(n) => cands.get(*n).copied().ok_or_else(|| {
            EngineError::element_not_found(format!("{raw}: no {kind} at index {n}"))
        }),
        Selector::Last => cands
            .last()
            .copied()
            .ok_or_else(|| EngineError::element_not_found(format!("{raw}: no {kind} elements"))),
        Selector::Append => Err(EngineError::invalid_path(format!(
            "{raw}: [*] addresses an insertion point, not an element"
        ))),
        Selector::TextContains(needle) => cands
            .iter()
            .copied()
            .find(|i| {
                parent.children[*i]
                    .as_element()
                    .is_some_and(|el| el.text_content().contains(needle))
            })
            .ok_or_else(|| {
                EngineError::element_not_found(format!(
                    "{raw}: no {kind} with text containing '{needle}'"
                ))
            }),
        Selector::Style(style) => cands
            .iter()
            .copied()
            .find(|i| {
                parent.children[*i]
                    .as_element()
                    .is_some_and(|el| style_of(el) == Some(style.as_str()))
            })
            .ok_or_else(|| {
                EngineError::element_not_found(format!("{raw}: no {kind} with style '{style}'"))
            }),
    }
}

/// Resolve a path to the address of an existing element.
pub(crate) fn resolve_existing(
    body: &XmlElement,
    path: &TypedPath,
    raw: &str,
) -> Result<Address, EngineError> {
    let mut address = Address::new();
    let mut current = body;
    for segment in &path.segments {
        if segment.kind == SegmentKind::Column {
            return Err(EngineError::invalid_path(format!(
                "{raw}: column[..] is only valid as the target of remove_column"
            )));
        }
        let idx = pick_existing(current, segment, raw)?;
        address.push(idx);
        current = current.children[idx]
            .as_element()
            .expect("candidate indices always point at elements");
    }
    Ok(address)
}

/// Resolve a path to `(parent address, child node index)` for insertion.
pub(crate) fn resolve_insertion(
    body: &XmlElement,
    path: &TypedPath,
    raw: &str,
) -> Result<(Address, usize), EngineError> {
    let (last, prefix) = path
        .segments
        .split_last()
        .expect("TypedPath::parse rejects empty paths");

    let mut address = Address::new();
    let mut current = body;
    for segment in prefix {
        if segment.kind == SegmentKind::Column {
            return Err(EngineError::invalid_path(format!(
                "{raw}: column[..] is only valid as the target of remove_column"
            )));
        }
        let idx = pick_existing(current, segment, raw)?;
        address.push(idx);
        current = current.children[idx]
            .as_element()
            .expect("candidate indices always point at elements");
    }

    if last.kind == SegmentKind::Column {
        return Err(EngineError::invalid_path(format!(
            "{raw}: cannot insert at a column"
        )));
    }

    let cands = candidates(current, last.kind);
    let end = insertion_end(current);
    let after_last = cands.last().map(|i| i + 1).unwrap_or(end);
    let idx = match &last.selector {
        Selector::Append => end,
        Selector::Last => after_last,
        Selector::Index(n) => {
            if *n < cands.len() {
                cands[*n]
            } else if *n == cands.len() {
                after_last
            } else {
                return Err(EngineError::element_not_found(format!(
                    "{raw}: insertion index {n} is beyond the {} existing {} elements",
                    cands.len(),
                    last.kind
                )));
            }
        }
        Selector::TextContains(_) | Selector::Style(_) => pick_existing(current, last, raw)?,
    };
    Ok((address, idx))
}

/// The element at an address, if the address is still valid.
pub(crate) fn element_at<'a>(body: &'a XmlElement, address: &Address) -> Option<&'a XmlElement> {
    let mut current = body;
    for idx in address {
        current = current.children.get(*idx)?.as_element()?;
    }
    Some(current)
}

pub(crate) fn element_at_mut<'a>(
    body: &'a mut XmlElement,
    address: &Address,
) -> Option<&'a mut XmlElement> {
    let mut current = body;
    for idx in address {
        current = current.children.get_mut(*idx)?.as_element_mut()?;
    }
    Some(current)
}
