use std::collections::HashSet;

use docx_session_core::{EditKind, EngineError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{fresh_id, is_content_element, reassign_ids, Document, ID_ATTR};
use crate::path::{
    element_at, element_at_mut, resolve_existing, resolve_insertion, SegmentKind, Selector,
    TypedPath,
};
use crate::xml::{XmlElement, XmlNode};

/// One typed patch operation, in its wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    Add {
        path: String,
        value: Value,
    },
    Replace {
        path: String,
        value: Value,
    },
    Remove {
        path: String,
    },
    Move {
        from: String,
        path: String,
    },
    Copy {
        from: String,
        path: String,
    },
    ReplaceText {
        path: String,
        find: String,
        replace: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_count: Option<u64>,
    },
    RemoveColumn {
        path: String,
    },
}

impl PatchOp {
    pub fn kind(&self) -> EditKind {
        match self {
            Self::Add { .. } => EditKind::Add,
            Self::Replace { .. } => EditKind::Replace,
            Self::Remove { .. } => EditKind::Remove,
            Self::Move { .. } => EditKind::Move,
            Self::Copy { .. } => EditKind::Copy,
            Self::ReplaceText { .. } => EditKind::ReplaceText,
            Self::RemoveColumn { .. } => EditKind::RemoveColumn,
        }
    }

    /// The path the operation targets (the destination, for move/copy).
    pub fn target_path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path }
            | Self::Move { path, .. }
            | Self::Copy { path, .. }
            | Self::ReplaceText { path, .. }
            | Self::RemoveColumn { path } => path,
        }
    }
}

/// Result of one applied operation.
#[derive(Debug, Clone, Serialize)]
pub struct OpOutcome {
    /// Identifier of the affected element.
    pub element_id: String,
    /// Occurrences rewritten, for `replace_text`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<u64>,
}

impl OpOutcome {
    fn of(element_id: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            replaced: None,
        }
    }
}

impl Document {
    /// Apply one typed operation to the in-memory tree.
    ///
    /// An error leaves the tree in an unspecified intermediate state; the
    /// session layer applies batches against a pre-batch snapshot and
    /// discards the tree on failure.
    pub fn apply(&mut self, op: &PatchOp) -> Result<OpOutcome, EngineError> {
        match op {
            PatchOp::Add { path, value } => self.apply_add(path, value),
            PatchOp::Replace { path, value } => self.apply_replace(path, value),
            PatchOp::Remove { path } => self.apply_remove(path),
            PatchOp::Move { from, path } => self.apply_move(from, path),
            PatchOp::Copy { from, path } => self.apply_copy(from, path),
            PatchOp::ReplaceText {
                path,
                find,
                replace,
                max_count,
            } => self.apply_replace_text(path, find, replace, *max_count),
            PatchOp::RemoveColumn { path } => self.apply_remove_column(path),
        }
    }

    fn apply_add(&mut self, raw: &str, value: &Value) -> Result<OpOutcome, EngineError> {
        let path = TypedPath::parse(raw)?;
        let mut existing = self.element_ids()?;
        let mut element = value_to_element(value)?;
        ensure_ids(&mut element, &mut existing)?;

        let body = self.body_mut()?;
        let (parent_addr, idx) = resolve_insertion(body, &path, raw)?;
        let parent = element_at_mut(body, &parent_addr)
            .ok_or_else(|| EngineError::element_not_found(format!("{raw}: stale parent")))?;
        check_fits(&parent.name, &element.name, raw)?;

        let id = element_id_of(&element);
        parent.children.insert(idx, XmlNode::Element(element));
        Ok(OpOutcome::of(id))
    }

    fn apply_replace(&mut self, raw: &str, value: &Value) -> Result<OpOutcome, EngineError> {
        let path = TypedPath::parse(raw)?;
        let body = self.body()?;
        let address = resolve_existing(body, &path, raw)?;
        let old = element_at(body, &address)
            .ok_or_else(|| EngineError::element_not_found(format!("{raw}: stale address")))?;
        let old_id = old.attr(ID_ATTR).map(str::to_string);

        // Identifiers inside the replaced subtree vanish with it.
        let mut existing = self.element_ids()?;
        let mut vanishing = HashSet::new();
        collect_subtree_ids(old, &mut vanishing);
        existing.retain(|id| !vanishing.contains(id));

        let mut element = value_to_element(value)?;
        ensure_ids(&mut element, &mut existing)?;
        // Replacement keeps the target's identity: the diff engine reports it
        // as modified rather than removed + added.
        if let Some(id) = old_id {
            element.set_attr(ID_ATTR, id);
        }

        let (last, parent_addr) = address
            .split_last()
            .ok_or_else(|| EngineError::invalid_path(format!("{raw}: cannot replace the body")))?;
        let body = self.body_mut()?;
        let parent = element_at_mut(body, &parent_addr.to_vec())
            .ok_or_else(|| EngineError::element_not_found(format!("{raw}: stale parent")))?;
        check_fits(&parent.name, &element.name, raw)?;

        let id = element_id_of(&element);
        parent.children[*last] = XmlNode::Element(element);
        Ok(OpOutcome::of(id))
    }

    fn apply_remove(&mut self, raw: &str) -> Result<OpOutcome, EngineError> {
        let path = TypedPath::parse(raw)?;
        let body = self.body_mut()?;
        let address = resolve_existing(body, &path, raw)?;
        let (last, parent_addr) = address
            .split_last()
            .ok_or_else(|| EngineError::invalid_path(format!("{raw}: cannot remove the body")))?;
        let parent = element_at_mut(body, &parent_addr.to_vec())
            .ok_or_else(|| EngineError::element_not_found(format!("{raw}: stale parent")))?;

        let removed = parent.children.remove(*last);
        let id = removed
            .as_element()
            .map(element_id_of)
            .unwrap_or_default();
        Ok(OpOutcome::of(id))
    }

    fn apply_move(&mut self, from_raw: &str, to_raw: &str) -> Result<OpOutcome, EngineError> {
        let from = TypedPath::parse(from_raw)?;
        let to = TypedPath::parse(to_raw)?;

        let body = self.body_mut()?;
        let address = resolve_existing(body, &from, from_raw)?;
        let (last, parent_addr) = address.split_last().ok_or_else(|| {
            EngineError::invalid_path(format!("{from_raw}: cannot move the body"))
        })?;
        let parent = element_at_mut(body, &parent_addr.to_vec())
            .ok_or_else(|| EngineError::element_not_found(format!("{from_raw}: stale parent")))?;
        let taken = match parent.children.remove(*last) {
            XmlNode::Element(el) => el,
            text @ XmlNode::Text(_) => {
                // Candidate resolution never lands on text nodes; put it back.
                parent.children.insert(*last, text);
                return Err(EngineError::element_not_found(format!(
                    "{from_raw}: not an element"
                )));
            }
        };

        // The destination resolves against the tree with the source removed,
        // so `/body/children[n]` means the same thing the caller sees after
        // the move.
        let (parent_addr, idx) = resolve_insertion(body, &to, to_raw)?;
        let parent = element_at_mut(body, &parent_addr)
            .ok_or_else(|| EngineError::element_not_found(format!("{to_raw}: stale parent")))?;
        check_fits(&parent.name, &taken.name, to_raw)?;

        let id = element_id_of(&taken);
        parent.children.insert(idx, XmlNode::Element(taken));
        Ok(OpOutcome::of(id))
    }

    fn apply_copy(&mut self, from_raw: &str, to_raw: &str) -> Result<OpOutcome, EngineError> {
        let from = TypedPath::parse(from_raw)?;
        let to = TypedPath::parse(to_raw)?;

        let body = self.body()?;
        let address = resolve_existing(body, &from, from_raw)?;
        let mut clone = element_at(body, &address)
            .ok_or_else(|| EngineError::element_not_found(format!("{from_raw}: stale address")))?
            .clone();
        reassign_ids(&mut clone);

        let body = self.body_mut()?;
        let (parent_addr, idx) = resolve_insertion(body, &to, to_raw)?;
        let parent = element_at_mut(body, &parent_addr)
            .ok_or_else(|| EngineError::element_not_found(format!("{to_raw}: stale parent")))?;
        check_fits(&parent.name, &clone.name, to_raw)?;

        let id = element_id_of(&clone);
        parent.children.insert(idx, XmlNode::Element(clone));
        Ok(OpOutcome::of(id))
    }

    fn apply_replace_text(
        &mut self,
        raw: &str,
        find: &str,
        replace: &str,
        max_count: Option<u64>,
    ) -> Result<OpOutcome, EngineError> {
        if find.is_empty() {
            return Err(EngineError::InvalidRequest(
                "replace_text: find must not be empty".into(),
            ));
        }
        let path = TypedPath::parse(raw)?;
        let body = self.body_mut()?;
        let address = resolve_existing(body, &path, raw)?;
        let target = element_at_mut(body, &address)
            .ok_or_else(|| EngineError::element_not_found(format!("{raw}: stale address")))?;

        let mut budget = max_count.unwrap_or(u64::MAX);
        let replaced = replace_in_text_runs(target, find, replace, &mut budget);
        let mut outcome = OpOutcome::of(element_id_of(target));
        outcome.replaced = Some(replaced);
        Ok(outcome)
    }

    fn apply_remove_column(&mut self, raw: &str) -> Result<OpOutcome, EngineError> {
        let path = TypedPath::parse(raw)?;
        let (last, prefix) = path
            .segments
            .split_last()
            .expect("TypedPath::parse rejects empty paths");
        if last.kind != SegmentKind::Column {
            return Err(EngineError::invalid_path(format!(
                "{raw}: remove_column requires a terminal column[..] segment"
            )));
        }

        let table_path = TypedPath {
            segments: prefix.to_vec(),
        };
        let body = self.body_mut()?;
        let address = resolve_existing(body, &table_path, raw)?;
        let table = element_at_mut(body, &address)
            .ok_or_else(|| EngineError::element_not_found(format!("{raw}: stale address")))?;
        if table.name != "w:tbl" {
            return Err(EngineError::structural_rule(format!(
                "{raw}: column[..] applies to tables, found {}",
                table.name
            )));
        }

        let column = match &last.selector {
            Selector::Index(n) => Some(*n),
            Selector::Last => None,
            _ => {
                return Err(EngineError::invalid_path(format!(
                    "{raw}: column selector must be an index or [-1]"
                )))
            }
        };

        let mut removed_any = false;
        for row in table.child_elements_mut().filter(|el| el.name == "w:tr") {
            let cells: Vec<usize> = row
                .children
                .iter()
                .enumerate()
                .filter_map(|(i, node)| {
                    node.as_element()
                        .filter(|el| el.name == "w:tc")
                        .map(|_| i)
                })
                .collect();
            let target = match column {
                Some(n) => cells.get(n).copied(),
                None => cells.last().copied(),
            };
            if let Some(node_idx) = target {
                row.children.remove(node_idx);
                removed_any = true;
            }
        }
        if !removed_any {
            return Err(EngineError::element_not_found(format!(
                "{raw}: table has no such column"
            )));
        }

        // Keep the declared grid in step with the cells.
        if let Some(grid) = table.find_child_mut("w:tblGrid") {
            let cols: Vec<usize> = grid
                .children
                .iter()
                .enumerate()
                .filter_map(|(i, node)| {
                    node.as_element()
                        .filter(|el| el.name == "w:gridCol")
                        .map(|_| i)
                })
                .collect();
            let target = match column {
                Some(n) => cols.get(n).copied(),
                None => cols.last().copied(),
            };
            if let Some(node_idx) = target {
                grid.children.remove(node_idx);
            }
        }

        Ok(OpOutcome::of(element_id_of(table)))
    }
}

fn element_id_of(el: &XmlElement) -> String {
    el.attr(ID_ATTR).unwrap_or_default().to_string()
}

fn collect_subtree_ids(el: &XmlElement, out: &mut HashSet<String>) {
    if let Some(id) = el.attr(ID_ATTR) {
        out.insert(id.to_string());
    }
    for child in el.child_elements() {
        collect_subtree_ids(child, out);
    }
}

/// Structural rules: what a parent may directly contain.
fn check_fits(parent: &str, child: &str, raw: &str) -> Result<(), EngineError> {
    let ok = match parent {
        "w:body" | "w:tc" => matches!(child, "w:p" | "w:tbl"),
        "w:tbl" => child == "w:tr",
        "w:tr" => child == "w:tc",
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(EngineError::structural_rule(format!(
            "{raw}: {child} cannot be placed inside {parent}"
        )))
    }
}

/// Give every content element in a new subtree a unique identifier.
/// Explicit identifiers that collide with the document are rejected.
fn ensure_ids(el: &mut XmlElement, existing: &mut HashSet<String>) -> Result<(), EngineError> {
    if is_content_element(&el.name) {
        match el.attr(ID_ATTR) {
            Some(id) => {
                if !existing.insert(id.to_string()) {
                    return Err(EngineError::id_collision(format!(
                        "element id {id} already exists in the document"
                    )));
                }
            }
            None => {
                let mut id = fresh_id();
                while !existing.insert(id.clone()) {
                    id = fresh_id();
                }
                el.set_attr(ID_ATTR, id);
            }
        }
    }
    for child in el.child_elements_mut() {
        ensure_ids(child, existing)?;
    }
    Ok(())
}

fn replace_in_text_runs(el: &mut XmlElement, find: &str, replace: &str, budget: &mut u64) -> u64 {
    let mut replaced = 0;
    if el.name == "w:t" {
        for child in &mut el.children {
            if *budget == 0 {
                break;
            }
            if let XmlNode::Text(text) = child {
                let occurrences = text.matches(find).count() as u64;
                if occurrences == 0 {
                    continue;
                }
                let take = occurrences.min(*budget);
                *text = text.replacen(find, replace, take as usize);
                *budget -= take;
                replaced += take;
            }
        }
        return replaced;
    }
    for child in el.child_elements_mut() {
        if *budget == 0 {
            break;
        }
        replaced += replace_in_text_runs(child, find, replace, budget);
    }
    replaced
}

// =============================================================================
// JSON value -> element
// =============================================================================

/// Build an element from a patch value.
///
/// Two forms are accepted: the generic projection
/// `{"element": "w:p", "attrs": {...}, "children": [...]}` and the
/// convenience forms `{"type": "paragraph" | "table" | "row" | "cell", ...}`.
fn value_to_element(value: &Value) -> Result<XmlElement, EngineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::InvalidRequest("value must be an object".into()))?;

    if obj.contains_key("element") {
        return generic_element(value);
    }

    let kind = obj.get("type").and_then(Value::as_str).ok_or_else(|| {
        EngineError::InvalidRequest("value needs an \"element\" or \"type\" field".into())
    })?;
    match kind {
        "paragraph" => Ok(build_paragraph(
            obj.get("text").and_then(Value::as_str).unwrap_or_default(),
            obj.get("style").and_then(Value::as_str),
        )),
        "table" => {
            let rows = obj
                .get("rows")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    EngineError::InvalidRequest("table value needs a \"rows\" array".into())
                })?
                .iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|c| c.as_str().unwrap_or_default().to_string())
                                .collect::<Vec<_>>()
                        })
                        .ok_or_else(|| {
                            EngineError::InvalidRequest("table rows must be arrays".into())
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(build_table(&rows))
        }
        "row" => {
            let cells: Vec<String> = obj
                .get("cells")
                .and_then(Value::as_array)
                .map(|cells| {
                    cells
                        .iter()
                        .map(|c| c.as_str().unwrap_or_default().to_string())
                        .collect()
                })
                .unwrap_or_default();
            Ok(build_row(&cells))
        }
        "cell" => Ok(build_cell(
            obj.get("text").and_then(Value::as_str).unwrap_or_default(),
        )),
        other => Err(EngineError::InvalidRequest(format!(
            "unknown value type \"{other}\""
        ))),
    }
}

fn generic_element(value: &Value) -> Result<XmlElement, EngineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::InvalidRequest("element node must be an object".into()))?;

    let name = obj
        .get("element")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::InvalidRequest("element node needs an \"element\"".into()))?;
    let mut el = XmlElement::new(name);

    if let Some(attrs) = obj.get("attrs").and_then(Value::as_object) {
        for (key, val) in attrs {
            let val = val.as_str().ok_or_else(|| {
                EngineError::InvalidRequest(format!("attribute {key} must be a string"))
            })?;
            el.set_attr(key, val);
        }
    }

    if let Some(children) = obj.get("children").and_then(Value::as_array) {
        for child in children {
            let child_obj = child.as_object().ok_or_else(|| {
                EngineError::InvalidRequest("children entries must be objects".into())
            })?;
            if child_obj.contains_key("element") {
                el.push_element(generic_element(child)?);
            } else if let Some(text) = child_obj.get("text").and_then(Value::as_str) {
                el.push_text(text);
            } else {
                return Err(EngineError::InvalidRequest(
                    "child needs an \"element\" or \"text\" field".into(),
                ));
            }
        }
    }
    Ok(el)
}

fn build_paragraph(text: &str, style: Option<&str>) -> XmlElement {
    let mut p = XmlElement::new("w:p");
    if let Some(style) = style {
        let mut ppr = XmlElement::new("w:pPr");
        let mut pstyle = XmlElement::new("w:pStyle");
        pstyle.set_attr("w:val", style);
        ppr.push_element(pstyle);
        p.push_element(ppr);
    }
    if !text.is_empty() {
        let mut run = XmlElement::new("w:r");
        let mut t = XmlElement::new("w:t");
        if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
            t.set_attr("xml:space", "preserve");
        }
        t.push_text(text);
        run.push_element(t);
        p.push_element(run);
    }
    p
}

fn build_cell(text: &str) -> XmlElement {
    let mut tc = XmlElement::new("w:tc");
    tc.push_element(build_paragraph(text, None));
    tc
}

fn build_row(cells: &[String]) -> XmlElement {
    let mut tr = XmlElement::new("w:tr");
    for cell in cells {
        tr.push_element(build_cell(cell));
    }
    tr
}

fn build_table(rows: &[Vec<String>]) -> XmlElement {
    let mut tbl = XmlElement::new("w:tbl");
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    if columns > 0 {
        let mut grid = XmlElement::new("w:tblGrid");
        for _ in 0..columns {
            grid.push_element(XmlElement::new("w:gridCol"));
        }
        tbl.push_element(grid);
    }
    for row in rows {
        tbl.push_element(build_row(row));
    }
    tbl
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_paragraph(doc: &mut Document, text: &str) -> String {
        doc.apply(&PatchOp::Add {
            path: "/body/paragraph[*]".into(),
            value: json!({"type": "paragraph", "text": text}),
        })
        .unwrap()
        .element_id
    }

    #[test]
    fn add_appends_before_section_properties() {
        let mut doc = Document::empty();
        let id = add_paragraph(&mut doc, "Hello");
        assert!(!id.is_empty());

        let body = doc.body().unwrap();
        let names: Vec<_> = body.child_elements().map(|el| el.name.clone()).collect();
        assert_eq!(names, vec!["w:p", "w:sectPr"]);
        assert_eq!(body.text_content(), "Hello");
    }

    #[test]
    fn op_json_round_trip() {
        let op = PatchOp::ReplaceText {
            path: "/body/paragraph[0]".into(),
            find: "a".into(),
            replace: "b".into(),
            max_count: Some(2),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "replace_text");
        let back: PatchOp = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), EditKind::ReplaceText);

        let json = json!({"op": "add", "path": "/body/paragraph[*]", "value": {"type": "paragraph"}});
        let op: PatchOp = serde_json::from_value(json).unwrap();
        assert_eq!(op.kind(), EditKind::Add);
    }

    #[test]
    fn remove_missing_element_fails_and_remove_existing_returns_id() {
        let mut doc = Document::empty();
        let id = add_paragraph(&mut doc, "only");

        let err = doc
            .apply(&PatchOp::Remove {
                path: "/body/paragraph[5]".into(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("ElementNotFound"));

        let outcome = doc
            .apply(&PatchOp::Remove {
                path: "/body/paragraph[0]".into(),
            })
            .unwrap();
        assert_eq!(outcome.element_id, id);
        assert!(doc.content_children().unwrap().is_empty());
    }

    #[test]
    fn replace_keeps_element_identity() {
        let mut doc = Document::empty();
        let id = add_paragraph(&mut doc, "before");

        let outcome = doc
            .apply(&PatchOp::Replace {
                path: "/body/paragraph[0]".into(),
                value: json!({"type": "paragraph", "text": "after"}),
            })
            .unwrap();
        assert_eq!(outcome.element_id, id);
        assert_eq!(doc.body().unwrap().text_content(), "after");
    }

    #[test]
    fn move_reorders_elements() {
        let mut doc = Document::empty();
        let first = add_paragraph(&mut doc, "first");
        add_paragraph(&mut doc, "second");

        doc.apply(&PatchOp::Move {
            from: "/body/paragraph[0]".into(),
            path: "/body/children[1]".into(),
        })
        .unwrap();

        let children = doc.content_children().unwrap();
        assert_eq!(children[1].attr(ID_ATTR), Some(first.as_str()));
        assert_eq!(doc.body().unwrap().text_content(), "secondfirst");
    }

    #[test]
    fn copy_assigns_fresh_ids() {
        let mut doc = Document::empty();
        let original = add_paragraph(&mut doc, "dup");

        let copy = doc
            .apply(&PatchOp::Copy {
                from: "/body/paragraph[0]".into(),
                path: "/body/paragraph[*]".into(),
            })
            .unwrap();
        assert_ne!(copy.element_id, original);
        assert_eq!(doc.content_children().unwrap().len(), 2);
        assert_eq!(doc.element_ids().unwrap().len(), 2);
    }

    #[test]
    fn add_rejects_colliding_explicit_id() {
        let mut doc = Document::empty();
        let id = add_paragraph(&mut doc, "x");

        let err = doc
            .apply(&PatchOp::Add {
                path: "/body/paragraph[*]".into(),
                value: json!({"element": "w:p", "attrs": {"eid:id": id}}),
            })
            .unwrap_err();
        assert!(err.to_string().contains("IdCollision"));
    }

    #[test]
    fn structural_rules_are_enforced() {
        let mut doc = Document::empty();
        let err = doc
            .apply(&PatchOp::Add {
                path: "/body/children[*]".into(),
                value: json!({"element": "w:tr"}),
            })
            .unwrap_err();
        assert!(err.to_string().contains("StructuralRule"));
    }

    #[test]
    fn replace_text_honours_max_count() {
        let mut doc = Document::empty();
        add_paragraph(&mut doc, "aaa");

        let outcome = doc
            .apply(&PatchOp::ReplaceText {
                path: "/body/paragraph[0]".into(),
                find: "a".into(),
                replace: "b".into(),
                max_count: Some(2),
            })
            .unwrap();
        assert_eq!(outcome.replaced, Some(2));
        assert_eq!(doc.body().unwrap().text_content(), "bba");
    }

    #[test]
    fn remove_column_drops_cells_and_grid() {
        let mut doc = Document::empty();
        doc.apply(&PatchOp::Add {
            path: "/body/table[*]".into(),
            value: json!({"type": "table", "rows": [["a", "b"], ["c", "d"]]}),
        })
        .unwrap();

        doc.apply(&PatchOp::RemoveColumn {
            path: "/body/table[0]/column[1]".into(),
        })
        .unwrap();

        let body = doc.body().unwrap();
        let table = body.find_child("w:tbl").unwrap();
        for row in table.child_elements().filter(|el| el.name == "w:tr") {
            assert_eq!(row.child_elements().filter(|el| el.name == "w:tc").count(), 1);
        }
        let grid = table.find_child("w:tblGrid").unwrap();
        assert_eq!(grid.child_elements().count(), 1);
        assert_eq!(body.text_content(), "ac");

        let err = doc
            .apply(&PatchOp::RemoveColumn {
                path: "/body/table[0]/column[4]".into(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("ElementNotFound"));
    }

    #[test]
    fn add_by_text_selector_inserts_before_match() {
        let mut doc = Document::empty();
        add_paragraph(&mut doc, "alpha");
        add_paragraph(&mut doc, "omega");

        doc.apply(&PatchOp::Add {
            path: "/body/paragraph[text~='omega']".into(),
            value: json!({"type": "paragraph", "text": "middle"}),
        })
        .unwrap();

        assert_eq!(doc.body().unwrap().text_content(), "alphamiddleomega");
    }
}
