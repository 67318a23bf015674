use docx_session_content::{OpOutcome, PatchOp};
use docx_session_core::{EditKind, EngineError};
use serde::Serialize;

/// Per-operation status within a batch result.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpReport {
    /// The operation was applied and committed.
    Applied {
        index: usize,
        op: EditKind,
        element_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        replaced: Option<u64>,
    },
    /// The operation applied cleanly, but a later operation failed and the
    /// whole batch was rolled back.
    WouldSucceed {
        index: usize,
        op: EditKind,
        element_id: String,
    },
    /// The operation failed; it aborted the batch.
    Failed {
        index: usize,
        op: EditKind,
        error: String,
    },
    /// A prior failure meant this operation was never tried.
    NotAttempted { index: usize, op: EditKind },
}

/// Structured result of `apply_patch`.
///
/// Per-op failures never surface as errors: the report always lists one
/// record per submitted operation, in order.
#[derive(Debug, Clone, Serialize)]
pub struct PatchReport {
    pub success: bool,
    /// Operations actually committed (0 on any failure).
    pub applied: usize,
    pub total: usize,
    pub operations: Vec<OpReport>,
}

impl PatchReport {
    /// Every operation applied and committed.
    pub(crate) fn committed(ops: &[PatchOp], outcomes: Vec<OpOutcome>) -> Self {
        let operations = ops
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (op, outcome))| OpReport::Applied {
                index,
                op: op.kind(),
                element_id: outcome.element_id,
                replaced: outcome.replaced,
            })
            .collect();
        Self {
            success: true,
            applied: ops.len(),
            total: ops.len(),
            operations,
        }
    }

    /// Operation `failed_index` failed; everything was rolled back.
    pub(crate) fn aborted(
        ops: &[PatchOp],
        failed_index: usize,
        error: &EngineError,
        outcomes: Vec<OpOutcome>,
    ) -> Self {
        let operations = ops
            .iter()
            .enumerate()
            .map(|(index, op)| {
                if index < failed_index {
                    OpReport::WouldSucceed {
                        index,
                        op: op.kind(),
                        element_id: outcomes[index].element_id.clone(),
                    }
                } else if index == failed_index {
                    OpReport::Failed {
                        index,
                        op: op.kind(),
                        error: error.to_string(),
                    }
                } else {
                    OpReport::NotAttempted {
                        index,
                        op: op.kind(),
                    }
                }
            })
            .collect();
        Self {
            success: false,
            applied: 0,
            total: ops.len(),
            operations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(n: usize) -> Vec<PatchOp> {
        (0..n)
            .map(|i| PatchOp::Add {
                path: "/body/paragraph[*]".into(),
                value: json!({"type": "paragraph", "text": format!("p{i}")}),
            })
            .collect()
    }

    fn outcome(id: &str) -> OpOutcome {
        OpOutcome {
            element_id: id.to_string(),
            replaced: None,
        }
    }

    #[test]
    fn committed_report_shape() {
        let report = PatchReport::committed(&ops(2), vec![outcome("a"), outcome("b")]);
        assert!(report.success);
        assert_eq!(report.applied, 2);
        assert_eq!(report.total, 2);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["operations"][0]["status"], "applied");
        assert_eq!(json["operations"][1]["element_id"], "b");
    }

    #[test]
    fn aborted_report_flags_each_op() {
        let error = EngineError::element_not_found("gone");
        let report = PatchReport::aborted(&ops(3), 1, &error, vec![outcome("a")]);
        assert!(!report.success);
        assert_eq!(report.applied, 0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["operations"][0]["status"], "would_succeed");
        assert_eq!(json["operations"][1]["status"], "failed");
        assert!(json["operations"][1]["error"]
            .as_str()
            .unwrap()
            .contains("gone"));
        assert_eq!(json["operations"][2]["status"], "not_attempted");
    }
}
