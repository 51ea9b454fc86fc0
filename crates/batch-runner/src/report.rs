//! Run report returned to the caller

use std::collections::BTreeSet;

use provider::Dataset;
use serde::Serialize;

/// Outcome of one work item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub batch_index: usize,
    pub item_index: usize,
    pub label: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    /// Credential of the last attempt (the one that succeeded, on success).
    pub credential_id: Option<String>,
    pub credentials_tried: Vec<String>,
}

/// Credential assigned to a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchAssignment {
    pub batch_index: usize,
    pub credential_id: String,
    pub item_count: usize,
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No item failed.
    Completed,
    /// Some items succeeded, some failed.
    PartialSuccess,
    /// Every item failed.
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::PartialSuccess => "partial_success",
            RunOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub status: RunOutcome,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Distinct credentials that ran at least one attempt.
    pub credentials_used: Vec<String>,
    pub duration_ms: u64,
    pub batches: Vec<BatchAssignment>,
    /// Ordered by (batch, item).
    pub items: Vec<ItemOutcome>,
}

impl RunReport {
    pub fn new(mut items: Vec<ItemOutcome>, batches: Vec<BatchAssignment>, duration_ms: u64) -> Self {
        items.sort_by_key(|i| (i.batch_index, i.item_index));
        let succeeded = items.iter().filter(|i| i.success).count();
        let failed = items.len() - succeeded;
        let status = if failed == 0 {
            RunOutcome::Completed
        } else if succeeded > 0 {
            RunOutcome::PartialSuccess
        } else {
            RunOutcome::Failed
        };
        let credentials_used: BTreeSet<&str> = items
            .iter()
            .flat_map(|i| i.credentials_tried.iter().map(String::as_str))
            .collect();
        let credentials_used = credentials_used.into_iter().map(str::to_string).collect();

        Self {
            status,
            total: items.len(),
            succeeded,
            failed,
            credentials_used,
            duration_ms,
            batches,
            items,
        }
    }

    /// Ids of credentials that produced at least one successful item.
    pub fn successful_credentials(&self) -> BTreeSet<&str> {
        self.items
            .iter()
            .filter(|i| i.success)
            .filter_map(|i| i.credential_id.as_deref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(batch: usize, index: usize, ok: bool, tried: &[&str]) -> ItemOutcome {
        ItemOutcome {
            batch_index: batch,
            item_index: index,
            label: format!("item-{batch}-{index}"),
            success: ok,
            data: ok.then(|| vec![serde_json::json!({"ok": true})]),
            error: (!ok).then(|| "boom".to_string()),
            attempts: tried.len() as u32,
            credential_id: tried.last().map(|s| s.to_string()),
            credentials_tried: tried.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn status_labels() {
        let all_ok = RunReport::new(vec![item(0, 0, true, &["a"])], vec![], 1);
        assert_eq!(all_ok.status, RunOutcome::Completed);

        let mixed = RunReport::new(
            vec![item(0, 0, true, &["a"]), item(0, 1, false, &["a"])],
            vec![],
            1,
        );
        assert_eq!(mixed.status, RunOutcome::PartialSuccess);

        let none = RunReport::new(vec![item(0, 0, false, &["a"])], vec![], 1);
        assert_eq!(none.status, RunOutcome::Failed);

        let empty = RunReport::new(vec![], vec![], 0);
        assert_eq!(empty.status, RunOutcome::Completed);
    }

    #[test]
    fn items_sorted_and_credentials_deduplicated() {
        let report = RunReport::new(
            vec![
                item(1, 0, true, &["b"]),
                item(0, 1, false, &["a", "c"]),
                item(0, 0, true, &["a"]),
            ],
            vec![],
            5,
        );
        let order: Vec<_> = report
            .items
            .iter()
            .map(|i| (i.batch_index, i.item_index))
            .collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(report.credentials_used, vec!["a", "b", "c"]);
        assert_eq!(
            report.successful_credentials().into_iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn serializes_status_snake_case_and_skips_empty_fields() {
        let report = RunReport::new(vec![item(0, 0, true, &["a"])], vec![], 2);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert!(json["items"][0].get("error").is_none());
    }
}
