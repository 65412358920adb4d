//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use serde::Serialize;

use crate::lifecycle::{NodeOutcome, NodeState};
use crate::run::RunResult;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No nodes processed.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        if i + 1 < widths.len() {
            output.push_str(&format!(
                "{:width$}",
                header.to_uppercase(),
                width = widths[i]
            ));
        } else {
            output.push_str(&header.to_uppercase());
        }
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            // Last column is not padded
            if i + 1 < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Run summary
// ============================================================================

/// One row of the run summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub node: String,
    pub state: NodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub duration_secs: i64,
}

impl From<&NodeOutcome> for NodeSummary {
    fn from(outcome: &NodeOutcome) -> Self {
        Self {
            node: outcome.node.clone(),
            state: outcome.state,
            error: outcome.error.as_ref().map(|e| e.to_string()),
            warnings: outcome.warnings.clone(),
            duration_secs: outcome.duration().num_seconds(),
        }
    }
}

/// Machine readable form of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: Vec<String>,
    pub nodes: Vec<NodeSummary>,
}

impl From<&RunResult> for RunSummary {
    fn from(result: &RunResult) -> Self {
        Self {
            processed: result.processed,
            failed: result.failed.clone(),
            nodes: result.outcomes.iter().map(NodeSummary::from).collect(),
        }
    }
}

fn detail(summary: &NodeSummary) -> String {
    match (&summary.error, summary.warnings.len()) {
        (Some(error), _) => error.clone(),
        (None, 0) => "ok".to_string(),
        (None, 1) => format!("ok, {}", summary.warnings[0]),
        (None, n) => format!("ok, {} warnings", n),
    }
}

/// Format the per-node result table followed by the failed node list
pub fn format_run_summary(result: &RunResult) -> String {
    let summary = RunSummary::from(result);
    let headers = &["NODE", "STATE", "TIME", "DETAIL"];
    let rows: Vec<Vec<String>> = summary
        .nodes
        .iter()
        .map(|n| {
            vec![
                n.node.clone(),
                n.state.to_string(),
                format!("{}s", n.duration_secs),
                detail(n),
            ]
        })
        .collect();

    let mut output = format_table(headers, rows);
    output.push('\n');
    if summary.failed.is_empty() {
        output.push_str(&format!(
            "All {} node(s) processed successfully\n",
            summary.processed
        ));
    } else {
        output.push_str(&format!(
            "{} of {} node(s) failed:\n",
            summary.failed.len(),
            summary.processed
        ));
        for node in &summary.failed {
            output.push_str(&format!("    {}\n", node));
        }
    }
    output
}

/// Pretty printed JSON summary
pub fn summary_json(result: &RunResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&RunSummary::from(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterError;
    use crate::lifecycle::LifecycleError;
    use chrono::{Duration, Utc};

    fn outcome(node: &str, error: Option<LifecycleError>, warnings: &[&str]) -> NodeOutcome {
        let started_at = Utc::now();
        NodeOutcome {
            node: node.to_string(),
            state: if error.is_some() {
                NodeState::Failed
            } else {
                NodeState::Done
            },
            error,
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
            started_at,
            finished_at: started_at + Duration::seconds(42),
        }
    }

    fn result() -> RunResult {
        RunResult {
            processed: 3,
            failed: vec!["node-b".to_string()],
            outcomes: vec![
                outcome("node-a", None, &[]),
                outcome(
                    "node-b",
                    Some(LifecycleError::Cluster {
                        phase: NodeState::Cordoning,
                        source: ClusterError::Rejected("forbidden".to_string()),
                    }),
                    &[],
                ),
                outcome("node-c", None, &["reboot command failed: timeout"]),
            ],
        }
    }

    #[test]
    fn test_format_table() {
        let headers = &["NODE", "STATE"];
        let rows = vec![
            vec!["worker-1".to_string(), "done".to_string()],
            vec!["w2".to_string(), "failed".to_string()],
        ];

        let output = format_table(headers, rows);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "NODE       STATE");
        assert_eq!(lines[1], "worker-1   done");
        assert_eq!(lines[2], "w2         failed");
    }

    #[test]
    fn test_format_table_empty() {
        let output = format_table(&["NODE"], vec![]);
        assert!(output.contains("No nodes processed"));
    }

    #[test]
    fn test_format_run_summary() {
        let output = format_run_summary(&result());

        assert!(output.contains("node-a"));
        assert!(output.contains("42s"));
        assert!(output.contains("cordoning failed: Request rejected: forbidden"));
        assert!(output.contains("ok, reboot command failed: timeout"));
        assert!(output.contains("1 of 3 node(s) failed:\n    node-b\n"));
    }

    #[test]
    fn test_format_run_summary_all_ok() {
        let result = RunResult {
            processed: 1,
            failed: vec![],
            outcomes: vec![outcome("node-a", None, &["a", "b"])],
        };
        let output = format_run_summary(&result);
        assert!(output.contains("ok, 2 warnings"));
        assert!(output.contains("All 1 node(s) processed successfully"));
    }

    #[test]
    fn test_summary_json() {
        let json: serde_json::Value =
            serde_json::from_str(&summary_json(&result()).unwrap()).unwrap();

        assert_eq!(json["processed"], 3);
        assert_eq!(json["failed"][0], "node-b");
        assert_eq!(json["nodes"][0]["state"], "done");
        assert!(json["nodes"][0].get("error").is_none());
        assert_eq!(json["nodes"][1]["state"], "failed");
        assert_eq!(json["nodes"][2]["duration_secs"], 42);
    }
}
