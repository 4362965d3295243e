//! Subtasks and their results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation id of a delegated subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(pub u64);

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of delegated work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Subtask {
    pub fn new(id: u64, instruction: impl Into<String>) -> Self {
        Self {
            id: SubtaskId(id),
            instruction: instruction.into(),
            category: None,
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SubtaskStatus {
    Completed(String),
    TimedOut,
    Failed(String),
}

impl SubtaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask: Subtask,
    pub status: SubtaskStatus,
    pub duration_ms: u64,
}

impl SubtaskResult {
    pub fn id(&self) -> SubtaskId {
        self.subtask.id
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, SubtaskStatus::Completed(_))
    }

    /// The worker's output, or `marker` when the subtask produced none.
    pub fn text_or<'a>(&'a self, marker: &'a str) -> &'a str {
        match &self.status {
            SubtaskStatus::Completed(text) => text.as_str(),
            SubtaskStatus::TimedOut | SubtaskStatus::Failed(_) => marker,
        }
    }
}

/// Reduce results into id order. Arrival order does not matter.
pub fn merge<I>(results: I) -> Vec<SubtaskResult>
where
    I: IntoIterator<Item = SubtaskResult>,
{
    results
        .into_iter()
        .fold(BTreeMap::new(), |mut acc, result| {
            acc.insert(result.id(), result);
            acc
        })
        .into_values()
        .collect()
}

/// Render merged findings as prompt text, one section per subtask.
pub fn render_findings(results: &[SubtaskResult], unavailable_marker: &str) -> String {
    let mut out = String::new();
    for result in results {
        out.push_str(&format!("### Subtask {}", result.id()));
        if let Some(category) = &result.subtask.category {
            out.push_str(&format!(" [{category}]"));
        }
        out.push('\n');
        out.push_str(&format!("Instruction: {}\n", result.subtask.instruction));
        out.push_str(result.text_or(unavailable_marker).trim());
        out.push_str("\n\n");
    }
    out
}
