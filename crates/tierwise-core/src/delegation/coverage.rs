//! Minimum coverage contract handed to coordinators.
//!
//! Coverage is an instruction, not a check the pipeline enforces: the only
//! evidence available afterwards is the report's `coverage` tally, which
//! [`CoveragePolicy::assess`] inspects for logging.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::report::FinalReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoveragePolicy {
    pub min_subtasks: usize,
    pub min_categories: usize,
    /// Categories the coordinator should tally.
    pub categories: Vec<String>,
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            min_subtasks: 4,
            min_categories: 3,
            categories: vec![
                "local".to_string(),
                "national".to_string(),
                "international".to_string(),
            ],
        }
    }
}

impl CoveragePolicy {
    /// Render the contract as instruction text for a coordinator prompt.
    pub fn instruction(&self) -> String {
        let mut text = format!(
            "Coverage requirements: issue at least {} subtasks spanning at least {} categories.",
            self.min_subtasks, self.min_categories
        );
        if !self.categories.is_empty() {
            let categories = self.categories.join(", ");
            text.push_str(&format!(" Use these categories: {categories}."));
            text.push_str(
                " Report the number of items found per category in the \"coverage\" field.",
            );
        }
        text
    }

    pub fn assess(&self, report: &FinalReport) -> CoverageAssessment {
        let covered: Vec<String> = report
            .coverage
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(category, _)| category.clone())
            .collect();
        let missing = self
            .categories
            .iter()
            .filter(|c| !covered.contains(c))
            .cloned()
            .collect();

        CoverageAssessment {
            satisfied: covered.len() >= self.min_categories,
            required: self.min_categories,
            covered,
            missing,
        }
    }
}

/// What the coverage tally shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageAssessment {
    pub satisfied: bool,
    pub required: usize,
    /// Categories with a non-zero count.
    pub covered: Vec<String>,
    /// Expected categories with no items.
    pub missing: Vec<String>,
}

impl fmt::Display for CoverageAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} required categories covered",
            self.covered.len(),
            self.required
        )?;
        if !self.missing.is_empty() {
            write!(f, " (missing: {})", self.missing.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(coverage: serde_json::Value) -> FinalReport {
        serde_json::from_value(json!({ "coverage": coverage })).unwrap()
    }

    #[test]
    fn instruction_states_the_minimums() {
        let text = CoveragePolicy::default().instruction();
        assert!(text.contains("at least 4 subtasks"));
        assert!(text.contains("at least 3 categories"));
        assert!(text.contains("local, national, international"));
    }

    #[test]
    fn zero_counts_do_not_cover_a_category() {
        let assessment = CoveragePolicy::default().assess(&report(json!({
            "local": 2, "national": 0, "international": 4
        })));
        assert!(!assessment.satisfied);
        assert_eq!(assessment.missing, vec!["national".to_string()]);
        assert_eq!(
            assessment.to_string(),
            "2 of 3 required categories covered (missing: national)"
        );
    }

    #[test]
    fn full_tally_satisfies() {
        let assessment = CoveragePolicy::default().assess(&report(json!({
            "local": 1, "national": 1, "international": 1
        })));
        assert!(assessment.satisfied);
        assert!(assessment.missing.is_empty());
    }
}
