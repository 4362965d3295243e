//! Terminal report produced by the delegation pipeline.
//!
//! Field names are the wire names coordinators are instructed to emit.
//! Deserialization is lenient about shape (`null` strings become `""`,
//! missing fields take their defaults) but the sourcing invariant is checked
//! separately with [`FinalReport::unsourced_items`].

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalReport {
    #[serde(deserialize_with = "nullable")]
    pub input_program: String,
    #[serde(deserialize_with = "nullable")]
    pub input_description: String,
    /// Item tally per category, e.g. `local`, `national`, `international`.
    #[serde(deserialize_with = "nullable")]
    pub coverage: BTreeMap<String, u64>,
    #[serde(deserialize_with = "nullable")]
    pub items: Vec<ReportItem>,
    #[serde(deserialize_with = "nullable")]
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportItem {
    #[serde(deserialize_with = "nullable")]
    pub program_name: String,
    #[serde(deserialize_with = "nullable")]
    pub university: String,
    #[serde(deserialize_with = "nullable")]
    pub country: String,
    #[serde(deserialize_with = "nullable")]
    pub url: String,
    #[serde(deserialize_with = "nullable")]
    pub courses_examples: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub tuition: String,
    #[serde(deserialize_with = "nullable")]
    pub intake_per_year: String,
    #[serde(deserialize_with = "nullable")]
    pub sources: Vec<String>,
}

impl ReportItem {
    /// At least one non-blank source reference.
    pub fn is_sourced(&self) -> bool {
        self.sources.iter().any(|s| !s.trim().is_empty())
    }

    fn fill_blank(&mut self, marker: &str) {
        for field in [
            &mut self.program_name,
            &mut self.university,
            &mut self.country,
            &mut self.url,
            &mut self.tuition,
            &mut self.intake_per_year,
        ] {
            if field.trim().is_empty() {
                *field = marker.to_string();
            }
        }
    }
}

impl FinalReport {
    /// Indices of items without a usable source.
    pub fn unsourced_items(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_sourced())
            .map(|(i, _)| i)
            .collect()
    }

    /// Replace blank optional item fields with `marker`.
    pub fn mark_unavailable(&mut self, marker: &str) {
        for item in &mut self.items {
            item.fill_blank(marker);
        }
    }

    pub fn total_coverage(&self) -> u64 {
        self.coverage.values().sum()
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nulls_and_missing_fields_are_defaulted() {
        let report: FinalReport = serde_json::from_value(json!({
            "input_program": "Ingeniería en ciencia de Datos",
            "input_description": null,
            "items": [{
                "program_name": "Data Science",
                "tuition": null,
                "sources": ["https://example.edu/ds"]
            }]
        }))
        .unwrap();

        assert_eq!(report.input_description, "");
        assert!(report.coverage.is_empty());
        assert!(report.insights.is_empty());
        assert_eq!(report.items[0].tuition, "");
        assert!(report.items[0].courses_examples.is_empty());
        assert!(report.unsourced_items().is_empty());
    }

    #[test]
    fn blank_sources_do_not_count() {
        let report: FinalReport = serde_json::from_value(json!({
            "items": [
                {"program_name": "A", "sources": ["https://a.edu"]},
                {"program_name": "B", "sources": []},
                {"program_name": "C", "sources": ["  "]},
                {"program_name": "D"}
            ]
        }))
        .unwrap();
        assert_eq!(report.unsourced_items(), vec![1, 2, 3]);
    }

    #[test]
    fn serialization_never_omits_fields() {
        let value = serde_json::to_value(FinalReport::default()).unwrap();
        for key in ["input_program", "input_description", "coverage", "items", "insights"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn mark_unavailable_fills_only_blank_item_fields() {
        let mut report = FinalReport {
            items: vec![ReportItem {
                program_name: "MSc Data Science".into(),
                tuition: " ".into(),
                sources: vec!["https://x.edu".into()],
                ..ReportItem::default()
            }],
            ..FinalReport::default()
        };
        report.mark_unavailable("No disponible");

        let item = &report.items[0];
        assert_eq!(item.program_name, "MSc Data Science");
        assert_eq!(item.tuition, "No disponible");
        assert_eq!(item.intake_per_year, "No disponible");
        assert_eq!(report.input_program, "");
    }

    #[test]
    fn coverage_total_sums_categories() {
        let report: FinalReport = serde_json::from_value(json!({
            "coverage": {"local": 2, "national": 3, "international": 1}
        }))
        .unwrap();
        assert_eq!(report.total_coverage(), 6);
    }
}
