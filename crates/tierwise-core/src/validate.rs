//! Completeness validation for extracted payloads.
//!
//! A [`CompletenessPolicy`] declares which top-level fields must be filled in
//! and which list fields must hold at least one record with its own required
//! sub-fields. [`validate`] never fails: a wrong-typed or missing field is a
//! failed check, and a payload that is not an object at all degrades to an
//! all-false verdict. Every check is evaluated even once the overall result is
//! known, so the verdict always shows every field that failed.
//!
//! A field counts as filled when it is present, not `null`, and
//! - a string with non-whitespace content, or
//! - a non-empty array or object, or
//! - any number or boolean.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A list-of-records field and the sub-fields each record must fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFieldRule {
    pub field: String,
    pub required: Vec<String>,
}

impl ListFieldRule {
    pub fn new<const N: usize>(field: &str, required: [&str; N]) -> Self {
        Self {
            field: field.to_string(),
            required: required.iter().map(|f| (*f).to_string()).collect(),
        }
    }
}

/// Required-field policy applied to an extracted payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessPolicy {
    pub scalars: Vec<String>,
    pub lists: Vec<ListFieldRule>,
}

impl CompletenessPolicy {
    pub fn required<const N: usize>(scalars: [&str; N]) -> Self {
        Self {
            scalars: scalars.iter().map(|f| (*f).to_string()).collect(),
            lists: Vec::new(),
        }
    }

    pub fn with_list(mut self, rule: ListFieldRule) -> Self {
        self.lists.push(rule);
        self
    }

    fn field_names(&self) -> impl Iterator<Item = &str> {
        self.scalars
            .iter()
            .map(String::as_str)
            .chain(self.lists.iter().map(|rule| rule.field.as_str()))
    }
}

/// Policy for the brand-separation question: year, reason, original brand,
/// and the resulting brands with their owners.
pub fn brand_separation_policy() -> CompletenessPolicy {
    CompletenessPolicy::required(["anio_separacion", "motivo", "marca_original"]).with_list(
        ListFieldRule::new("marcas_resultantes", ["marca", "dueños"]),
    )
}

/// Per-field outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldVerdict {
    Scalar {
        satisfied: bool,
    },
    List {
        satisfied: bool,
        /// One map per element, sub-field name to satisfied.
        elements: Vec<BTreeMap<String, bool>>,
    },
}

impl FieldVerdict {
    pub fn satisfied(&self) -> bool {
        match self {
            Self::Scalar { satisfied } | Self::List { satisfied, .. } => *satisfied,
        }
    }
}

/// Field-by-field completeness judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub fields: BTreeMap<String, FieldVerdict>,
}

impl ValidationVerdict {
    /// Names of every field whose check failed, in name order.
    pub fn failed_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, verdict)| !verdict.satisfied())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn all_false(policy: &CompletenessPolicy) -> Self {
        let mut fields = BTreeMap::new();
        for name in &policy.scalars {
            fields.insert(name.clone(), FieldVerdict::Scalar { satisfied: false });
        }
        for rule in &policy.lists {
            fields.insert(
                rule.field.clone(),
                FieldVerdict::List {
                    satisfied: false,
                    elements: Vec::new(),
                },
            );
        }
        Self {
            passed: false,
            fields,
        }
    }
}

/// Judge `payload` against `policy`.
pub fn validate(payload: &Value, policy: &CompletenessPolicy) -> ValidationVerdict {
    let Some(object) = payload.as_object() else {
        debug!(
            fields = ?policy.field_names().collect::<Vec<_>>(),
            "payload is not an object; every field fails"
        );
        return ValidationVerdict::all_false(policy);
    };

    let mut fields = BTreeMap::new();

    for name in &policy.scalars {
        let satisfied = is_filled(object.get(name));
        debug!(field = %name, satisfied, "scalar check");
        fields.insert(name.clone(), FieldVerdict::Scalar { satisfied });
    }

    for rule in &policy.lists {
        let verdict = check_list(object, rule);
        debug!(field = %rule.field, satisfied = verdict.satisfied(), "list check");
        fields.insert(rule.field.clone(), verdict);
    }

    let passed = fields.values().all(FieldVerdict::satisfied);
    ValidationVerdict { passed, fields }
}

fn check_list(object: &Map<String, Value>, rule: &ListFieldRule) -> FieldVerdict {
    let Some(Value::Array(items)) = object.get(&rule.field) else {
        return FieldVerdict::List {
            satisfied: false,
            elements: Vec::new(),
        };
    };

    let elements: Vec<BTreeMap<String, bool>> = items
        .iter()
        .map(|item| {
            rule.required
                .iter()
                .map(|sub| {
                    let filled = item.as_object().is_some_and(|o| is_filled(o.get(sub)));
                    (sub.clone(), filled)
                })
                .collect()
        })
        .collect();

    let satisfied = !elements.is_empty()
        && elements
            .iter()
            .all(|element| element.values().all(|filled| *filled));

    FieldVerdict::List {
        satisfied,
        elements,
    }
}

fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => true,
    }
}
