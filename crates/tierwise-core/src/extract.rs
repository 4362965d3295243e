//! Structured-payload extraction from free-form agent output.
//!
//! Agents are asked for JSON but routinely wrap it in a ```json fence, prefix
//! it with prose, or trail it with commentary. [`extract`] recovers exactly one
//! object, in priority order:
//!
//! 1. the body of the first ```json fenced block;
//! 2. otherwise the first balanced `{ ... }` object, scanning with a
//!    string/escape-aware brace counter so braces inside string literals are
//!    ignored.
//!
//! The candidate is then parsed strictly. Parse failures carry the error
//! position and up to 60 characters on each side of it.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::capability::RawResponse;

/// Characters of context kept on each side of a parse error.
pub const CONTEXT_RADIUS: usize = 60;

/// A parsed object together with the exact text it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPayload {
    pub value: Value,
    pub source: String,
}

impl ExtractedPayload {
    /// Build a payload from an already-structured value.
    pub fn from_value(value: Value) -> Self {
        let source = value.to_string();
        Self { value, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no balanced object: {reason}")]
    NoBalancedObject { reason: String },

    #[error(
        "failed to parse structured payload: {message}\n\
         near offset {offset} (line {line}, column {column}):\n---\n{context}\n---"
    )]
    Parse {
        message: String,
        line: usize,
        column: usize,
        /// Byte offset of the error inside the candidate text.
        offset: usize,
        context: String,
    },
}

impl ExtractionError {
    /// The surrounding-text window for parse failures.
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Parse { context, .. } => Some(context),
            Self::NoBalancedObject { .. } => None,
        }
    }
}

/// `None` only if the pattern fails to compile; extraction then relies on the
/// brace scan alone.
fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?is)```[ \t]*json\b\s*(.*?)\s*```").ok())
        .as_ref()
}

fn fenced_body(text: &str) -> Option<&str> {
    let captures = fence_pattern()?.captures(text)?;
    Some(captures.get(1)?.as_str().trim())
}

/// Extract a single structured object from `text`.
pub fn extract(text: &str) -> Result<ExtractedPayload, ExtractionError> {
    let candidate = match fenced_body(text) {
        Some(body) => body,
        None => balanced_object(text)?,
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Ok(ExtractedPayload {
            value,
            source: candidate.to_string(),
        }),
        Err(err) => {
            let offset = error_offset(candidate, err.line(), err.column());
            Err(ExtractionError::Parse {
                message: err.to_string(),
                line: err.line(),
                column: err.column(),
                offset,
                context: context_window(candidate, offset),
            })
        }
    }
}

/// Extract from a capability response; structured responses pass through.
pub fn extract_response(response: &RawResponse) -> Result<ExtractedPayload, ExtractionError> {
    match response {
        RawResponse::Text(text) => extract(text),
        RawResponse::Structured(value) => Ok(ExtractedPayload::from_value(value.clone())),
    }
}

fn balanced_object(text: &str) -> Result<&str, ExtractionError> {
    let start = text
        .find('{')
        .ok_or_else(|| ExtractionError::NoBalancedObject {
            reason: "no opening brace in response".to_string(),
        })?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    Err(ExtractionError::NoBalancedObject {
        reason: format!("opening brace at byte {start} is never closed"),
    })
}

/// Map serde_json's 1-based line/column onto a char-aligned byte offset.
fn error_offset(src: &str, line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let line_start: usize = src
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    let mut offset = (line_start + column.saturating_sub(1)).min(src.len());
    while !src.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn context_window(src: &str, offset: usize) -> String {
    let before: Vec<char> = src[..offset].chars().rev().take(CONTEXT_RADIUS).collect();
    before
        .into_iter()
        .rev()
        .chain(src[offset..].chars().take(CONTEXT_RADIUS))
        .collect()
}
