//! Derive work items from a JSON array embedded in agent prose.
//!
//! The text between the first `[` and the last `]` is decoded as an array of
//! `{title, description}` objects. Anything that does not decode yields zero
//! items; extraction never fails its caller.

use serde_json::Value;
use squadron_state::{ProjectId, WorkItem};
use thiserror::Error;
use tracing::{debug, warn};

use crate::invoker::field_ci;

/// One task decoded from agent text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTaskSpec {
    pub title: String,
    pub description: String,
}

impl ExtractedTaskSpec {
    /// A Pending, Medium priority work item for `project`.
    pub fn into_work_item(self, project: ProjectId) -> WorkItem {
        WorkItem::new(project, self.title, self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("no bracketed JSON array found")]
    NoArray,

    #[error("malformed task array: {0}")]
    Malformed(String),
}

/// Strict extraction; see [`extract_tasks`] for the tolerant form.
pub fn try_extract(text: &str) -> Result<Vec<ExtractedTaskSpec>, ExtractionError> {
    let (start, end) = match (text.find('['), text.rfind(']')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(ExtractionError::NoArray),
    };

    let slice = &text[start..=end];
    let items: Vec<Value> =
        serde_json::from_str(slice).map_err(|e| ExtractionError::Malformed(e.to_string()))?;

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item
                .as_object()
                .ok_or_else(|| ExtractionError::Malformed(format!("item {i} is not an object")))?;
            let title = match field_ci(obj, &["title"]) {
                Some(Value::String(t)) => t.clone(),
                _ => {
                    return Err(ExtractionError::Malformed(format!(
                        "item {i} has no string title"
                    )))
                }
            };
            let description = match field_ci(obj, &["description"]) {
                None | Some(Value::Null) => title.clone(),
                Some(Value::String(d)) => d.clone(),
                Some(other) => {
                    return Err(ExtractionError::Malformed(format!(
                        "item {i} description is not a string: {other}"
                    )))
                }
            };
            Ok(ExtractedTaskSpec { title, description })
        })
        .collect()
}

/// Extract task specs from `text`, logging and returning an empty list on
/// any failure.
pub fn extract_tasks(text: &str) -> Vec<ExtractedTaskSpec> {
    match try_extract(text) {
        Ok(specs) => {
            debug!(count = specs.len(), "extracted task specs");
            specs
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse tasks from agent output");
            Vec::new()
        }
    }
}
