//! Subscription patterns
//!
//! A pattern matches on detail type, on source, and on structural equality of
//! fields inside the JSON detail. Every populated criterion must match; an
//! empty criterion matches anything.

use super::{BusEvent, DetailType};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPattern {
    detail_types: Vec<DetailType>,
    sources: Vec<String>,
    fields: Vec<(String, Value)>,
}

impl EventPattern {
    /// Matches every event
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches events of one detail type
    pub fn detail_type(detail_type: DetailType) -> Self {
        Self::any().or_detail_type(detail_type)
    }

    /// Also accept another detail type
    pub fn or_detail_type(mut self, detail_type: DetailType) -> Self {
        if !self.detail_types.contains(&detail_type) {
            self.detail_types.push(detail_type);
        }
        self
    }

    /// Restrict to events from `source` (repeat to allow several)
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Require a detail field to equal `value`
    ///
    /// Nested fields are addressed with dots: `"metadata.channel"`.
    pub fn with_field(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((path.into(), value.into()));
        self
    }

    pub fn matches(&self, event: &BusEvent) -> bool {
        if !self.detail_types.is_empty() && !self.detail_types.contains(&event.detail_type()) {
            return false;
        }

        if !self.sources.is_empty() && !self.sources.iter().any(|s| s == &event.source) {
            return false;
        }

        self.fields
            .iter()
            .all(|(path, expected)| field_at(event.detail(), path) == Some(expected))
    }
}

fn field_at<'a>(detail: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(detail, |current, segment| current.get(segment))
}
