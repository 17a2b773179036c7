//! Bookmark records carried inside event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved bookmark as produced by the link store.
///
/// Only `id` and `url` are required; the remaining fields are passed through
/// untouched so views can render whatever the store provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    #[serde(alias = "_id")]
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LinkRecord {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: None,
            description: None,
            favicon: None,
            deleted: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set both timestamps from epoch milliseconds.
    pub fn touched_at(mut self, millis: i64) -> Self {
        let at = DateTime::from_timestamp_millis(millis);
        if self.created_at.is_none() {
            self.created_at = at;
        }
        self.updated_at = at;
        self
    }

    /// Record update time in epoch milliseconds, if the store supplied one.
    pub fn updated_at_ms(&self) -> Option<i64> {
        self.updated_at
            .or(self.created_at)
            .map(|t| t.timestamp_millis())
    }

    /// Human readable label used in deletion notices.
    pub fn label(&self) -> String {
        self.title.clone().unwrap_or_else(|| "Link".to_string())
    }
}

/// Identifier and label of a removed bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedLink {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "title", default = "default_label")]
    pub label: String,
}

fn default_label() -> String {
    "Link".to_string()
}

impl DeletedLink {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

impl From<&LinkRecord> for DeletedLink {
    fn from(record: &LinkRecord) -> Self {
        Self {
            id: record.id.clone(),
            label: record.label(),
        }
    }
}
