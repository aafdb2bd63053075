//! Employee records as held by the directory.

use serde::{Deserialize, Serialize};

/// A directory entry. `id` is the primary key and never changes once created;
/// an employee without a mobile is valid and simply unregistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(rename = "empid")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "mobileNo", default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

impl Employee {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            mobile: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = normalize_value(&name.into());
        self
    }

    pub fn with_mobile(mut self, mobile: impl Into<String>) -> Self {
        self.mobile = normalize_value(&mobile.into());
        self
    }

    /// Name for greetings, falling back to the given default.
    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(fallback)
    }
}

/// Trim a raw cell value; blank values are absent.
pub fn normalize_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
