//! Slip document index.
//!
//! The slip directory is scanned once at startup (and on explicit reload) and
//! turned into an employee id → file lookup. There is no filesystem watching.

use regex::Regex;
use serde::Serialize;
use slipbot_common::config::DEFAULT_SLIP_FILE_PATTERN;
use slipbot_common::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A slip document found on disk for one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlipRecord {
    pub employee_id: String,
    pub file_name: String,
    pub absolute_path: PathBuf,
}

/// Outcome of parsing a directory entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlipFileName {
    /// The file is the slip of this employee id
    Employee(String),
    Unmatched,
}

/// Extracts employee ids from slip filenames.
#[derive(Debug, Clone)]
pub struct SlipFilePattern {
    regex: Regex,
}

impl Default for SlipFilePattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_SLIP_FILE_PATTERN).expect("default slip pattern is valid"),
        }
    }
}

impl SlipFilePattern {
    /// Compile a pattern. It must define a named `empid` capture group.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid slip file pattern: {e}")))?;

        if !regex.capture_names().flatten().any(|name| name == "empid") {
            return Err(Error::Config(
                "slip file pattern must contain a named `empid` group".into(),
            ));
        }

        Ok(Self { regex })
    }

    pub fn parse(&self, file_name: &str) -> SlipFileName {
        self.regex
            .captures(file_name)
            .and_then(|caps| caps.name("empid"))
            .map(|m| m.as_str())
            .filter(|id| !id.is_empty())
            .map_or(SlipFileName::Unmatched, |id| {
                SlipFileName::Employee(id.to_string())
            })
    }
}

/// Scan `directory` and build the id → slip map.
///
/// Only regular files are considered. Names the pattern does not match are
/// skipped with a warning. When two files map to the same id the one scanned
/// later wins.
pub async fn scan_directory(
    directory: &Path,
    pattern: &SlipFilePattern,
) -> Result<HashMap<String, SlipRecord>> {
    let mut entries = tokio::fs::read_dir(directory).await.map_err(|e| {
        Error::Storage(format!(
            "slip directory not readable at {}: {e}",
            directory.display()
        ))
    })?;

    let mut index = HashMap::new();

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();

        match pattern.parse(&file_name) {
            SlipFileName::Employee(employee_id) => {
                let record = SlipRecord {
                    employee_id: employee_id.clone(),
                    file_name,
                    absolute_path: entry.path(),
                };
                if let Some(previous) = index.insert(employee_id, record) {
                    tracing::warn!(
                        employee_id = %previous.employee_id,
                        replaced = %previous.file_name,
                        "duplicate salary slip for employee; keeping the later file"
                    );
                }
            }
            SlipFileName::Unmatched => {
                tracing::warn!(file = %file_name, "skipping non-matching salary slip file");
            }
        }
    }

    Ok(index)
}

/// Read-mostly slip lookup, rebuilt wholesale on reload.
pub struct SlipIndex {
    directory: PathBuf,
    pattern: SlipFilePattern,
    entries: RwLock<Arc<HashMap<String, SlipRecord>>>,
}

impl SlipIndex {
    pub fn new(directory: impl Into<PathBuf>, pattern: SlipFilePattern) -> Self {
        Self {
            directory: directory.into(),
            pattern,
            entries: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Rescan the directory and publish the new map.
    ///
    /// A missing directory is a storage error and leaves the current map in
    /// place.
    pub async fn reload(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.directory).await.unwrap_or(false) {
            return Err(Error::Storage(format!(
                "Salary slip directory not found at {}",
                self.directory.display()
            )));
        }

        let index = scan_directory(&self.directory, &self.pattern).await?;
        let total = index.len();

        *self.entries.write().await = Arc::new(index);

        tracing::info!(total_salary_slips = total, "salary slip index loaded");
        Ok(total)
    }

    pub async fn lookup(&self, employee_id: &str) -> Option<SlipRecord> {
        self.entries.read().await.get(employee_id).cloned()
    }

    /// Current map; lookups against it never block a concurrent reload.
    pub async fn snapshot(&self) -> Arc<HashMap<String, SlipRecord>> {
        Arc::clone(&*self.entries.read().await)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
