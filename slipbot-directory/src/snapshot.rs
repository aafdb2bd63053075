//! JSON snapshot file backing the live directory cache.
//!
//! The file is a JSON array of `{ "empid", "name", "mobileNo" }` objects.
//! Absent names and mobiles are written as `""` and read back as absent.

use crate::employee::{normalize_value, Employee};
use serde::{Deserialize, Serialize};
use slipbot_common::{Error, Result, ResultExt};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    empid: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "mobileNo", default)]
    mobile_no: Option<String>,
}

impl From<&Employee> for SnapshotRow {
    fn from(employee: &Employee) -> Self {
        Self {
            empid: employee.id.clone(),
            name: Some(employee.name.clone().unwrap_or_default()),
            mobile_no: Some(employee.mobile.clone().unwrap_or_default()),
        }
    }
}

impl SnapshotRow {
    fn into_employee(self) -> Option<Employee> {
        let id = normalize_value(&self.empid)?;
        Some(Employee {
            id,
            name: self.name.as_deref().and_then(normalize_value),
            mobile: self.mobile_no.as_deref().and_then(normalize_value),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all rows, creating the file as `[]` when it does not exist.
    pub async fn load(&self) -> Result<Vec<Employee>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            self.ensure_parent().await?;
            tokio::fs::write(&self.path, "[]")
                .await
                .context(format!("creating snapshot {}", self.path.display()))?;
            tracing::info!(path = %self.path.display(), "local employee store initialized");
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .context(format!("reading snapshot {}", self.path.display()))?;

        let raw = if raw.trim().is_empty() { "[]" } else { raw.as_str() };
        let rows: Vec<SnapshotRow> = serde_json::from_str(raw)
            .map_err(|e| Error::Storage(format!("corrupt snapshot {}: {e}", self.path.display())))?;

        let total = rows.len();
        let employees: Vec<Employee> = rows
            .into_iter()
            .filter_map(SnapshotRow::into_employee)
            .collect();

        if employees.len() != total {
            tracing::warn!(
                skipped = total - employees.len(),
                "skipping snapshot rows without empid"
            );
        }

        Ok(employees)
    }

    /// Write all rows. The file is replaced atomically via a sibling temp file.
    pub async fn write(&self, employees: &[Employee]) -> Result<()> {
        let rows: Vec<SnapshotRow> = employees.iter().map(SnapshotRow::from).collect();
        let json = serde_json::to_string_pretty(&rows)?;

        self.ensure_parent().await?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .context(format!("writing snapshot {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context(format!("replacing snapshot {}", self.path.display()))?;

        Ok(())
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .context(format!("creating directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_created_empty() {
        let dir = TempDir::new().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("data").join("employees.json"));

        assert!(snapshot.load().await.unwrap().is_empty());
        let raw = std::fs::read_to_string(snapshot.path()).unwrap();
        assert_eq!(raw, "[]");
    }

    #[tokio::test]
    async fn test_absent_fields_written_as_empty_strings() {
        let dir = TempDir::new().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("employees.json"));

        let employees = vec![
            Employee::new("E001").with_name("Asha").with_mobile("9825533053"),
            Employee::new("E002"),
        ];
        snapshot.write(&employees).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(snapshot.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!([
                { "empid": "E001", "name": "Asha", "mobileNo": "9825533053" },
                { "empid": "E002", "name": "", "mobileNo": "" }
            ])
        );

        assert_eq!(snapshot.load().await.unwrap(), employees);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("employees.json");
        std::fs::write(&path, "{ nope").unwrap();

        let err = SnapshotFile::new(path).load().await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_rows_without_id_are_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("employees.json");
        std::fs::write(&path, r#"[{"empid":"  ","name":"x"},{"empid":"E5"}]"#).unwrap();

        let employees = SnapshotFile::new(path).load().await.unwrap();
        assert_eq!(employees, vec![Employee::new("E5")]);
    }
}
