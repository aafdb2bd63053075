//! Directory service: bootstrap, lookups, mobile updates and reconciliation
//! with the authoritative workbook.

use crate::cache::DirectoryCache;
use crate::employee::{normalize_value, Employee};
use crate::slips::{SlipFilePattern, SlipIndex, SlipRecord};
use crate::snapshot::SnapshotFile;
use crate::workbook::{AuthoritativeStore, WorkbookStore};
use serde::Serialize;
use slipbot_common::{DirectoryConfig, Error, PhoneMatcher, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// An employee together with its slip, if one is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRecord {
    pub employee: Employee,
    pub salary_slip: Option<SlipRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeListing {
    pub employee: Employee,
    pub salary_slip_available: bool,
}

/// Result of a mobile update.
pub type MobileUpdate = EmployeeListing;

/// Slip bytes loaded for delivery.
#[derive(Debug, Clone)]
pub struct SlipContent {
    pub employee: Employee,
    pub slip: SlipRecord,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub count: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub imported: usize,
}

pub struct DirectoryService {
    cache: DirectoryCache,
    slips: SlipIndex,
    authoritative: Arc<dyn AuthoritativeStore>,
    /// Serializes export and reload against each other
    reconcile: Mutex<()>,
    initialized: AtomicBool,
}

impl DirectoryService {
    pub fn new(
        cache: DirectoryCache,
        slips: SlipIndex,
        authoritative: Arc<dyn AuthoritativeStore>,
    ) -> Self {
        Self {
            cache,
            slips,
            authoritative,
            reconcile: Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Wire the snapshot, slip directory and workbook named in `config`.
    pub fn from_config(config: &DirectoryConfig) -> Result<Self> {
        let pattern = SlipFilePattern::new(&config.slip_file_pattern)?;

        Ok(Self::new(
            DirectoryCache::new(
                SnapshotFile::new(&config.snapshot_path),
                config.persist_debounce(),
            ),
            SlipIndex::new(&config.slip_dir, pattern),
            Arc::new(WorkbookStore::new(&config.workbook_path)),
        ))
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    pub fn slips(&self) -> &SlipIndex {
        &self.slips
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Load the snapshot, hydrate from the workbook when the snapshot is empty,
    /// and index the slip directory. Calling it again is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let _guard = self.reconcile.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        self.cache.load_snapshot().await?;

        if self.cache.is_empty().await {
            self.bootstrap_import().await;
        }

        self.slips.reload().await?;

        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            employees = self.cache.len().await,
            salary_slips = self.slips.len().await,
            "directory initialized"
        );
        Ok(())
    }

    /// One-time import into an empty cache. Never fatal.
    async fn bootstrap_import(&self) {
        let location = self.authoritative.location().display().to_string();

        match self.read_authoritative().await {
            Ok(Some(rows)) if !rows.is_empty() => {
                let imported = self.cache.replace_all(rows).await;
                tracing::info!(imported, path = %location, "imported employees from workbook");
            }
            Ok(Some(_)) => {
                tracing::info!(path = %location, "workbook has no employee rows; starting empty");
            }
            Ok(None) => {
                tracing::warn!(path = %location, "workbook not found; starting with an empty directory");
            }
            Err(e) => {
                tracing::error!(error = %e, path = %location, "failed to import workbook; starting with an empty directory");
            }
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::Internal(
                "directory not initialized; call initialize() first".into(),
            ))
        }
    }

    pub async fn get_employee(&self, id: &str) -> Result<EmployeeRecord> {
        self.ensure_initialized()?;

        let employee = self
            .cache
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Employee {id} not found")))?;
        let salary_slip = self.slips.lookup(id).await;

        Ok(EmployeeRecord {
            employee,
            salary_slip,
        })
    }

    /// Every employee in cache insertion order.
    pub async fn list_employees(&self) -> Result<Vec<EmployeeListing>> {
        self.ensure_initialized()?;

        let slips = self.slips.snapshot().await;
        Ok(self
            .cache
            .list()
            .await
            .into_iter()
            .map(|employee| EmployeeListing {
                salary_slip_available: slips.contains_key(&employee.id),
                employee,
            })
            .collect())
    }

    /// First employee, in listing order, whose stored mobile matches `contact`.
    pub async fn find_by_contact(&self, contact: &str) -> Result<Option<EmployeeListing>> {
        Ok(self.list_employees().await?.into_iter().find(|listing| {
            listing
                .employee
                .mobile
                .as_deref()
                .is_some_and(|mobile| PhoneMatcher::matches(mobile, contact))
        }))
    }

    /// Set or clear the mobile of `id`, creating the employee if needed.
    ///
    /// Only the snapshot is touched (debounced); the workbook is written on
    /// export.
    pub async fn update_mobile(&self, id: &str, mobile: Option<&str>) -> Result<MobileUpdate> {
        self.ensure_initialized()?;

        let id = normalize_value(id)
            .ok_or_else(|| Error::Validation("employee id is required".into()))?;

        let mobile = match mobile.and_then(normalize_value) {
            None => None,
            Some(raw) => {
                let digits = PhoneMatcher::normalize(&raw);
                if digits.is_empty() {
                    return Err(Error::Validation(format!(
                        "mobile number {raw:?} contains no digits"
                    )));
                }
                Some(digits)
            }
        };

        let employee = self.cache.upsert_mobile(&id, mobile).await;
        let salary_slip_available = self.slips.lookup(&id).await.is_some();

        tracing::info!(
            employee_id = %id,
            registered = employee.mobile.is_some(),
            "employee mobile updated"
        );

        Ok(MobileUpdate {
            employee,
            salary_slip_available,
        })
    }

    /// Load the slip bytes of `id`.
    pub async fn read_slip(&self, id: &str) -> Result<SlipContent> {
        let record = self.get_employee(id).await?;
        let slip = record
            .salary_slip
            .ok_or_else(|| Error::NotFound(format!("Salary slip for {id} not found")))?;

        let bytes = tokio::fs::read(&slip.absolute_path).await.map_err(|e| {
            Error::Storage(format!(
                "reading salary slip {}: {e}",
                slip.absolute_path.display()
            ))
        })?;

        Ok(SlipContent {
            employee: record.employee,
            slip,
            bytes,
        })
    }

    /// Overwrite the workbook with the cache, sorted by id.
    pub async fn export_to_authoritative(&self) -> Result<ExportSummary> {
        self.ensure_initialized()?;
        let _guard = self.reconcile.lock().await;

        let rows = self.cache.sorted().await;
        let count = rows.len();

        let store = Arc::clone(&self.authoritative);
        tokio::task::spawn_blocking(move || store.write(&rows))
            .await
            .map_err(|e| Error::Internal(format!("workbook export task failed: {e}")))??;

        let path = self.authoritative.location().to_path_buf();
        tracing::info!(count, path = %path.display(), "employees exported to workbook");
        Ok(ExportSummary { count, path })
    }

    /// Replace the whole cache with the workbook contents.
    ///
    /// Cache-only edits that were never exported are discarded. A missing
    /// workbook is a storage error and leaves the cache as it was.
    pub async fn reload_from_authoritative(&self) -> Result<ReloadSummary> {
        self.ensure_initialized()?;
        let _guard = self.reconcile.lock().await;

        let rows = self.read_authoritative().await?.ok_or_else(|| {
            Error::Storage(format!(
                "Employee workbook not found at {}",
                self.authoritative.location().display()
            ))
        })?;

        let imported = self.cache.replace_all(rows).await;
        tracing::info!(imported, "employees reloaded from workbook");
        Ok(ReloadSummary { imported })
    }

    /// Rebuild the slip index from disk.
    pub async fn reload_slips(&self) -> Result<usize> {
        self.slips.reload().await
    }

    /// Write any pending snapshot change. Run before the process exits.
    pub async fn shutdown(&self) -> Result<()> {
        if self.cache.flush().await? {
            tracing::info!("pending directory changes flushed");
        }
        Ok(())
    }

    async fn read_authoritative(&self) -> Result<Option<Vec<Employee>>> {
        let store = Arc::clone(&self.authoritative);
        tokio::task::spawn_blocking(move || store.read())
            .await
            .map_err(|e| Error::Internal(format!("workbook read task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn service_in(dir: &TempDir) -> DirectoryService {
        let slip_dir = dir.path().join("slips");
        std::fs::create_dir_all(&slip_dir).unwrap();
        std::fs::write(slip_dir.join("E001_salaryslip.pdf"), b"%PDF-E001").unwrap();

        let service = DirectoryService::new(
            DirectoryCache::new(
                SnapshotFile::new(dir.path().join("employees.json")),
                Duration::from_secs(60),
            ),
            SlipIndex::new(&slip_dir, SlipFilePattern::default()),
            Arc::new(WorkbookStore::new(dir.path().join("employees.xlsx"))),
        );
        service.initialize().await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let dir = TempDir::new().unwrap();
        let service = DirectoryService::new(
            DirectoryCache::new(
                SnapshotFile::new(dir.path().join("e.json")),
                Duration::from_millis(500),
            ),
            SlipIndex::new(dir.path(), SlipFilePattern::default()),
            Arc::new(WorkbookStore::new(dir.path().join("e.xlsx"))),
        );
        let err = service.get_employee("E001").await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_update_mobile_validation() {
        let dir = TempDir::new().unwrap();
        let service = service_in(&dir).await;

        assert!(matches!(
            service.update_mobile("   ", Some("9825533053")).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.update_mobile("E001", Some("n/a")).await,
            Err(Error::Validation(_))
        ));

        let update = service
            .update_mobile(" E001 ", Some("+91 98255-33053"))
            .await
            .unwrap();
        assert_eq!(update.employee.id, "E001");
        assert_eq!(update.employee.mobile.as_deref(), Some("919825533053"));
        assert!(update.salary_slip_available);

        let cleared = service.update_mobile("E001", Some("  ")).await.unwrap();
        assert!(cleared.employee.mobile.is_none());
    }

    #[tokio::test]
    async fn test_get_employee_and_read_slip() {
        let dir = TempDir::new().unwrap();
        let service = service_in(&dir).await;
        service.update_mobile("E001", None).await.unwrap();
        service.update_mobile("E002", None).await.unwrap();

        let record = service.get_employee("E001").await.unwrap();
        assert_eq!(record.salary_slip.unwrap().file_name, "E001_salaryslip.pdf");

        let content = service.read_slip("E001").await.unwrap();
        assert_eq!(content.bytes, b"%PDF-E001");

        assert!(service.read_slip("E002").await.unwrap_err().is_not_found());
        assert!(service.get_employee("E404").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_find_by_contact_tolerates_country_code() {
        let dir = TempDir::new().unwrap();
        let service = service_in(&dir).await;
        service.update_mobile("E001", Some("9825533053")).await.unwrap();
        service.update_mobile("E002", None).await.unwrap();

        let found = service.find_by_contact("919825533053").await.unwrap().unwrap();
        assert_eq!(found.employee.id, "E001");
        assert!(found.salary_slip_available);

        assert!(service.find_by_contact("917000000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reload_with_missing_workbook_keeps_cache() {
        let dir = TempDir::new().unwrap();
        let service = service_in(&dir).await;
        service.update_mobile("E001", Some("9825533053")).await.unwrap();

        let err = service.reload_from_authoritative().await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(service.cache().len().await, 1);
    }
}
