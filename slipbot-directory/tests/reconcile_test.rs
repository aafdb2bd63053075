//! Integration tests for directory bootstrap and workbook reconciliation.

use slipbot_common::{DirectoryConfig, Error};
use slipbot_directory::{AuthoritativeStore, DirectoryService, Employee, WorkbookStore};
use std::path::Path;
use tempfile::TempDir;

fn config_in(root: &Path) -> DirectoryConfig {
    let slip_dir = root.join("salary-pdf");
    std::fs::create_dir_all(&slip_dir).unwrap();
    std::fs::write(slip_dir.join("E001_salaryslip.pdf"), b"%PDF-1.4 E001").unwrap();

    DirectoryConfig {
        slip_dir,
        workbook_path: root.join("employees.xlsx"),
        snapshot_path: root.join("data").join("employees.json"),
        persist_debounce_ms: 20,
        ..DirectoryConfig::default()
    }
}

fn seed_workbook(config: &DirectoryConfig, employees: &[Employee]) {
    WorkbookStore::new(&config.workbook_path)
        .write(employees)
        .unwrap();
}

async fn start(config: &DirectoryConfig) -> DirectoryService {
    let service = DirectoryService::from_config(config).unwrap();
    service.initialize().await.unwrap();
    service
}

fn ids(employees: &[Employee]) -> Vec<&str> {
    employees.iter().map(|e| e.id.as_str()).collect()
}

#[tokio::test]
async fn bootstrap_imports_workbook_into_empty_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    seed_workbook(
        &config,
        &[
            Employee::new("E001").with_name("Asha").with_mobile("9825533053"),
            Employee::new("E002").with_name("Ravi"),
        ],
    );

    let service = start(&config).await;
    let listing = service.list_employees().await.unwrap();
    assert_eq!(listing.len(), 2);
    assert!(listing[0].salary_slip_available);
    assert!(!listing[1].salary_slip_available);

    // The import is persisted to the snapshot
    service.shutdown().await.unwrap();
    let raw = std::fs::read_to_string(&config.snapshot_path).unwrap();
    assert!(raw.contains("\"E002\""));
}

#[tokio::test]
async fn bootstrap_is_skipped_when_snapshot_has_rows() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(config.snapshot_path.parent().unwrap()).unwrap();
    std::fs::write(
        &config.snapshot_path,
        r#"[{"empid":"STRAY","name":"","mobileNo":""}]"#,
    )
    .unwrap();
    seed_workbook(&config, &[Employee::new("E001"), Employee::new("E002")]);

    let service = start(&config).await;
    let employees = service.cache().list().await;
    assert_eq!(ids(&employees), vec!["STRAY"]);
}

#[tokio::test]
async fn missing_workbook_starts_empty() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());

    let service = start(&config).await;
    assert!(service.list_employees().await.unwrap().is_empty());
    assert!(config.snapshot_path.exists());
}

#[tokio::test]
async fn missing_slip_directory_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.slip_dir = dir.path().join("nowhere");

    let service = DirectoryService::from_config(&config).unwrap();
    let err = service.initialize().await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(!service.is_initialized());
}

#[tokio::test]
async fn export_writes_rows_sorted_by_id() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let service = start(&config).await;

    service.update_mobile("B", Some("9825533053")).await.unwrap();
    service.update_mobile("A", None).await.unwrap();
    assert_eq!(ids(&service.cache().list().await), vec!["B", "A"]);

    let summary = service.export_to_authoritative().await.unwrap();
    assert_eq!(summary.count, 2);
    assert_eq!(summary.path, config.workbook_path);

    let written = WorkbookStore::new(&config.workbook_path)
        .read()
        .unwrap()
        .unwrap();
    assert_eq!(ids(&written), vec!["A", "B"]);
}

#[tokio::test]
async fn export_then_reload_round_trips() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    seed_workbook(
        &config,
        &[
            Employee::new("E001").with_name("Asha"),
            Employee::new("E002").with_name("Ravi & Co"),
            Employee::new("E003"),
        ],
    );
    let service = start(&config).await;
    service.update_mobile("E003", Some("919825533053")).await.unwrap();

    let before = service.cache().sorted().await;
    service.export_to_authoritative().await.unwrap();
    let summary = service.reload_from_authoritative().await.unwrap();

    assert_eq!(summary.imported, 3);
    assert_eq!(service.cache().sorted().await, before);
}

#[tokio::test]
async fn reload_discards_unexported_edits() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    seed_workbook(&config, &[Employee::new("E001").with_name("Asha")]);
    let service = start(&config).await;

    service.update_mobile("E001", Some("9825533053")).await.unwrap();
    service.update_mobile("NEW", Some("9000000000")).await.unwrap();

    service.reload_from_authoritative().await.unwrap();

    let employee = service.get_employee("E001").await.unwrap().employee;
    assert!(employee.mobile.is_none());
    assert!(service.get_employee("NEW").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn update_mobile_upserts_and_keeps_name() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    seed_workbook(&config, &[Employee::new("E001").with_name("Asha")]);
    let service = start(&config).await;

    let known = service.update_mobile("E001", Some("9825533053")).await.unwrap();
    assert_eq!(known.employee.name.as_deref(), Some("Asha"));
    assert!(known.salary_slip_available);

    let created = service.update_mobile("E777", Some("9812345678")).await.unwrap();
    assert!(created.employee.name.is_none());
    assert_eq!(created.employee.mobile.as_deref(), Some("9812345678"));
    assert!(!created.salary_slip_available);
}

#[tokio::test]
async fn updates_survive_restart_after_shutdown_flush() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.persist_debounce_ms = 60_000;

    let service = start(&config).await;
    service.update_mobile("E001", Some("9825533053")).await.unwrap();
    assert!(service.cache().has_pending_persist().await);
    service.shutdown().await.unwrap();
    drop(service);

    let restarted = start(&config).await;
    let employee = restarted.get_employee("E001").await.unwrap().employee;
    assert_eq!(employee.mobile.as_deref(), Some("9825533053"));
}

#[tokio::test]
async fn reload_slips_picks_up_new_files() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let service = start(&config).await;
    service.update_mobile("E002", None).await.unwrap();
    assert!(service.get_employee("E002").await.unwrap().salary_slip.is_none());

    std::fs::write(config.slip_dir.join("E002_SalarySlip.pdf"), b"%PDF").unwrap();
    assert_eq!(service.reload_slips().await.unwrap(), 2);
    assert!(service.get_employee("E002").await.unwrap().salary_slip.is_some());
}
