//! Shared fixtures for slipbot-channels integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use slipbot_channels::{ChannelError, ChannelResult, ConnectionState, MessageGateway};
use slipbot_common::DirectoryConfig;
use slipbot_directory::{AuthoritativeStore, DirectoryService, Employee, WorkbookStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        to: String,
        text: String,
    },
    Document {
        to: String,
        file_name: String,
        caption: Option<String>,
        bytes: Vec<u8>,
    },
}

/// Gateway that records sends instead of talking to a transport.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<Sent>>,
    pub fail_documents: AtomicBool,
    text_delay: Duration,
}

impl RecordingGateway {
    /// A gateway whose text sends take `delay` to complete.
    pub fn with_text_delay(delay: Duration) -> Self {
        Self {
            text_delay: delay,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                Sent::Document { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessageGateway for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    async fn send_text(&self, address: &str, text: &str) -> ChannelResult<()> {
        if !self.text_delay.is_zero() {
            tokio::time::sleep(self.text_delay).await;
        }
        self.sent.lock().unwrap().push(Sent::Text {
            to: address.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        address: &str,
        document: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> ChannelResult<()> {
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("upload rejected".into()));
        }
        self.sent.lock().unwrap().push(Sent::Document {
            to: address.to_string(),
            file_name: file_name.to_string(),
            caption: caption.map(str::to_string),
            bytes: document,
        });
        Ok(())
    }
}

/// An initialized directory on temp files.
///
/// E001 Asha: slip, no mobile. E002 Ravi: no slip, mobile.
/// E003 Meera: slip, mobile.
pub async fn seeded_directory() -> (TempDir, Arc<DirectoryService>) {
    let dir = TempDir::new().unwrap();
    let slip_dir = dir.path().join("salary-pdf");
    std::fs::create_dir_all(&slip_dir).unwrap();
    std::fs::write(slip_dir.join("E001_salaryslip.pdf"), b"%PDF-E001").unwrap();
    std::fs::write(slip_dir.join("E003_salaryslip.pdf"), b"%PDF-E003").unwrap();

    let config = DirectoryConfig {
        slip_dir,
        workbook_path: dir.path().join("employees.xlsx"),
        snapshot_path: dir.path().join("employees.json"),
        persist_debounce_ms: 60_000,
        ..DirectoryConfig::default()
    };

    WorkbookStore::new(&config.workbook_path)
        .write(&[
            Employee::new("E001").with_name("Asha"),
            Employee::new("E002").with_name("Ravi").with_mobile("9811111111"),
            Employee::new("E003").with_name("Meera").with_mobile("9825533053"),
        ])
        .unwrap();

    let directory = Arc::new(DirectoryService::from_config(&config).unwrap());
    directory.initialize().await.unwrap();

    (dir, directory)
}
