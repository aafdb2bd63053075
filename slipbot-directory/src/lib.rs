//! Slipbot Directory - Employee directory and salary slip index.
//!
//! This crate provides:
//! - The in-memory employee cache backed by a JSON snapshot
//! - The salary slip index built from a document directory
//! - Reconciliation with the authoritative xlsx workbook
//!
//! ## Persistence
//!
//! ```text
//!                  bootstrap import / reload
//! employees.xlsx ─────────────────────────────→ DirectoryCache ──debounce──→ employees.json
//!        ↑                                            │
//!        └────────────── export (sorted) ─────────────┘
//! ```
//!
//! Live traffic only ever reads and writes the cache.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod cache;
pub mod employee;
pub mod service;
pub mod slips;
pub mod snapshot;
pub mod workbook;

// Re-export commonly used types
pub use cache::DirectoryCache;
pub use employee::Employee;
pub use service::{
    DirectoryService, EmployeeListing, EmployeeRecord, ExportSummary, MobileUpdate, ReloadSummary,
    SlipContent,
};
pub use slips::{SlipFileName, SlipFilePattern, SlipIndex, SlipRecord};
pub use snapshot::SnapshotFile;
pub use workbook::{AuthoritativeStore, WorkbookStore};
