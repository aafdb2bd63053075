//! Slipbot Common - Shared types and utilities for the slipbot services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Phone number normalization and matching

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod phone;
pub mod validation;

pub use config::{
    Config, ConversationConfig, DirectoryConfig, ObservabilityConfig, PhoneConfig, WhatsAppConfig,
};
pub use error::{Error, Result, ResultExt};
pub use phone::PhoneMatcher;
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::phone::PhoneMatcher;
    pub use crate::validation::{Validate, ValidationError};
}
