//! Configuration validation for slipbot services.

use thiserror::Error;

use crate::config::{
    Config, ConversationConfig, DirectoryConfig, ObservabilityConfig, PhoneConfig, WhatsAppConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let sections: [&dyn Validate; 5] = [
            &self.directory,
            &self.conversation,
            &self.phone,
            &self.whatsapp,
            &self.observability,
        ];
        for section in sections {
            if let Err(e) = section.validate() {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load configuration (with env overrides) and validate it.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate()?;
        Ok(config)
    }
}

impl Validate for DirectoryConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.persist_debounce_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "directory.persist_debounce_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        let pattern =
            regex::Regex::new(&self.slip_file_pattern).map_err(|e| ValidationError::InvalidValue {
                field: "directory.slip_file_pattern".into(),
                reason: e.to_string(),
            })?;
        if !pattern.capture_names().flatten().any(|name| name == "empid") {
            return Err(ValidationError::InvalidValue {
                field: "directory.slip_file_pattern".into(),
                reason: "must contain a named `empid` capture group".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ConversationConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.trigger_keyword.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "conversation.trigger_keyword".into(),
            });
        }
        if self.max_age_minutes == 0 {
            return Err(ValidationError::InvalidValue {
                field: "conversation.max_age_minutes".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for PhoneConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.default_country_code.is_empty()
            || !self.default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ValidationError::InvalidValue {
                field: "phone.default_country_code".into(),
                reason: "must be a non-empty digit string".into(),
            });
        }
        if self.min_digits == 0 || self.min_digits > self.max_digits {
            return Err(ValidationError::InvalidValue {
                field: "phone.min_digits".into(),
                reason: format!(
                    "must be between 1 and max_digits ({})",
                    self.max_digits
                ),
            });
        }
        Ok(())
    }
}

impl Validate for WhatsAppConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.access_token.is_empty() {
            return Err(ValidationError::MissingField {
                field: "whatsapp.access_token".into(),
            });
        }
        if self.phone_number_id.is_empty() {
            return Err(ValidationError::MissingField {
                field: "whatsapp.phone_number_id".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_slip_pattern_requires_empid_group() {
        let mut config = Config::default();
        config.directory.slip_file_pattern = r"^(\w+)\.pdf$".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("slip_file_pattern"));
    }

    #[test]
    fn test_blank_trigger_keyword() {
        let mut config = Config::default();
        config.conversation.trigger_keyword = "   ".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn test_whatsapp_enabled_without_token() {
        let mut config = Config::default();
        config.whatsapp.enabled = true;
        config.whatsapp.phone_number_id = "123".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.directory.persist_debounce_ms = 0;
        config.phone.min_digits = 20;
        assert!(matches!(config.validate(), Err(ValidationError::Multiple(errs)) if errs.len() == 2));
    }
}
