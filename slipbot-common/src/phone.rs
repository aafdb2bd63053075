//! Phone number normalization and matching.
//!
//! Stored mobiles and transport contact addresses rarely agree on the country
//! code: HR sheets hold `9825533053`, the transport reports `919825533053`.
//! [`PhoneMatcher::matches`] therefore accepts a suffix match in either
//! direction. This is a heuristic, not equality: a short stored value such as
//! `123` also matches `4567123`. It is kept as-is for compatibility with
//! existing directory data.

use crate::config::PhoneConfig;
use crate::error::{Error, Result};

/// Digit count of a national number without country code.
const NATIONAL_NUMBER_DIGITS: usize = 10;

#[derive(Debug, Clone)]
pub struct PhoneMatcher {
    default_country_code: String,
    min_digits: usize,
    max_digits: usize,
}

impl Default for PhoneMatcher {
    fn default() -> Self {
        Self::new(&PhoneConfig::default())
    }
}

impl PhoneMatcher {
    pub fn new(config: &PhoneConfig) -> Self {
        Self {
            default_country_code: config.default_country_code.clone(),
            min_digits: config.min_digits,
            max_digits: config.max_digits,
        }
    }

    /// Strip every non-digit character.
    pub fn normalize(raw: &str) -> String {
        raw.chars().filter(char::is_ascii_digit).collect()
    }

    /// Form a transport address from a phone number.
    ///
    /// A bare 10-digit number that does not already start with the default
    /// country code gets it prepended; anything else is used as-is.
    pub fn to_address(&self, raw: &str) -> String {
        let digits = Self::normalize(raw);
        if digits.len() == NATIONAL_NUMBER_DIGITS && !digits.starts_with(&self.default_country_code)
        {
            format!("{}{}", self.default_country_code, digits)
        } else {
            digits
        }
    }

    /// Whether a stored mobile refers to the same line as a contact address.
    ///
    /// Both sides are reduced to bare digits; either being a suffix of the
    /// other is a match. Empty numbers never match.
    pub fn matches(stored_mobile: &str, contact_address: &str) -> bool {
        let stored = Self::normalize(stored_mobile);
        let contact = Self::normalize(contact_address);

        if stored.is_empty() || contact.is_empty() {
            return false;
        }

        stored == contact || stored.ends_with(&contact) || contact.ends_with(&stored)
    }

    /// Validate a mobile supplied through the admin API and return its digits.
    pub fn validate_mobile(&self, raw: &str) -> Result<String> {
        let digits = Self::normalize(raw);

        if digits.is_empty() {
            return Err(Error::Validation("mobile number is required".into()));
        }

        if digits.len() < self.min_digits || digits.len() > self.max_digits {
            return Err(Error::Validation(format!(
                "mobile number must be {}-{} digits",
                self.min_digits, self.max_digits
            )));
        }

        Ok(digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation() {
        assert_eq!(PhoneMatcher::normalize("+91 98255-33053"), "919825533053");
        assert_eq!(PhoneMatcher::normalize("919825533053@s.whatsapp.net"), "919825533053");
        assert_eq!(PhoneMatcher::normalize("n/a"), "");
    }

    #[test]
    fn test_to_address_prepends_country_code() {
        let matcher = PhoneMatcher::default();
        assert_eq!(matcher.to_address("98255 33053"), "919825533053");
        assert_eq!(matcher.to_address("+919825533053"), "919825533053");
        // Already carries the prefix
        assert_eq!(matcher.to_address("9112345678"), "9112345678");
        // Not a national number
        assert_eq!(matcher.to_address("14155550123"), "14155550123");
    }

    #[test]
    fn test_matches_exact_and_country_code_variants() {
        let stored = ["9825533053", "919825533053", "+91 98255 33053"];
        for mobile in stored {
            assert!(PhoneMatcher::matches(mobile, "919825533053"), "{mobile}");
            assert!(PhoneMatcher::matches(mobile, "9825533053"), "{mobile}");
            assert!(PhoneMatcher::matches(mobile, "+919825533053"), "{mobile}");
        }
    }

    #[test]
    fn test_matches_rejects_other_numbers() {
        assert!(!PhoneMatcher::matches("9825533053", "919825533054"));
        assert!(!PhoneMatcher::matches("", "919825533053"));
        assert!(!PhoneMatcher::matches("9825533053", "status@broadcast"));
    }

    #[test]
    fn test_short_number_suffix_false_positive_is_kept() {
        assert!(PhoneMatcher::matches("123", "4567123"));
    }

    #[test]
    fn test_validate_mobile_bounds() {
        let matcher = PhoneMatcher::default();
        assert_eq!(matcher.validate_mobile("98255-33053").unwrap(), "9825533053");
        assert!(matcher.validate_mobile("abc").is_err());
        assert!(matcher.validate_mobile("1234567").is_err());
        assert!(matcher.validate_mobile("1234567890123456").is_err());
    }
}
