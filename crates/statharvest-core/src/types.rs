//! Shared types used across statharvest.

use crate::error::HarvestError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Maximum length of an institution code, matching the index column width.
pub const MAX_INSTITUTION_LEN: usize = 100;

/// Newtype for institution identifiers with validation.
///
/// Codes are 1-100 characters of ASCII letters, digits, `_` or `-`
/// (e.g. `NSI`, `BNB`). The code doubles as a storage directory name, so
/// anything that could escape a path is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstitutionCode(String);

impl InstitutionCode {
    /// Create a new `InstitutionCode` from a string.
    ///
    /// # Errors
    /// Returns error if the code is empty, too long or contains invalid characters.
    pub fn new(code: impl Into<String>) -> Result<Self, HarvestError> {
        let code = code.into();
        Self::validate(&code)?;
        Ok(Self(code))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(code: &str) -> Result<(), HarvestError> {
        static CODE_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex =
            CODE_REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

        if code.is_empty() || code.len() > MAX_INSTITUTION_LEN {
            return Err(HarvestError::InvalidInstitution {
                code: code.to_string(),
                reason: format!(
                    "must be 1-{MAX_INSTITUTION_LEN} characters, got {}",
                    code.len()
                ),
            });
        }

        if regex.is_match(code) {
            Ok(())
        } else {
            Err(HarvestError::InvalidInstitution {
                code: code.to_string(),
                reason: "only letters, digits, '_' and '-' are allowed".to_string(),
            })
        }
    }
}

impl fmt::Display for InstitutionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for InstitutionCode {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InstitutionCode> for String {
    fn from(code: InstitutionCode) -> Self {
        code.0
    }
}

impl AsRef<str> for InstitutionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
