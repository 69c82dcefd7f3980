//! Recipient phone normalization.

use crate::domain::error::SendError;

/// Fewest digits accepted after normalization
pub const MIN_DIGITS: usize = 10;
/// Most digits accepted after normalization
pub const MAX_DIGITS: usize = 15;

/// A phone number reduced to 10-15 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneDigits(String);

impl PhoneDigits {
    /// Strip every non-digit and check the length.
    pub fn normalize(raw: &str) -> Result<Self, SendError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if (MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            Ok(Self(digits))
        } else {
            Err(SendError::InvalidRecipient(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Network identifier, e.g. `51987654321@s.whatsapp.net`
    pub fn to_identifier(&self, domain: &str) -> String {
        format!("{}@{}", self.0, domain)
    }
}

impl std::fmt::Display for PhoneDigits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
