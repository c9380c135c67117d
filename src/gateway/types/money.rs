//! Amount input type for API boundary enforcement

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

/// Strict format Decimal - validates format during deserialization
///
/// - Rejects `.5` (must be `0.5`)
/// - Rejects `5.` (must be `5.0` or `5`)
/// - Rejects negative numbers, empty strings and scientific notation
///
/// Zero passes here; whether zero is allowed is a business rule decided by
/// the transaction service.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictDecimal(Decimal);

impl StrictDecimal {
    pub fn inner(self) -> Decimal {
        self.0
    }

    #[cfg(test)]
    pub fn from_decimal(d: Decimal) -> Self {
        Self(d)
    }
}

impl std::ops::Deref for StrictDecimal {
    type Target = Decimal;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StrictDecimal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        // JSON numbers lose precision before we see them
        let s = String::deserialize(deserializer)?;

        if s.is_empty() {
            return Err(D::Error::custom("Amount cannot be empty"));
        }
        if s.starts_with('.') {
            return Err(D::Error::custom("Invalid format: use 0.5 not .5"));
        }
        if s.ends_with('.') {
            return Err(D::Error::custom("Invalid format: use 5.0 not 5."));
        }
        if s.contains('e') || s.contains('E') {
            return Err(D::Error::custom(
                "Invalid format: scientific notation not allowed",
            ));
        }
        if s.starts_with('+') {
            return Err(D::Error::custom("Invalid format: + prefix not allowed"));
        }

        let d = Decimal::from_str(&s)
            .map_err(|e| D::Error::custom(format!("Invalid decimal: {}", e)))?;

        if d.is_sign_negative() {
            return Err(D::Error::custom("Amount cannot be negative"));
        }

        Ok(StrictDecimal(d))
    }
}

impl Serialize for StrictDecimal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}
