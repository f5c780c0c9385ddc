//! AssetCode and Principal - validated identifiers
//!
//! Asset codes are upper-cased alphanumeric tickers. Principals identify
//! callers (vault owners, liquidators, the operator) as opaque strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("Empty asset code")]
    EmptyCode,

    #[error("Asset code too long (max 10 chars): {0}")]
    TooLong(String),

    #[error("Invalid asset code format: {0}")]
    InvalidFormat(String),

    #[error("Empty principal")]
    EmptyPrincipal,
}

/// Ticker of a collateral asset, a stable unit, or the debt token.
///
/// # Examples
/// ```
/// use ballast_core::AssetCode;
///
/// let btc: AssetCode = " btc ".parse().unwrap();
/// assert_eq!(btc.as_str(), "BTC");
/// assert!("BT-C".parse::<AssetCode>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetCode(String);

impl AssetCode {
    /// Create without validation. The caller MUST pass a normalised code.
    pub fn new_unchecked(code: &str) -> Self {
        Self(code.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssetCode {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();

        if s.is_empty() {
            return Err(AssetError::EmptyCode);
        }

        if s.len() > 10 {
            return Err(AssetError::TooLong(s));
        }

        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AssetError::InvalidFormat(s));
        }

        Ok(AssetCode(s))
    }
}

impl TryFrom<String> for AssetCode {
    type Error = AssetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetCode> for String {
    fn from(code: AssetCode) -> Self {
        code.0
    }
}

/// Caller identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Result<Self, AssetError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(AssetError::EmptyPrincipal);
        }
        Ok(Self(id))
    }

    /// Create without validation. The caller MUST pass a non-blank id.
    pub fn new_unchecked(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Principal {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Principal {
    type Error = AssetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_code_normalised() {
        let code: AssetCode = "eth".parse().unwrap();
        assert_eq!(code.to_string(), "ETH");
    }

    #[test]
    fn test_asset_code_errors() {
        assert_eq!("".parse::<AssetCode>(), Err(AssetError::EmptyCode));
        assert!(matches!(
            "VERYLONGTOKEN".parse::<AssetCode>(),
            Err(AssetError::TooLong(_))
        ));
    }

    #[test]
    fn test_principal_rejects_blank() {
        assert!(Principal::new("   ").is_err());
        assert_eq!(Principal::new(" alice ").unwrap().as_str(), "alice");
    }

    #[test]
    fn test_serde_validates() {
        let parsed: Result<AssetCode, _> = serde_json::from_str("\"b c\"");
        assert!(parsed.is_err());
    }
}
