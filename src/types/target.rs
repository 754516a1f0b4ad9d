// ABOUTME: DNS-compatible target name validation for deployment targets.
// ABOUTME: Ensures target domains follow RFC 1123 hostname requirements.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TargetNameError {
    #[error("target name cannot be empty")]
    Empty,

    #[error("target name exceeds maximum length of 253 characters")]
    TooLong,

    #[error("target name contains an empty label")]
    EmptyLabel,

    #[error("label '{0}' exceeds maximum length of 63 characters")]
    LabelTooLong(String),

    #[error("label '{0}' cannot start or end with a hyphen")]
    HyphenAtLabelEdge(String),

    #[error("target name must be lowercase")]
    NotLowercase,

    #[error("invalid character in target name: '{0}'")]
    InvalidChar(char),
}

/// A deployment target: one domain/service unit within a deployment.
///
/// Target names are validated as lowercase RFC 1123 hostnames so they can be
/// used directly as DNS names, store keys, and log fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetName(String);

impl TargetName {
    pub fn new(value: &str) -> Result<Self, TargetNameError> {
        if value.is_empty() {
            return Err(TargetNameError::Empty);
        }

        if value.len() > 253 {
            return Err(TargetNameError::TooLong);
        }

        for label in value.split('.') {
            if label.is_empty() {
                return Err(TargetNameError::EmptyLabel);
            }
            if label.len() > 63 {
                return Err(TargetNameError::LabelTooLong(label.to_string()));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(TargetNameError::HyphenAtLabelEdge(label.to_string()));
            }
            for c in label.chars() {
                if c.is_ascii_uppercase() {
                    return Err(TargetNameError::NotLowercase);
                }
                if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                    return Err(TargetNameError::InvalidChar(c));
                }
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for TargetName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        TargetName::new(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_and_dotted_names() {
        assert!(TargetName::new("api").is_ok());
        assert!(TargetName::new("api.example.com").is_ok());
        assert!(TargetName::new("edge-7.eu-west.example.com").is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(matches!(TargetName::new(""), Err(TargetNameError::Empty)));
        assert!(matches!(
            TargetName::new("Api.example.com"),
            Err(TargetNameError::NotLowercase)
        ));
        assert!(matches!(
            TargetName::new("api..example.com"),
            Err(TargetNameError::EmptyLabel)
        ));
        assert!(matches!(
            TargetName::new("-api.example.com"),
            Err(TargetNameError::HyphenAtLabelEdge(_))
        ));
        assert!(matches!(
            TargetName::new("api_1.example.com"),
            Err(TargetNameError::InvalidChar('_'))
        ));
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<TargetName, _> = serde_json::from_str("\"api.example.com\"");
        assert!(ok.is_ok());
        let bad: Result<TargetName, _> = serde_json::from_str("\"Bad Name\"");
        assert!(bad.is_err());
    }
}
