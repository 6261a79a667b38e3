//! Error types for Tollgate.

use std::fmt;

use thiserror::Error;

/// Main error type for Tollgate operations outside the request path.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Service settings could not be assembled from their sources
    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// Service settings were assembled but are unusable
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Errors raised while loading or publishing a tier configuration.
///
/// A failed publish never replaces the active snapshot.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The candidate parsed but is not a usable configuration.
    #[error("configuration rejected: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// The candidate could not be parsed.
    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    /// The candidate could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn parse(origin: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            origin: origin.into(),
            message: message.to_string(),
        }
    }

    /// Validation issues carried by this error, if any.
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            ConfigError::Validation(issues) => issues,
            _ => &[],
        }
    }
}

/// A single problem found while validating a candidate configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// No tier named `default` is defined.
    MissingDefaultTier,
    /// An identity is mapped to a tier that is not defined.
    UnknownTier { identifier: String, tier: String },
    /// A quota is below zero.
    NegativeLimit {
        tier: String,
        field: &'static str,
        value: i64,
    },
    /// A tier was defined with an empty name.
    EmptyTierName,
    /// An identity mapping has an empty identifier.
    EmptyIdentifier { tier: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingDefaultTier => write!(f, "tier \"default\" is not defined"),
            ValidationIssue::UnknownTier { identifier, tier } => {
                write!(f, "identity {} refers to undefined tier \"{}\"", identifier, tier)
            }
            ValidationIssue::NegativeLimit { tier, field, value } => {
                write!(f, "tier \"{}\" has negative {} ({})", tier, field, value)
            }
            ValidationIssue::EmptyTierName => write!(f, "a tier has an empty name"),
            ValidationIssue::EmptyIdentifier { tier } => {
                write!(f, "an identity mapped to tier \"{}\" is empty", tier)
            }
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_issue() {
        let err = ConfigError::Validation(vec![
            ValidationIssue::MissingDefaultTier,
            ValidationIssue::UnknownTier {
                identifier: "AKID".to_string(),
                tier: "gold".to_string(),
            },
        ]);

        let message = err.to_string();
        assert!(message.contains("tier \"default\" is not defined"));
        assert!(message.contains("identity AKID refers to undefined tier \"gold\""));
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_parse_error_has_no_issues() {
        let err = ConfigError::parse("tiers.yaml", "unexpected token");
        assert!(err.issues().is_empty());
        assert_eq!(err.to_string(), "failed to parse tiers.yaml: unexpected token");
    }
}
