//! Error types for parcel-router.
//!
//! Domain outcomes of `parse`, `upsert` and `route` are returned as values
//! (`ParseFailure`, `MergeWarning`, `RoutingTargetUnresolved`). The enums here
//! cover the faults that can actually stop something: bad configuration,
//! registry lookups and the HTTP edge.

use serde::Serialize;

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Adapter registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("No {kind} adapter registered under key {key}")]
    NotFound { kind: String, key: String },
}

/// Pipeline-level errors (mail account handling, facade input).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mail account {0} is not configured")]
    UnknownAccount(String),

    #[error("Mail account {0} is disabled")]
    AccountDisabled(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why the parser engine could not produce a delivery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailureReason {
    /// No registered parser claims the email.
    NoMatchingParser,
    /// A parser claimed the email but could not extract a tracking id.
    MalformedContent,
    /// More than one parser confidently claims the email.
    AmbiguousMatch,
}

impl std::fmt::Display for ParseFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoMatchingParser => "no matching parser",
            Self::MalformedContent => "malformed content",
            Self::AmbiguousMatch => "ambiguous match",
        };
        write!(f, "{s}")
    }
}

/// Structured parse failure. Recovered locally, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct ParseFailure {
    pub reason: ParseFailureReason,
    pub detail: String,
}

impl ParseFailure {
    pub fn no_matching_parser(detail: impl Into<String>) -> Self {
        Self {
            reason: ParseFailureReason::NoMatchingParser,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            reason: ParseFailureReason::MalformedContent,
            detail: detail.into(),
        }
    }

    pub fn ambiguous(detail: impl Into<String>) -> Self {
        Self {
            reason: ParseFailureReason::AmbiguousMatch,
            detail: detail.into(),
        }
    }
}
