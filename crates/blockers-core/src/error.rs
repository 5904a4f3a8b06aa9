//! Error types for rule loading and rule-store access.
//!
//! None of these ever cross the public query API: queries log the error and
//! fall back to "do not block / do not rewrite".

use std::path::PathBuf;

/// Rule family a piece of rule data belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleFamily {
    TrackingProtection,
    AdBlock,
    AdBlockRegional,
    Httpse,
}

impl std::fmt::Display for RuleFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleFamily::TrackingProtection => "tracking-protection",
            RuleFamily::AdBlock => "ad-block",
            RuleFamily::AdBlockRegional => "ad-block-regional",
            RuleFamily::Httpse => "httpse",
        };
        f.write_str(name)
    }
}

/// Error type for the blockers engine.
#[derive(Debug, thiserror::Error)]
pub enum BlockersError {
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Rule data not found: {}", .0.display())]
    MissingRuleData(PathBuf),
    #[error("Invalid {family} rule data: {reason}")]
    InvalidRuleData { family: RuleFamily, reason: String },
    #[error("Rule store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("No regional list selected for locale '{0}'")]
    NoRegionalList(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BlockersError {
    pub(crate) fn invalid(family: RuleFamily, reason: impl Into<String>) -> Self {
        BlockersError::InvalidRuleData {
            family,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockersError>;
