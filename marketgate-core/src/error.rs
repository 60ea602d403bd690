//! Error classification shared across the pipeline, and the fatal errors its
//! public operations return.
//!
//! Per-attempt, per-identifier and per-strategy failures are recovered
//! locally and reported through outcome values. Only exhaustion of a whole
//! fallback chain or a whole batch surfaces as `PipelineError`.

use crate::fallback::SourceAttemptLog;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse classification of every failure the pipeline can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportFailure,
    EmptyResult,
    SymbolNotFound,
    ResponseFormatChanged,
    InsufficientObservations,
    ExcessiveMissingData,
    InvalidPrice,
    SuspiciousVolatilityPattern,
    MissingCredential,
    UnusableValue,
    AllSourcesExhausted,
    NoIdentifiersSucceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransportFailure => "transport_failure",
            ErrorKind::EmptyResult => "empty_result",
            ErrorKind::SymbolNotFound => "symbol_not_found",
            ErrorKind::ResponseFormatChanged => "response_format_changed",
            ErrorKind::InsufficientObservations => "insufficient_observations",
            ErrorKind::ExcessiveMissingData => "excessive_missing_data",
            ErrorKind::InvalidPrice => "invalid_price",
            ErrorKind::SuspiciousVolatilityPattern => "suspicious_volatility_pattern",
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::UnusableValue => "unusable_value",
            ErrorKind::AllSourcesExhausted => "all_sources_exhausted",
            ErrorKind::NoIdentifiersSucceeded => "no_identifiers_succeeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal errors from the pipeline's public operations.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("all sources exhausted for {target}: {log}")]
    AllSourcesExhausted {
        target: String,
        log: SourceAttemptLog,
    },

    #[error("no identifiers succeeded ({} failed: {})", .failures.len(), summarize(.failures))]
    NoIdentifiersSucceeded { failures: Vec<(String, String)> },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::AllSourcesExhausted { .. } => ErrorKind::AllSourcesExhausted,
            PipelineError::NoIdentifiersSucceeded { .. } => ErrorKind::NoIdentifiersSucceeded,
        }
    }
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, reason)| format!("{id}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}
