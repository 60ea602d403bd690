//! Ordered fallback across independent strategies for one target value.
//!
//! Strategies run strictly in insertion order. The first one that returns a
//! usable value wins and nothing after it runs. A failing strategy is logged
//! and skipped; only a fully exhausted chain is an error, and that error
//! carries every strategy's reason.

use crate::data::SourceError;
use crate::error::{ErrorKind, PipelineError};
use crate::fetch::FetchError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

/// What happened when a chain tried one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttemptOutcome {
    Succeeded,
    Skipped { kind: ErrorKind, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceAttempt {
    pub source: String,
    pub outcome: AttemptOutcome,
    pub attempts: u32,
}

/// Ordered record of a chain walk. Diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SourceAttemptLog {
    entries: Vec<SourceAttempt>,
}

impl SourceAttemptLog {
    pub fn push(&mut self, attempt: SourceAttempt) {
        self.entries.push(attempt);
    }

    pub fn entries(&self) -> &[SourceAttempt] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn any_succeeded(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.outcome == AttemptOutcome::Succeeded)
    }
}

impl fmt::Display for SourceAttemptLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match &entry.outcome {
                AttemptOutcome::Succeeded => write!(f, "{}: ok", entry.source)?,
                AttemptOutcome::Skipped { reason, .. } => write!(f, "{}: {reason}", entry.source)?,
            }
        }
        Ok(())
    }
}

/// Why one strategy produced nothing usable.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct StrategyFailure {
    pub kind: ErrorKind,
    pub reason: String,
    pub attempts: u32,
}

impl StrategyFailure {
    pub fn new(kind: ErrorKind, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            reason: reason.into(),
            attempts,
        }
    }
}

impl From<FetchError> for StrategyFailure {
    fn from(e: FetchError) -> Self {
        Self::new(e.kind(), e.to_string(), e.attempts)
    }
}

impl From<SourceError> for StrategyFailure {
    fn from(e: SourceError) -> Self {
        Self::new(e.kind(), e.to_string(), 1)
    }
}

/// A strategy's value plus the attempts and warnings it took.
#[derive(Debug, Clone)]
pub struct StrategyOutput<T> {
    pub value: T,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

impl<T> StrategyOutput<T> {
    pub fn new(value: T, attempts: u32) -> Self {
        Self {
            value,
            attempts,
            warnings: Vec::new(),
        }
    }
}

/// A resolved value with the source that produced it.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: String,
    pub log: SourceAttemptLog,
    pub warnings: Vec<String>,
}

type StrategyFn<'a, T> = Box<dyn Fn() -> Result<StrategyOutput<T>, StrategyFailure> + 'a>;
type UsableFn<'a, T> = Box<dyn Fn(&T) -> Result<(), String> + 'a>;

struct Strategy<'a, T> {
    name: String,
    run: StrategyFn<'a, T>,
}

pub struct FallbackChain<'a, T> {
    target: String,
    usable: UsableFn<'a, T>,
    strategies: Vec<Strategy<'a, T>>,
}

impl<'a, T> FallbackChain<'a, T> {
    /// An empty chain for `target`. `usable` vets every candidate value.
    pub fn new(
        target: impl Into<String>,
        usable: impl Fn(&T) -> Result<(), String> + 'a,
    ) -> Self {
        Self {
            target: target.into(),
            usable: Box::new(usable),
            strategies: Vec::new(),
        }
    }

    /// Append a strategy; it runs after every strategy added before it.
    pub fn strategy(
        mut self,
        name: impl Into<String>,
        run: impl Fn() -> Result<StrategyOutput<T>, StrategyFailure> + 'a,
    ) -> Self {
        self.strategies.push(Strategy {
            name: name.into(),
            run: Box::new(run),
        });
        self
    }

    pub fn resolve(&self) -> Result<Resolved<T>, PipelineError> {
        let mut log = SourceAttemptLog::default();

        for strategy in &self.strategies {
            let failure = match (strategy.run)() {
                Ok(output) => match (self.usable)(&output.value) {
                    Ok(()) => {
                        info!(target = %self.target, source = %strategy.name, "resolved");
                        log.push(SourceAttempt {
                            source: strategy.name.clone(),
                            outcome: AttemptOutcome::Succeeded,
                            attempts: output.attempts,
                        });
                        return Ok(Resolved {
                            value: output.value,
                            source: strategy.name.clone(),
                            log,
                            warnings: output.warnings,
                        });
                    }
                    Err(reason) => {
                        StrategyFailure::new(ErrorKind::UnusableValue, reason, output.attempts)
                    }
                },
                Err(failure) => failure,
            };

            warn!(
                target = %self.target,
                source = %strategy.name,
                reason = %failure.reason,
                "source skipped"
            );
            log.push(SourceAttempt {
                source: strategy.name.clone(),
                outcome: AttemptOutcome::Skipped {
                    kind: failure.kind,
                    reason: failure.reason,
                },
                attempts: failure.attempts,
            });
        }

        Err(PipelineError::AllSourcesExhausted {
            target: self.target.clone(),
            log,
        })
    }
}

/// Rates must be finite and strictly positive.
pub fn usable_rate(rate: &f64) -> Result<(), String> {
    if !rate.is_finite() {
        Err(format!("rate is not a number ({rate})"))
    } else if *rate <= 0.0 {
        Err(format!("rate is not positive ({rate})"))
    } else {
        Ok(())
    }
}

/// Return series must be non-empty with every element finite.
pub fn usable_returns(returns: &[f64]) -> Result<(), String> {
    if returns.is_empty() {
        Err("no returns".into())
    } else if let Some(i) = returns.iter().position(|r| !r.is_finite()) {
        Err(format!("return {i} is not finite"))
    } else {
        Ok(())
    }
}
