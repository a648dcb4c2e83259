use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("demo strategies are read-only; clone the template to edit it")]
    TemplateReadOnly,

    #[error("unknown graph: {0}")]
    UnknownGraph(String),

    #[error("unknown run: {0}")]
    UnknownRun(String),

    #[error("save failed ({correlation}): {message}")]
    SaveFailed {
        correlation: CorrelationCode,
        message: String,
    },

    #[error("submission failed ({correlation}): {message}")]
    Submission {
        correlation: CorrelationCode,
        message: String,
    },
}

impl StrategyError {
    /// Correlation code attached to this error, when it carries one.
    pub fn correlation(&self) -> Option<CorrelationCode> {
        match self {
            StrategyError::SaveFailed { correlation, .. }
            | StrategyError::Submission { correlation, .. } => Some(*correlation),
            _ => None,
        }
    }
}

static CORRELATION_SEQ: AtomicU32 = AtomicU32::new(0);

/// Support-facing reference for a single failure, quoted by the user when
/// escalating. Derived from the wall clock plus a process-local counter so
/// two failures in the same millisecond still get distinct codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationCode {
    millis: i64,
    seq: u32,
}

impl CorrelationCode {
    pub fn generate() -> Self {
        Self {
            millis: chrono::Utc::now().timestamp_millis(),
            seq: CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for CorrelationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TW-{:X}-{:04}", self.millis, self.seq)
    }
}
