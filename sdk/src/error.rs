//! Error taxonomy shared between handlers and the serve runtime.
//!
//! Handlers return [`Error`] to signal how the orchestrator should treat the
//! failed attempt:
//! - [`Error::NonRetriable`]: the input can never succeed; no further attempts.
//! - [`Error::RetryAfter`]: retriable, but not before the given delay.
//! - [`Error::Step`]: a previously failed step replayed from the memo.
//! - [`Error::Other`]: anything else; retried with the default policy.

use {chrono::SecondsFormat, thiserror::Error};

/// A step failure captured by a previous attempt and replayed from the memo.
///
/// Raised by the step engine when a memoized record carries an `error` shape
/// instead of `data`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct StepError {
    /// Error type name as recorded by the failing attempt.
    pub name: String,
    pub message: String,
    /// Optional stack trace carried over from the failing attempt.
    pub stack: Option<String>,
}

/// Delay hint attached to [`Error::RetryAfter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryAfter {
    /// Retry no sooner than this many seconds from now.
    Seconds(u64),
    /// Retry no sooner than this instant.
    At(chrono::DateTime<chrono::Utc>),
}

impl RetryAfter {
    /// Render the `Retry-After` header value (delta seconds or RFC3339).
    pub fn header_value(&self) -> String {
        match self {
            Self::Seconds(secs) => secs.to_string(),
            Self::At(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Failure raised by a function handler or by the step engine on its behalf.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is invalid in a way a retry cannot fix.
    #[error("{message}")]
    NonRetriable { message: String },

    /// A temporary block with a known duration (rate limit, maintenance
    /// window). Retried after the given delay.
    #[error("{message}")]
    RetryAfter { message: String, after: RetryAfter },

    /// A memoized step failure replayed into the handler.
    #[error(transparent)]
    Step(#[from] StepError),

    /// Any other failure; retried with the default policy.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for [`Error::NonRetriable`].
    pub fn non_retriable(message: impl Into<String>) -> Self {
        Self::NonRetriable {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::RetryAfter`] with a delay in seconds.
    pub fn retry_after_secs(message: impl Into<String>, secs: u64) -> Self {
        Self::RetryAfter {
            message: message.into(),
            after: RetryAfter::Seconds(secs),
        }
    }

    /// Error type name reported to the orchestrator.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NonRetriable { .. } => "NonRetriableError",
            Self::RetryAfter { .. } => "RetryAfterError",
            Self::Step(_) => "StepError",
            Self::Other(_) => "Error",
        }
    }

    /// True when the orchestrator must not schedule further attempts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NonRetriable { .. } | Self::Step(_))
    }

    /// Stack trace to report, if one was captured.
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Step(err) => err.stack.as_deref(),
            _ => None,
        }
    }
}
