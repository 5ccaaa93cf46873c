//! Function-level execution options.
//!
//! Options are validated when constructed so an invalid configuration fails
//! at startup rather than at sync time. Durations use the `<int><unit>`
//! grammar with units `s`, `m`, `h`, `d`.

use {
    lazy_regex::regex_is_match,
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Longest accepted debounce duration (7 days).
const MAX_DEBOUNCE_SECS: u64 = 7 * 24 * 60 * 60;
/// Longest accepted priority expression.
const MAX_PRIORITY_EXPR_LEN: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("invalid duration '{0}', expected <int><unit> with unit in s|m|h|d")]
    InvalidDuration(String),
    #[error("duration '{0}' out of range, expected between 1s and 7d")]
    DurationOutOfRange(String),
    #[error("priority expression must not be empty")]
    EmptyPriorityExpression,
    #[error("priority expression too long ({0} chars, max {MAX_PRIORITY_EXPR_LEN})")]
    PriorityExpressionTooLong(usize),
    #[error("priority expression contains unsupported characters: '{0}'")]
    InvalidPriorityExpression(String),
    #[error("at most 2 concurrency levels are supported, got {0}")]
    TooManyConcurrencyLevels(usize),
}

/// Parse a `<int><unit>` duration into seconds.
pub fn parse_duration(value: &str) -> Result<u64, OptionsError> {
    let invalid = || OptionsError::InvalidDuration(value.to_string());

    let (split, unit) = value.char_indices().last().ok_or_else(invalid)?;
    let amount: u64 = value[..split].parse().map_err(|_| invalid())?;
    let factor = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    amount.checked_mul(factor).ok_or_else(invalid)
}

fn validate_bounded_duration(value: &str) -> Result<(), OptionsError> {
    let secs = parse_duration(value)?;
    if !(1..=MAX_DEBOUNCE_SECS).contains(&secs) {
        return Err(OptionsError::DurationOutOfRange(value.to_string()));
    }
    Ok(())
}

/// Scope of a concurrency limit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyScope {
    Fn,
    Env,
    Account,
}

/// One concurrency level. A limit of `0` means unlimited.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Concurrency {
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ConcurrencyScope>,
}

impl Concurrency {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            key: None,
            scope: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_scope(mut self, scope: ConcurrencyScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Debounce configuration; durations must fall in `[1s, 7d]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Debounce {
    pub period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl Debounce {
    pub fn new(period: impl Into<String>) -> Result<Self, OptionsError> {
        let period = period.into();
        validate_bounded_duration(&period)?;
        Ok(Self {
            period,
            key: None,
            timeout: None,
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Result<Self, OptionsError> {
        let timeout = timeout.into();
        validate_bounded_duration(&timeout)?;
        self.timeout = Some(timeout);
        Ok(self)
    }
}

/// Run-priority configuration. The expression is evaluated by the
/// orchestrator to an integer in `[-600, 600]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Priority {
    pub run: String,
}

impl Priority {
    pub fn new(run: impl Into<String>) -> Result<Self, OptionsError> {
        let run = run.into();
        if run.is_empty() {
            return Err(OptionsError::EmptyPriorityExpression);
        }
        if run.len() > MAX_PRIORITY_EXPR_LEN {
            return Err(OptionsError::PriorityExpressionTooLong(run.len()));
        }
        if !regex_is_match!(r#"^[A-Za-z0-9_\.\s\-\(\)\[\]<>=!&\|\+\*/%\?:'",]+$"#, &run) {
            return Err(OptionsError::InvalidPriorityExpression(run));
        }
        Ok(Self { run })
    }
}

/// How to treat a new run while another run of the same function is active.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SingletonMode {
    /// Drop the new run.
    Skip,
    /// Cancel the active run and start the new one.
    Cancel,
}

/// Singleton configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Singleton {
    pub mode: SingletonMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Singleton {
    pub fn new(mode: SingletonMode) -> Self {
        Self { mode, key: None }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// The full option set attached to a function.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct FunctionOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub concurrency: Vec<Concurrency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce: Option<Debounce>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub singleton: Option<Singleton>,
}

impl FunctionOptions {
    /// Cross-field validation, run when the owning function is built.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.concurrency.len() > 2 {
            return Err(OptionsError::TooManyConcurrencyLevels(
                self.concurrency.len(),
            ));
        }
        Ok(())
    }
}
