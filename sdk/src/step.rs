//! The step engine.
//!
//! Turns an imperative handler into a sequence of individually replayable
//! steps. Each attempt receives a memo of previously completed steps keyed
//! by hash-id; operations present in the memo return their recorded outcome
//! without re-executing, operations absent from it append a plan entry that
//! the serve runtime reports back to the orchestrator.
//!
//! # Step identity
//! A step's hash-id is the SHA-1 hex digest of its original id, qualified by
//! an occurrence counter so identical ids in loops stay distinct: the first
//! call to id `x` hashes `"x"`, the second hashes `"x:0"`, the third
//! `"x:1"`, and so on. Replaying a handler with identical control flow
//! therefore reproduces identical hash-ids.
//!
//! # Execution policy
//! [`Step::run`] never defers user code: on a memo miss the thunk executes
//! immediately and its value is both returned to the handler and recorded
//! on the plan. [`Step::sleep`], [`Step::wait_for_event`] and
//! [`Step::invoke`] always defer to the orchestrator; on a miss they return
//! the zero value (`()` / `None`) and the handler is expected to return
//! shortly after. Relying on a deferred operation's value within the same
//! attempt is a handler bug, not something the engine enforces.

use {
    crate::{
        error::{Error, StepError},
        event::Event,
        function::parse_duration,
    },
    serde::{de::DeserializeOwned, Serialize},
    serde_json::{json, Map, Value},
    sha1::{Digest as _, Sha1},
    std::{
        collections::HashMap,
        future::Future,
        sync::{Arc, Mutex},
    },
};

/// Operation kind of a plan entry.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum StepOp {
    /// A `run` step that executed this attempt.
    StepPlanned,
    Sleep,
    WaitForEvent,
    InvokeFunction,
}

/// One entry in the attempt's plan, reported to the orchestrator.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PlannedStep {
    /// Hash-id of the step (40 hex chars).
    pub id: String,
    pub op: StepOp,
    /// The original, caller-provided step id.
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Operation-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opts: Option<Value>,
}

/// A sleep or wait duration: plain seconds or a `<int><unit>` string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepDuration {
    Secs(u64),
    Text(String),
}

impl StepDuration {
    fn canonical(self) -> Result<String, Error> {
        match self {
            Self::Secs(secs) => Ok(format!("{secs}s")),
            Self::Text(text) => {
                parse_duration(&text)
                    .map_err(|e| Error::non_retriable(format!("invalid duration: {e}")))?;
                Ok(text)
            }
        }
    }
}

impl From<u64> for StepDuration {
    fn from(secs: u64) -> Self {
        Self::Secs(secs)
    }
}

impl From<&str> for StepDuration {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for StepDuration {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

struct StepState {
    memo: HashMap<String, Value>,
    occurrences: HashMap<String, u32>,
    plan: Vec<PlannedStep>,
}

/// Per-attempt step engine.
///
/// Cheap to clone; clones share state. Step calls are expected to happen
/// sequentially on the handler's task.
#[derive(Clone)]
pub struct Step {
    state: Arc<Mutex<StepState>>,
}

impl Step {
    /// Build an engine seeded with the memo from the inbound request.
    pub fn new(memo: HashMap<String, Value>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StepState {
                memo,
                occurrences: HashMap::new(),
                plan: Vec::new(),
            })),
        }
    }

    /// Run `f` once per run, memoizing its result across attempts.
    ///
    /// On a memo hit the recorded value is returned (or the recorded
    /// failure is raised as [`Error::Step`]) without invoking `f`. On a
    /// miss, `f` executes immediately; its value is returned and captured
    /// on the plan.
    pub async fn run<T, F, Fut>(&self, id: &str, f: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let (hash_id, memoized) = self.begin(id);
        if let Some(record) = memoized {
            let value = interpret_record(record)?;
            return serde_json::from_value(value)
                .map_err(|e| anyhow::anyhow!("memoized value for step '{id}' does not deserialize: {e}").into());
        }

        let output = f().await?;
        let value = serde_json::to_value(&output)
            .map_err(|e| anyhow::anyhow!("step '{id}' returned an unserializable value: {e}"))?;

        self.push(PlannedStep {
            id: hash_id,
            op: StepOp::StepPlanned,
            display_name: id.to_string(),
            opts: Some(json!({ "data": value })),
        });

        Ok(output)
    }

    /// Ask the orchestrator to pause the run for `duration`.
    ///
    /// Returns immediately with `()` on a miss; the actual pause happens
    /// between attempts.
    pub fn sleep(&self, id: &str, duration: impl Into<StepDuration>) -> Result<(), Error> {
        let (hash_id, memoized) = self.begin(id);
        if let Some(record) = memoized {
            interpret_record(record)?;
            return Ok(());
        }

        let duration = duration.into().canonical()?;
        self.push(PlannedStep {
            id: hash_id,
            op: StepOp::Sleep,
            display_name: id.to_string(),
            opts: Some(json!({ "duration": duration })),
        });
        Ok(())
    }

    /// Ask the orchestrator to pause until a matching event arrives.
    ///
    /// Returns `Some(event)` when a match was memoized, `None` on a timeout
    /// record or on the initial miss.
    pub fn wait_for_event(
        &self,
        id: &str,
        event: &str,
        timeout: impl Into<StepDuration>,
        expression: Option<&str>,
    ) -> Result<Option<Event>, Error> {
        let (hash_id, memoized) = self.begin(id);
        if let Some(record) = memoized {
            return match interpret_record(record)? {
                Value::Null => Ok(None),
                value => serde_json::from_value(value).map(Some).map_err(|e| {
                    anyhow::anyhow!("memoized event for step '{id}' does not deserialize: {e}")
                        .into()
                }),
            };
        }

        let timeout = timeout.into().canonical()?;
        let mut opts = json!({ "event": event, "timeout": timeout });
        if let Some(expression) = expression {
            opts["if"] = json!(expression);
        }

        self.push(PlannedStep {
            id: hash_id,
            op: StepOp::WaitForEvent,
            display_name: id.to_string(),
            opts: Some(opts),
        });
        Ok(None)
    }

    /// Ask the orchestrator to invoke another function and memoize its
    /// result. `function_id` is the orchestrator-visible composite id.
    pub fn invoke(
        &self,
        id: &str,
        function_id: &str,
        payload: Map<String, Value>,
    ) -> Result<Option<Value>, Error> {
        let (hash_id, memoized) = self.begin(id);
        if let Some(record) = memoized {
            return interpret_record(record).map(Some).map_err(Error::from);
        }

        self.push(PlannedStep {
            id: hash_id,
            op: StepOp::InvokeFunction,
            display_name: id.to_string(),
            opts: Some(json!({ "function_id": function_id, "payload": payload })),
        });
        Ok(None)
    }

    /// Snapshot of the plan entries accumulated so far, in call order.
    pub fn planned(&self) -> Vec<PlannedStep> {
        self.state.lock().unwrap().plan.clone()
    }

    /// True when the plan contains an operation deferred to the
    /// orchestrator (anything other than an executed `run`).
    pub fn has_deferred_steps(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .plan
            .iter()
            .any(|entry| entry.op != StepOp::StepPlanned)
    }

    /// Derive the hash-id for this call and consume a memoized record.
    fn begin(&self, id: &str) -> (String, Option<Value>) {
        let mut state = self.state.lock().unwrap();

        let occurrence = state.occurrences.entry(id.to_string()).or_insert(0);
        let input = match *occurrence {
            0 => id.to_string(),
            n => format!("{id}:{}", n - 1),
        };
        *occurrence += 1;

        let hash_id = hex::encode(Sha1::digest(input.as_bytes()));
        let memoized = state.memo.remove(&hash_id);
        (hash_id, memoized)
    }

    fn push(&self, entry: PlannedStep) {
        self.state
            .lock()
            .unwrap()
            .plan
            .push(entry);
    }
}

/// Interpret a memoized record by shape: `{"data": v}` yields `v`,
/// `{"error": {...}}` raises the recorded failure, anything else passes
/// through as a value.
fn interpret_record(record: Value) -> Result<Value, StepError> {
    let Value::Object(mut map) = record else {
        return Ok(record);
    };

    if let Some(error) = map.remove("error") {
        return Err(step_error_from(error));
    }
    if let Some(data) = map.remove("data") {
        return Ok(data);
    }
    Ok(Value::Object(map))
}

fn step_error_from(error: Value) -> StepError {
    let name = error
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("Error")
        .to_string();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let stack = error
        .get("stack")
        .and_then(Value::as_str)
        .map(str::to_string);

    StepError {
        name,
        message,
        stack,
    }
}
