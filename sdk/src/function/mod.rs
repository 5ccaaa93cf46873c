//! User-defined functions and their registry.
//!
//! A [`Function`] pairs an id and trigger set with an async handler. The
//! handler receives a [`Context`] carrying the triggering event(s) and the
//! step engine for the current attempt, and returns either a final JSON
//! value or an [`Error`](crate::Error) describing how the attempt failed.

mod options;
mod trigger;

pub use {
    options::{
        parse_duration, Concurrency, ConcurrencyScope, Debounce, FunctionOptions, OptionsError,
        Priority, Singleton, SingletonMode,
    },
    trigger::Trigger,
};

use {
    crate::{error::Error, event::Event, step::Step},
    serde_json::Value,
    std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc},
    thiserror::Error as ThisError,
};

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRIES: u32 = 3;

/// Boxed future returned by function handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, Error>> + Send + 'static>>;

type BoxedHandler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>;

/// Per-attempt context handed to a function handler.
#[derive(Clone)]
pub struct Context {
    /// The event that triggered this run.
    pub event: Event,
    /// All events for batch triggers; contains at least `event`.
    pub events: Vec<Event>,
    /// Orchestrator-assigned run id.
    pub run_id: String,
    /// Zero-indexed attempt number.
    pub attempt: u32,
    /// Step engine for this attempt.
    pub step: Step,
}

#[derive(Debug, ThisError)]
pub enum FunctionError {
    #[error("function id must not be empty")]
    EmptyId,
    #[error("function '{0}' has no triggers")]
    MissingTriggers(String),
    #[error("function '{0}' has no handler")]
    MissingHandler(String),
    #[error("duplicate function id '{0}'")]
    DuplicateId(String),
    #[error(transparent)]
    Options(#[from] OptionsError),
}

/// A durable function: id, triggers, options, and an async handler.
#[derive(Clone)]
pub struct Function {
    id: String,
    name: Option<String>,
    description: Option<String>,
    triggers: Vec<Trigger>,
    retries: u32,
    options: FunctionOptions,
    handler: BoxedHandler,
}

impl Function {
    /// Start building a function with the given id. The id uniquely
    /// identifies the function within the app.
    pub fn builder(id: impl Into<String>) -> FunctionBuilder {
        FunctionBuilder {
            id: id.into(),
            name: None,
            description: None,
            triggers: Vec::new(),
            retries: DEFAULT_RETRIES,
            options: FunctionOptions::default(),
            handler: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name; falls back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn options(&self) -> &FunctionOptions {
        &self.options
    }

    /// Orchestrator-visible identifier: `<app_id>-<function_id>`.
    pub fn composite_id(&self, app_id: &str) -> String {
        format!("{app_id}-{}", self.id)
    }

    pub(crate) fn invoke(&self, ctx: Context) -> HandlerFuture {
        (self.handler)(ctx)
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.id)
            .field("triggers", &self.triggers)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Function`].
pub struct FunctionBuilder {
    id: String,
    name: Option<String>,
    description: Option<String>,
    triggers: Vec<Trigger>,
    retries: u32,
    options: FunctionOptions,
    handler: Option<BoxedHandler>,
}

impl FunctionBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Retries after the first failed attempt; defaults to [`DEFAULT_RETRIES`].
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.options.concurrency.push(concurrency);
        self
    }

    pub fn debounce(mut self, debounce: Debounce) -> Self {
        self.options.debounce = Some(debounce);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.options.priority = Some(priority);
        self
    }

    pub fn singleton(mut self, singleton: Singleton) -> Self {
        self.options.singleton = Some(singleton);
        self
    }

    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Error>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |ctx| Box::pin(handler(ctx))));
        self
    }

    pub fn build(self) -> Result<Function, FunctionError> {
        if self.id.is_empty() {
            return Err(FunctionError::EmptyId);
        }
        if self.triggers.is_empty() {
            return Err(FunctionError::MissingTriggers(self.id));
        }
        let handler = self
            .handler
            .ok_or_else(|| FunctionError::MissingHandler(self.id.clone()))?;
        self.options.validate()?;

        Ok(Function {
            id: self.id,
            name: self.name,
            description: self.description,
            triggers: self.triggers,
            retries: self.retries,
            options: self.options,
            handler,
        })
    }
}

/// Id-keyed set of functions, read-only after construction.
#[derive(Debug)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new(functions: Vec<Function>) -> Result<Self, FunctionError> {
        let mut map = BTreeMap::new();
        for function in functions {
            let id = function.id().to_string();
            if map.insert(id.clone(), function).is_some() {
                return Err(FunctionError::DuplicateId(id));
            }
        }
        Ok(Self { functions: map })
    }

    pub fn get(&self, id: &str) -> Option<&Function> {
        self.functions.get(id)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }
}
