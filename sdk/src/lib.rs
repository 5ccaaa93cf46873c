//! # Inngest SDK
//!
//! This crate lets an application host durable, event-driven functions
//! executed by an Inngest orchestrator. The orchestrator drives execution
//! by calling an HTTP endpoint the host serves; the SDK authenticates those
//! calls, replays prior progress from the supplied memo, advances the
//! user's handler by one step, and reports the outcome back.
//!
//! The crate is framework-agnostic: [`ServeHandler`] consumes and produces
//! plain request/response values. Use the `inngest-serve-warp` crate (or
//! write a small adapter) to mount it on an actual server.
//!
//! ```no_run
//! use {
//!     inngest_sdk::{Config, Function, Inngest, ServeHandler, Trigger},
//!     serde_json::json,
//! };
//!
//! let client = Inngest::new("shop", Config::from_env());
//!
//! let import = Function::builder("import-products")
//!     .trigger(Trigger::event("shop/catalog.updated"))
//!     .handler(|ctx| async move {
//!         let count = ctx
//!             .step
//!             .run("fetch", || async { Ok(json!({"fetched": 42})) })
//!             .await?;
//!         ctx.step.sleep("cool-off", "5m")?;
//!         Ok(count)
//!     })
//!     .build()?;
//!
//! let handler = ServeHandler::new(client, vec![import])?;
//! # let _ = handler;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod function;
pub mod serve;
pub mod signature;
pub mod step;

pub use {
    client::{Inngest, SendError},
    config::{Config, ConfigBuilder, EnvSource, Mode, ProcessEnv},
    error::{Error, RetryAfter, StepError},
    event::Event,
    function::{
        Concurrency, ConcurrencyScope, Context, Debounce, Function, FunctionBuilder,
        FunctionError, FunctionOptions, FunctionRegistry, OptionsError, Priority, Singleton,
        SingletonMode, Trigger,
    },
    serve::{ServeHandler, ServeRequest, ServeResponse},
    signature::{SignatureError, SignatureVerifier},
    step::{PlannedStep, Step, StepDuration, StepOp},
};
