//! The serve handler.
//!
//! The orchestrator drives an app entirely through one HTTP endpoint. This
//! module implements that endpoint as a state machine over plain values
//! (method, headers, query, body in; status, headers, body out) so any HTTP
//! server can adapt it. The `inngest-serve-warp` crate provides the warp
//! adapter.
//!
//! | Method | Purpose |
//! |---|---|
//! | GET | Introspection: mode, counts, and (when authenticated) identity. |
//! | PUT | Sync: register the app's functions with the orchestrator. |
//! | POST | Call: advance a function run by one attempt. |
//!
//! Anything else is a 405. The path is advisory; the handler serves
//! whatever mount point the host chose.

mod sync;

use {
    crate::{
        client::Inngest,
        config::Config,
        error::Error,
        event::Event,
        function::{Context, Function, FunctionError, FunctionRegistry},
        signature::{sha256_hex, SignatureVerifier},
        step::Step,
    },
    serde::Deserialize,
    serde_json::{json, Map, Value},
    std::collections::HashMap,
};

/// Inbound request signature header.
pub const HEADER_SIGNATURE: &str = "X-Inngest-Signature";
/// Identifies the orchestrator kind (`"dev"` or `"cloud"`).
pub const HEADER_SERVER_KIND: &str = "X-Inngest-Server-Kind";
/// SDK identifier sent on every response and outbound call.
pub const HEADER_SDK: &str = "X-Inngest-Sdk";
/// Request protocol version header.
pub const HEADER_REQ_VERSION: &str = "X-Inngest-Req-Version";
/// `"true"` when the orchestrator must not retry the attempt.
pub const HEADER_NO_RETRY: &str = "X-Inngest-No-Retry";
/// Delay hint for retriable failures (seconds or RFC3339).
pub const HEADER_RETRY_AFTER: &str = "Retry-After";
/// Environment label forwarded on outbound calls.
pub const HEADER_ENV: &str = "X-Inngest-Env";

/// Value of [`HEADER_SDK`].
pub const SDK_IDENT: &str = concat!("rust:v", env!("CARGO_PKG_VERSION"));
/// Value of [`HEADER_REQ_VERSION`].
pub const REQUEST_VERSION: &str = "1";

const SCHEMA_VERSION: &str = "2024-05-24";

/// An inbound HTTP request, reduced to primitives.
///
/// Header names must be lowercase; [`ServeRequest::header`] lowercases its
/// argument before lookup.
#[derive(Clone, Debug, Default)]
pub struct ServeRequest {
    pub method: String,
    /// Request path as seen by the server, e.g. `"/api/inngest"`.
    pub path: String,
    /// Externally visible host, e.g. from `Host`/`X-Forwarded-Host`.
    pub host: Option<String>,
    /// Externally visible scheme, e.g. from `X-Forwarded-Proto`.
    pub scheme: Option<String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ServeRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// An outbound HTTP response, reduced to primitives.
#[derive(Clone, Debug)]
pub struct ServeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ServeResponse {
    fn json(status: u16, value: &Value) -> Self {
        let body = serde_json::to_vec(value)
            .unwrap_or_else(|_| br#"{"error":"serialization_error"}"#.to_vec());
        Self {
            status,
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                (HEADER_SDK.to_string(), SDK_IDENT.to_string()),
            ],
            body,
        }
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Look up a response header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Body of a POST call request.
#[derive(Debug, Default, Deserialize)]
struct CallRequest {
    #[serde(default)]
    event: Option<Value>,
    #[serde(default)]
    events: Option<Vec<Value>>,
    #[serde(default)]
    ctx: CallRequestCtx,
    /// The memo: hash-id to recorded step outcome.
    #[serde(default)]
    steps: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct CallRequestCtx {
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    attempt: u32,
    #[serde(default)]
    #[allow(dead_code)]
    disable_immediate_execution: bool,
    /// Parsed for forward compatibility; not acted upon.
    #[serde(default)]
    #[allow(dead_code)]
    use_api: bool,
    #[serde(default)]
    #[allow(dead_code)]
    stack: Option<Value>,
}

/// The HTTP entry point hosting an app's functions.
pub struct ServeHandler {
    client: Inngest,
    registry: FunctionRegistry,
    framework: String,
    verifier: SignatureVerifier,
    http: reqwest::Client,
}

impl ServeHandler {
    pub fn new(client: Inngest, functions: Vec<Function>) -> Result<Self, FunctionError> {
        let verifier = SignatureVerifier::from_config(client.config());
        Ok(Self {
            registry: FunctionRegistry::new(functions)?,
            framework: "rust".to_string(),
            verifier,
            http: reqwest::Client::new(),
            client,
        })
    }

    /// Framework label reported during sync and introspection; set by
    /// adapters.
    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = framework.into();
        self
    }

    /// Replace the signature verifier (used by tests to pin the clock).
    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn client(&self) -> &Inngest {
        &self.client
    }

    pub fn config(&self) -> &Config {
        self.client.config()
    }

    /// Dispatch one request.
    pub async fn handle(&self, req: ServeRequest) -> ServeResponse {
        match req.method.to_ascii_uppercase().as_str() {
            "GET" => self.introspect(&req),
            "PUT" => self.sync(&req).await,
            "POST" => self.call(&req).await,
            _ => ServeResponse::json(405, &json!({"error": "Method not allowed"})),
        }
    }

    /// GET: report capabilities, and identity when the caller proves key
    /// possession by signing an empty body.
    fn introspect(&self, req: &ServeRequest) -> ServeResponse {
        let config = self.config();
        let authed = self
            .verifier
            .verify(&[], req.header(HEADER_SIGNATURE), req.header(HEADER_SERVER_KIND))
            .is_ok();

        let mut body = json!({
            "authentication_succeeded": authed,
            "function_count": self.registry.len(),
            "has_event_key": config.event_key().is_some(),
            "has_signing_key": config.signing_key().is_some(),
            "has_signing_key_fallback": config.signing_key_fallback().is_some(),
            "mode": config.mode().as_str(),
            "schema_version": SCHEMA_VERSION,
        });

        if authed {
            let hash = |key: Option<&str>| key.map(|k| sha256_hex(k.as_bytes()));
            let extras = json!({
                "api_origin": config.api_base_url(),
                "app_id": self.client.app_id(),
                "env": config.env(),
                "event_api_origin": config.event_api_base_url(),
                "event_key_hash": hash(config.event_key()),
                "framework": self.framework,
                "sdk_language": "rust",
                "sdk_version": env!("CARGO_PKG_VERSION"),
                "serve_origin": config.serve_origin(),
                "serve_path": config.serve_path(),
                "signing_key_hash": hash(config.signing_key()),
                "signing_key_fallback_hash": hash(config.signing_key_fallback()),
            });
            merge(&mut body, extras);
        }

        ServeResponse::json(200, &body)
    }

    /// POST: advance a function run by one attempt.
    async fn call(&self, req: &ServeRequest) -> ServeResponse {
        let Some(fn_id) = req.query.get("fnId") else {
            return call_response(400, &json!({"error": "Missing fnId parameter"}), true);
        };

        if let Err(err) = self.verifier.verify(
            &req.body,
            req.header(HEADER_SIGNATURE),
            req.header(HEADER_SERVER_KIND),
        ) {
            return call_response(500, &json!({"error": err.to_string()}), false);
        }

        let prefix = format!("{}-", self.client.app_id());
        let local_id = fn_id.strip_prefix(&prefix).unwrap_or(fn_id);
        let Some(function) = self.registry.get(local_id) else {
            return call_response(500, &json!({"error": "Function not found"}), false);
        };

        let call: CallRequest = if req.body.is_empty() {
            CallRequest::default()
        } else {
            match serde_json::from_slice(&req.body) {
                Ok(call) => call,
                Err(err) => {
                    return call_response(
                        400,
                        &json!({"error": format!("malformed request body: {err}")}),
                        true,
                    );
                }
            }
        };

        let event = call
            .event
            .map(Event::from_value)
            .unwrap_or_else(|| Event::new("", Map::new()));
        let events = match call.events {
            Some(values) if !values.is_empty() => {
                values.into_iter().map(Event::from_value).collect()
            }
            _ => vec![event.clone()],
        };

        let step = Step::new(call.steps);
        let ctx = Context {
            event,
            events,
            run_id: call.ctx.run_id,
            attempt: call.ctx.attempt,
            step: step.clone(),
        };

        log::debug!(
            "invoking function '{local_id}' (run_id={}, attempt={})",
            ctx.run_id,
            ctx.attempt
        );

        match function.invoke(ctx).await {
            Err(err) => error_response(&err),
            Ok(value) => {
                if step.has_deferred_steps() {
                    call_response(206, &json!(step.planned()), false)
                } else {
                    call_response(200, &value, false)
                }
            }
        }
    }
}

fn call_response(status: u16, body: &Value, no_retry: bool) -> ServeResponse {
    ServeResponse::json(status, body)
        .with_header(HEADER_REQ_VERSION, REQUEST_VERSION)
        .with_header(HEADER_NO_RETRY, if no_retry { "true" } else { "false" })
}

/// Map a handler failure onto the orchestrator-visible response.
fn error_response(err: &Error) -> ServeResponse {
    let status = if err.is_terminal() { 400 } else { 500 };
    let body = json!({
        "name": err.name(),
        "message": err.to_string(),
        "stack": err.stack(),
    });

    let response = call_response(status, &body, err.is_terminal());
    match err {
        Error::RetryAfter { after, .. } => {
            response.with_header(HEADER_RETRY_AFTER, after.header_value())
        }
        _ => response,
    }
}

fn merge(target: &mut Value, extras: Value) {
    if let (Value::Object(target), Value::Object(extras)) = (target, extras) {
        target.extend(extras);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::Mode,
            error::RetryAfter,
            function::Trigger,
            signature::{sign_with_key, Clock},
            step::StepOp,
        },
        std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    const KEY: &str = "signkey-test-f00df00df00df00df00df00df00df00d";

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn unix_seconds(&self) -> i64 {
            self.0
        }
    }

    fn dev_client() -> Inngest {
        let config = Config::builder()
            .dev(true)
            .build_with_env(&HashMap::<String, String>::new());
        Inngest::new("shop", config)
    }

    fn cloud_client() -> Inngest {
        let config = Config::builder()
            .dev(false)
            .signing_key(KEY)
            .event_key("ek-123")
            .env("prod")
            .build_with_env(&HashMap::<String, String>::new());
        Inngest::new("shop", config)
    }

    fn handler_with(client: Inngest, functions: Vec<Function>) -> ServeHandler {
        ServeHandler::new(client, functions).unwrap()
    }

    fn call_request(fn_id: &str, body: Value) -> ServeRequest {
        let mut req = ServeRequest::new("POST", "/api/inngest");
        req.query.insert("fnId".into(), fn_id.into());
        req.body = serde_json::to_vec(&body).unwrap();
        req
    }

    fn echo_function(id: &str) -> Function {
        Function::builder(id)
            .trigger(Trigger::event("demo/ping"))
            .handler(|ctx| async move {
                let value = ctx.step.run("fetch", || async { Ok(json!(42)) }).await?;
                Ok(value)
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_method_is_405() {
        let handler = handler_with(dev_client(), vec![echo_function("echo")]);
        let resp = handler.handle(ServeRequest::new("DELETE", "/api/inngest")).await;
        assert_eq!(resp.status, 405);
        assert_eq!(resp.header(HEADER_SDK), Some(SDK_IDENT));
    }

    #[tokio::test]
    async fn introspection_public_fields_only_when_unauthenticated() {
        let handler = handler_with(cloud_client(), vec![echo_function("echo")]);
        let resp = handler.handle(ServeRequest::new("GET", "/api/inngest")).await;
        assert_eq!(resp.status, 200);

        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["authentication_succeeded"], json!(false));
        assert_eq!(body["function_count"], json!(1));
        assert_eq!(body["has_event_key"], json!(true));
        assert_eq!(body["has_signing_key"], json!(true));
        assert_eq!(body["has_signing_key_fallback"], json!(false));
        assert_eq!(body["mode"], json!("cloud"));
        assert!(body.get("app_id").is_none());
        assert!(body.get("signing_key_hash").is_none());
    }

    #[tokio::test]
    async fn introspection_reveals_identity_with_valid_signature() {
        let handler = handler_with(cloud_client(), vec![echo_function("echo")]);

        let mut req = ServeRequest::new("GET", "/api/inngest");
        let now = chrono::Utc::now().timestamp();
        req.headers.insert(
            HEADER_SIGNATURE.to_ascii_lowercase(),
            sign_with_key(KEY, b"", now),
        );

        let resp = handler.handle(req).await;
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["authentication_succeeded"], json!(true));
        assert_eq!(body["app_id"], json!("shop"));
        assert_eq!(body["sdk_language"], json!("rust"));
        assert_eq!(body["env"], json!("prod"));
        assert_eq!(
            body["signing_key_hash"],
            json!(sha256_hex(KEY.as_bytes()))
        );
        assert_eq!(body["event_key_hash"], json!(sha256_hex(b"ek-123")));
    }

    #[tokio::test]
    async fn first_attempt_run_returns_final_value() {
        let handler = handler_with(dev_client(), vec![echo_function("echo")]);
        let resp = handler
            .handle(call_request("shop-echo", json!({"event": {"name": "demo/ping"}})))
            .await;

        assert_eq!(resp.status, 200);
        assert_eq!(serde_json::from_slice::<Value>(&resp.body).unwrap(), json!(42));
        assert_eq!(resp.header(HEADER_REQ_VERSION), Some(REQUEST_VERSION));
        assert_eq!(resp.header(HEADER_NO_RETRY), Some("false"));
    }

    #[tokio::test]
    async fn memoized_run_skips_thunk_and_returns_value() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let observed = invoked.clone();
        let function = Function::builder("echo")
            .trigger(Trigger::event("demo/ping"))
            .handler(move |ctx| {
                let invoked = observed.clone();
                async move {
                    ctx.step
                        .run("fetch", || async move {
                            invoked.fetch_add(1, Ordering::SeqCst);
                            Ok(json!(7))
                        })
                        .await
                }
            })
            .build()
            .unwrap();

        let handler = handler_with(dev_client(), vec![function]);
        let fetch_hash = hex::encode(<sha1::Sha1 as sha1::Digest>::digest(b"fetch"));
        let resp = handler
            .handle(call_request(
                "shop-echo",
                json!({
                    "event": {"name": "demo/ping"},
                    "steps": { fetch_hash: {"data": 42} },
                }),
            ))
            .await;

        assert_eq!(resp.status, 200);
        assert_eq!(serde_json::from_slice::<Value>(&resp.body).unwrap(), json!(42));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deferred_sleep_reports_the_plan() {
        let function = Function::builder("pause")
            .trigger(Trigger::event("demo/ping"))
            .handler(|ctx| async move {
                ctx.step.sleep("pause", 300)?;
                Ok(json!(null))
            })
            .build()
            .unwrap();

        let handler = handler_with(dev_client(), vec![function]);
        let resp = handler.handle(call_request("shop-pause", json!({}))).await;

        assert_eq!(resp.status, 206);
        let plan: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(plan[0]["op"], json!("Sleep"));
        assert_eq!(plan[0]["displayName"], json!("pause"));
        assert_eq!(plan[0]["opts"]["duration"], json!("300s"));
    }

    #[tokio::test]
    async fn executed_run_rides_along_with_deferred_plan() {
        let function = Function::builder("mixed")
            .trigger(Trigger::event("demo/ping"))
            .handler(|ctx| async move {
                let loaded = ctx.step.run("load", || async { Ok(json!("rows")) }).await?;
                ctx.step.sleep("cool-off", 60)?;
                Ok(loaded)
            })
            .build()
            .unwrap();

        let handler = handler_with(dev_client(), vec![function]);
        let resp = handler.handle(call_request("shop-mixed", json!({}))).await;

        assert_eq!(resp.status, 206);
        let plan: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(plan.as_array().unwrap().len(), 2);
        assert_eq!(plan[0]["op"], json!("StepPlanned"));
        assert_eq!(plan[0]["opts"]["data"], json!("rows"));
        assert_eq!(plan[1]["op"], json!("Sleep"));
    }

    #[tokio::test]
    async fn non_retriable_error_maps_to_400_no_retry() {
        let function = Function::builder("strict")
            .trigger(Trigger::event("demo/ping"))
            .handler(|_ctx| async { Err(Error::non_retriable("bad input")) })
            .build()
            .unwrap();

        let handler = handler_with(dev_client(), vec![function]);
        let resp = handler.handle(call_request("shop-strict", json!({}))).await;

        assert_eq!(resp.status, 400);
        assert_eq!(resp.header(HEADER_NO_RETRY), Some("true"));
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["name"], json!("NonRetriableError"));
        assert_eq!(body["message"], json!("bad input"));
    }

    #[tokio::test]
    async fn retry_after_error_maps_to_500_with_header() {
        let function = Function::builder("limited")
            .trigger(Trigger::event("demo/ping"))
            .handler(|_ctx| async {
                Err(Error::RetryAfter {
                    message: "rate limited".into(),
                    after: RetryAfter::Seconds(42),
                })
            })
            .build()
            .unwrap();

        let handler = handler_with(dev_client(), vec![function]);
        let resp = handler.handle(call_request("shop-limited", json!({}))).await;

        assert_eq!(resp.status, 500);
        assert_eq!(resp.header(HEADER_NO_RETRY), Some("false"));
        assert_eq!(resp.header(HEADER_RETRY_AFTER), Some("42"));
    }

    #[tokio::test]
    async fn memoized_step_error_replays_as_terminal() {
        let function = Function::builder("echo")
            .trigger(Trigger::event("demo/ping"))
            .handler(|ctx| async move {
                ctx.step.run("fetch", || async { Ok(json!(1)) }).await
            })
            .build()
            .unwrap();

        let handler = handler_with(dev_client(), vec![function]);
        let fetch_hash = hex::encode(<sha1::Sha1 as sha1::Digest>::digest(b"fetch"));
        let resp = handler
            .handle(call_request(
                "shop-echo",
                json!({
                    "steps": { fetch_hash: {"error": {"name": "Error", "message": "db down"}} },
                }),
            ))
            .await;

        assert_eq!(resp.status, 400);
        assert_eq!(resp.header(HEADER_NO_RETRY), Some("true"));
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["name"], json!("StepError"));
    }

    #[tokio::test]
    async fn unknown_function_is_500() {
        let handler = handler_with(dev_client(), vec![echo_function("echo")]);
        let resp = handler.handle(call_request("shop-missing", json!({}))).await;
        assert_eq!(resp.status, 500);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"], json!("Function not found"));
    }

    #[tokio::test]
    async fn missing_fn_id_is_400() {
        let handler = handler_with(dev_client(), vec![echo_function("echo")]);
        let resp = handler.handle(ServeRequest::new("POST", "/api/inngest")).await;
        assert_eq!(resp.status, 400);
        assert_eq!(resp.header(HEADER_NO_RETRY), Some("true"));
    }

    #[tokio::test]
    async fn cloud_call_requires_a_valid_signature() {
        let handler = handler_with(cloud_client(), vec![echo_function("echo")])
            .with_verifier(
                SignatureVerifier::new(Mode::Cloud, Some(KEY.into()), None)
                    .with_clock(FixedClock(1_700_000_000)),
            );

        let mut req = call_request("shop-echo", json!({"event": {"name": "demo/ping"}}));
        let resp = handler.handle(req.clone()).await;
        assert_eq!(resp.status, 500);
        assert_eq!(resp.header(HEADER_NO_RETRY), Some("false"));

        req.headers.insert(
            HEADER_SIGNATURE.to_ascii_lowercase(),
            sign_with_key(KEY, &req.body, 1_700_000_000),
        );
        let resp = handler.handle(req).await;
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn batch_events_hydrate_alongside_event() {
        let function = Function::builder("batch")
            .trigger(Trigger::event("demo/ping"))
            .handler(|ctx| async move { Ok(json!(ctx.events.len())) })
            .build()
            .unwrap();

        let handler = handler_with(dev_client(), vec![function]);
        let resp = handler
            .handle(call_request(
                "shop-batch",
                json!({
                    "event": {"name": "demo/ping"},
                    "events": [{"name": "demo/ping"}, {"name": "demo/ping"}],
                }),
            ))
            .await;

        assert_eq!(serde_json::from_slice::<Value>(&resp.body).unwrap(), json!(2));
    }

    #[tokio::test]
    async fn duplicate_step_ids_plan_distinct_hashes() {
        let function = Function::builder("loop")
            .trigger(Trigger::event("demo/ping"))
            .handler(|ctx| async move {
                for _ in 0..3 {
                    ctx.step.run("s", || async { Ok(json!(1)) }).await?;
                }
                ctx.step.sleep("flush", 1)?;
                Ok(json!(null))
            })
            .build()
            .unwrap();

        let handler = handler_with(dev_client(), vec![function]);
        let resp = handler.handle(call_request("shop-loop", json!({}))).await;

        assert_eq!(resp.status, 206);
        let plan: Value = serde_json::from_slice(&resp.body).unwrap();
        let sha = |s: &str| hex::encode(<sha1::Sha1 as sha1::Digest>::digest(s.as_bytes()));
        assert_eq!(plan[0]["id"], json!(sha("s")));
        assert_eq!(plan[1]["id"], json!(sha("s:0")));
        assert_eq!(plan[2]["id"], json!(sha("s:1")));
        assert!(plan[0]["id"] != plan[1]["id"] && plan[1]["id"] != plan[2]["id"]);
    }

    #[test]
    fn plan_entries_serialize_with_display_name() {
        let step = Step::new(HashMap::new());
        step.sleep("pause", 300).unwrap();
        assert_eq!(step.planned()[0].op, StepOp::Sleep);

        let wire = serde_json::to_value(step.planned()).unwrap();
        assert_eq!(wire[0]["op"], json!("Sleep"));
        assert_eq!(wire[0]["displayName"], json!("pause"));
        assert_eq!(wire[0]["id"].as_str().unwrap().len(), 40);
    }
}
