//! Function registration ("sync").
//!
//! The orchestrator discovers an app's functions by sending a PUT to the
//! serve endpoint; the handler answers by POSTing its function configs to
//! the orchestrator's register API, authenticated with the hashed signing
//! key.

use {
    super::{ServeHandler, ServeRequest, ServeResponse, HEADER_ENV, HEADER_SDK, SDK_IDENT},
    crate::{function::Function, signature::hashed_signing_key},
    serde_json::{json, Value},
};

impl ServeHandler {
    /// PUT: push the app's function configs to the orchestrator.
    pub(super) async fn sync(&self, req: &ServeRequest) -> ServeResponse {
        let config = self.config();

        let Some(serve_url) = self.serve_url(req) else {
            return ServeResponse::json(
                500,
                &json!({
                    "error": "cannot determine the serve URL; configure a serve origin or forward the Host header",
                }),
            );
        };

        let functions: Vec<Value> = self
            .registry
            .iter()
            .map(|function| self.function_config(function, &serve_url))
            .collect();

        let payload = json!({
            "url": serve_url,
            "deployType": "ping",
            "appName": self.client.app_id(),
            "sdk": SDK_IDENT,
            "v": "0.1",
            "framework": self.framework,
            "functions": functions,
        });

        let mut register_url = format!("{}/fn/register", config.api_base_url());
        if let Some(deploy_id) = req.query.get("deployId") {
            register_url = format!("{register_url}?deployId={deploy_id}");
        }

        let mut request = self
            .http
            .post(&register_url)
            .header(HEADER_SDK, SDK_IDENT)
            .json(&payload);
        if let Some(key) = config.signing_key() {
            match hashed_signing_key(key) {
                Ok(token) => request = request.bearer_auth(token),
                Err(err) => {
                    return ServeResponse::json(500, &json!({"error": err.to_string()}));
                }
            }
        }
        if let Some(env) = config.env() {
            request = request.header(HEADER_ENV, env);
        }

        log::debug!("syncing {} function(s) to {register_url}", self.registry.len());

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                return ServeResponse::json(500, &json!({"error": err.to_string()}));
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            let modified = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("modified").and_then(Value::as_bool))
                .unwrap_or(false);
            ServeResponse::json(
                200,
                &json!({"message": "Successfully synced", "modified": modified}),
            )
        } else {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            ServeResponse::json(500, &json!({"error": message}))
        }
    }

    /// Externally visible URL of this endpoint: configured origin and path
    /// win over values derived from the inbound request.
    fn serve_url(&self, req: &ServeRequest) -> Option<String> {
        let config = self.config();

        let origin = match config.serve_origin() {
            Some(origin) => origin.to_string(),
            None => {
                let host = req.host.as_deref()?;
                let scheme = req.scheme.as_deref().unwrap_or("http");
                format!("{scheme}://{host}")
            }
        };
        let path = config.serve_path().unwrap_or(&req.path);

        Some(format!("{}{path}", origin.trim_end_matches('/')))
    }

    /// The wire record registered for one function: composite id, triggers,
    /// merged options, and a single logical step pointing back at this
    /// endpoint.
    fn function_config(&self, function: &Function, serve_url: &str) -> Value {
        let composite = function.composite_id(self.client.app_id());
        let step_url = format!("{serve_url}?fnId={composite}&stepId=step");

        let mut record = json!({
            "id": composite,
            "name": function.display_name(),
            "triggers": function.triggers(),
            "steps": {
                "step": {
                    "id": "step",
                    "name": "step",
                    "runtime": {"type": "http", "url": step_url},
                    "retries": {"attempts": function.retries() + 1},
                }
            },
        });
        if let Some(description) = function.description() {
            record["description"] = json!(description);
        }

        if let (Value::Object(record), Ok(Value::Object(options))) =
            (&mut record, serde_json::to_value(function.options()))
        {
            record.extend(options);
        }

        record
    }
}
