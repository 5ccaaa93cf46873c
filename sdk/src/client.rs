//! The Inngest client: app identity plus event publishing.

use {
    crate::{
        config::Config,
        event::Event,
        serve::{HEADER_ENV, HEADER_SDK, SDK_IDENT},
    },
    serde_json::Value,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no event key is configured")]
    MissingEventKey,
    #[error("event publish failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Handle to an Inngest app: carries the app id and resolved config, and
/// publishes events to the event API.
#[derive(Clone, Debug)]
pub struct Inngest {
    app_id: String,
    config: Config,
    http: reqwest::Client,
}

impl Inngest {
    pub fn new(app_id: impl Into<String>, config: Config) -> Self {
        Self {
            app_id: app_id.into(),
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Build a client with config resolved from the process environment.
    pub fn from_env(app_id: impl Into<String>) -> Self {
        Self::new(app_id, Config::from_env())
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Publish a single event. Returns the event API's response body.
    pub async fn send_event(&self, event: &Event) -> Result<Value, SendError> {
        self.send_events(std::slice::from_ref(event)).await
    }

    /// Publish a batch of events. Returns the event API's response body;
    /// any non-200 status is an error.
    pub async fn send_events(&self, events: &[Event]) -> Result<Value, SendError> {
        let event_key = self.config.event_key().ok_or(SendError::MissingEventKey)?;
        let url = format!("{}/e/{event_key}", self.config.event_api_base_url());

        let mut request = self.http.post(&url).header(HEADER_SDK, SDK_IDENT).json(events);
        if let Some(env) = self.config.env() {
            request = request.header(HEADER_ENV, env);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != reqwest::StatusCode::OK {
            return Err(SendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn client(server_url: &str, event_key: Option<&str>) -> Inngest {
        let mut builder = Config::builder()
            .dev(true)
            .event_api_base_url(server_url)
            .env("test");
        if let Some(key) = event_key {
            builder = builder.event_key(key);
        }
        Inngest::new("shop", builder.build_with_env(&std::collections::HashMap::<String, String>::new()))
    }

    #[tokio::test]
    async fn send_events_posts_batch_and_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/e/test-key")
            .match_header(HEADER_SDK, SDK_IDENT)
            .match_header(HEADER_ENV, "test")
            .with_status(200)
            .with_body(r#"{"ids":["01J"],"status":200}"#)
            .create_async()
            .await;

        let client = client(&server.url(), Some("test-key"));
        let event = Event::new("shop/order.created", serde_json::Map::new());
        let body = client.send_event(&event).await.unwrap();

        mock.assert_async().await;
        assert_eq!(body["ids"], json!(["01J"]));
    }

    #[tokio::test]
    async fn non_200_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/e/test-key")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let client = client(&server.url(), Some("test-key"));
        let event = Event::new("a", serde_json::Map::new());
        let err = client.send_event(&event).await.unwrap_err();
        assert!(matches!(err, SendError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn missing_event_key_fails_before_any_request() {
        let client = client("http://localhost:1", None);
        let event = Event::new("a", serde_json::Map::new());
        assert!(matches!(
            client.send_event(&event).await,
            Err(SendError::MissingEventKey)
        ));
    }
}
