//! SDK configuration.
//!
//! Every field resolves in the same order: explicit builder argument, then
//! environment variable, then default. Environment reads go through the
//! [`EnvSource`] trait so tests can substitute a fixed table instead of the
//! process environment; resolution happens once at [`Config`] construction
//! and the resulting value is immutable.
//!
//! # Dev mode
//! Setting `INNGEST_DEV` to any non-empty value switches the SDK into dev
//! mode: signature checks are skipped and both base URLs default to the
//! local dev server. If the value itself is a URL, it overrides both base
//! URLs directly.

use std::collections::HashMap;

/// Non-empty `INNGEST_DEV` enables dev mode; a URL value overrides both base URLs.
pub const ENV_DEV: &str = "INNGEST_DEV";
/// Credential for event publishing.
pub const ENV_EVENT_KEY: &str = "INNGEST_EVENT_KEY";
/// Primary HMAC signing key (`signkey-<env>-<hex>`).
pub const ENV_SIGNING_KEY: &str = "INNGEST_SIGNING_KEY";
/// Secondary signing key accepted during rotation.
pub const ENV_SIGNING_KEY_FALLBACK: &str = "INNGEST_SIGNING_KEY_FALLBACK";
/// Environment label forwarded as a header on outbound calls.
pub const ENV_ENV: &str = "INNGEST_ENV";
/// Override for the API base URL.
pub const ENV_API_BASE_URL: &str = "INNGEST_API_BASE_URL";
/// Override for the event API base URL.
pub const ENV_EVENT_API_BASE_URL: &str = "INNGEST_EVENT_API_BASE_URL";
/// Externally visible origin of the serve endpoint.
pub const ENV_SERVE_ORIGIN: &str = "INNGEST_SERVE_ORIGIN";
/// Externally visible path of the serve endpoint.
pub const ENV_SERVE_PATH: &str = "INNGEST_SERVE_PATH";
/// Log verbosity for the serve runtime.
pub const ENV_LOG_LEVEL: &str = "INNGEST_LOG_LEVEL";

pub const DEFAULT_API_BASE_URL: &str = "https://api.inngest.com";
pub const DEFAULT_EVENT_API_BASE_URL: &str = "https://inn.gs";
pub const DEFAULT_DEV_SERVER_URL: &str = "http://localhost:8288";

/// Operational mode of the SDK.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Local development against a dev server; signature checks are skipped.
    Dev,
    /// Production mode; every inbound request must carry a valid signature.
    Cloud,
}

impl Mode {
    /// Wire label used in the introspection payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Cloud => "cloud",
        }
    }
}

/// Source of environment variables.
///
/// Empty values are treated as unset.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Resolved, immutable SDK configuration.
#[derive(Clone, Debug)]
pub struct Config {
    mode: Mode,
    api_base_url: String,
    event_api_base_url: String,
    event_key: Option<String>,
    signing_key: Option<String>,
    signing_key_fallback: Option<String>,
    env: Option<String>,
    serve_origin: Option<String>,
    serve_path: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Start building a config. Unset fields resolve from the environment,
    /// then from defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolve a config purely from the process environment.
    pub fn from_env() -> Self {
        Self::builder().build()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_dev(&self) -> bool {
        self.mode == Mode::Dev
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn event_api_base_url(&self) -> &str {
        &self.event_api_base_url
    }

    pub fn event_key(&self) -> Option<&str> {
        self.event_key.as_deref()
    }

    pub fn signing_key(&self) -> Option<&str> {
        self.signing_key.as_deref()
    }

    pub fn signing_key_fallback(&self) -> Option<&str> {
        self.signing_key_fallback.as_deref()
    }

    pub fn env(&self) -> Option<&str> {
        self.env.as_deref()
    }

    pub fn serve_origin(&self) -> Option<&str> {
        self.serve_origin.as_deref()
    }

    pub fn serve_path(&self) -> Option<&str> {
        self.serve_path.as_deref()
    }

    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }
}

/// Builder for [`Config`]; every setter overrides the corresponding
/// environment variable.
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    dev: Option<bool>,
    api_base_url: Option<String>,
    event_api_base_url: Option<String>,
    event_key: Option<String>,
    signing_key: Option<String>,
    signing_key_fallback: Option<String>,
    env: Option<String>,
    serve_origin: Option<String>,
    serve_path: Option<String>,
    log_level: Option<String>,
}

impl ConfigBuilder {
    /// Force dev or cloud mode regardless of `INNGEST_DEV`.
    pub fn dev(mut self, dev: bool) -> Self {
        self.dev = Some(dev);
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn event_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.event_api_base_url = Some(url.into());
        self
    }

    pub fn event_key(mut self, key: impl Into<String>) -> Self {
        self.event_key = Some(key.into());
        self
    }

    pub fn signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    pub fn signing_key_fallback(mut self, key: impl Into<String>) -> Self {
        self.signing_key_fallback = Some(key.into());
        self
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn serve_origin(mut self, origin: impl Into<String>) -> Self {
        self.serve_origin = Some(origin.into());
        self
    }

    pub fn serve_path(mut self, path: impl Into<String>) -> Self {
        self.serve_path = Some(path.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Resolve against the process environment.
    pub fn build(self) -> Config {
        self.build_with_env(&ProcessEnv)
    }

    /// Resolve against the given environment source.
    pub fn build_with_env(self, env: &dyn EnvSource) -> Config {
        let dev_var = env.var(ENV_DEV);
        let mode = match self.dev {
            Some(true) => Mode::Dev,
            Some(false) => Mode::Cloud,
            None if dev_var.is_some() => Mode::Dev,
            None => Mode::Cloud,
        };

        // A URL in INNGEST_DEV points both APIs at that server; otherwise dev
        // mode falls back to the default dev server.
        let dev_url = dev_var.filter(|v| is_url(v));
        let mode_default_base = |explicit_dev_url: &Option<String>| -> String {
            match (mode, explicit_dev_url) {
                (Mode::Dev, Some(url)) => url.trim_end_matches('/').to_string(),
                (Mode::Dev, None) => DEFAULT_DEV_SERVER_URL.to_string(),
                (Mode::Cloud, _) => String::new(),
            }
        };

        let api_base_url = self
            .api_base_url
            .or_else(|| env.var(ENV_API_BASE_URL))
            .unwrap_or_else(|| match mode {
                Mode::Dev => mode_default_base(&dev_url),
                Mode::Cloud => DEFAULT_API_BASE_URL.to_string(),
            });

        let event_api_base_url = self
            .event_api_base_url
            .or_else(|| env.var(ENV_EVENT_API_BASE_URL))
            .unwrap_or_else(|| match mode {
                Mode::Dev => mode_default_base(&dev_url),
                Mode::Cloud => DEFAULT_EVENT_API_BASE_URL.to_string(),
            });

        Config {
            mode,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            event_api_base_url: event_api_base_url.trim_end_matches('/').to_string(),
            event_key: self.event_key.or_else(|| env.var(ENV_EVENT_KEY)),
            signing_key: self.signing_key.or_else(|| env.var(ENV_SIGNING_KEY)),
            signing_key_fallback: self
                .signing_key_fallback
                .or_else(|| env.var(ENV_SIGNING_KEY_FALLBACK)),
            env: self.env.or_else(|| env.var(ENV_ENV)),
            serve_origin: self.serve_origin.or_else(|| env.var(ENV_SERVE_ORIGIN)),
            serve_path: self.serve_path.or_else(|| env.var(ENV_SERVE_PATH)),
            log_level: self.log_level.or_else(|| env.var(ENV_LOG_LEVEL)),
        }
    }
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}
