//! Event values.
//!
//! An [`Event`] is an immutable record of something that happened in the
//! host application. Missing `id`/`ts` fields are populated at construction
//! time, so events hydrated from an inbound call payload and events built in
//! application code share one shape. The wire form omits `user` when unset.

use {
    rand::RngCore as _,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// An event record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unique event id; generated when absent.
    #[serde(default = "new_event_id")]
    pub id: String,
    /// Event name, e.g. `"shop/order.created"`.
    #[serde(default)]
    pub name: String,
    /// Arbitrary event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Optional user attribution; omitted from the wire form when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Map<String, Value>>,
    /// Milliseconds since the Unix epoch; stamped when absent.
    #[serde(default = "now_ms")]
    pub ts: i64,
}

impl Event {
    /// Build a new event with a generated id and the current timestamp.
    pub fn new(name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: new_event_id(),
            name: name.into(),
            data,
            user: None,
            ts: now_ms(),
        }
    }

    /// Attach user attribution.
    pub fn with_user(mut self, user: Map<String, Value>) -> Self {
        self.user = Some(user);
        self
    }

    /// Hydrate an event from an inbound JSON value, tolerating missing
    /// fields.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|_| Self::new("", Map::new()))
    }
}

fn new_event_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
