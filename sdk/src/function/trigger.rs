//! Function triggers.

use serde::{Deserialize, Serialize};

/// What causes a function to run: an event match or a cron schedule.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Trigger {
    Event {
        event: String,
        /// Optional match expression evaluated by the orchestrator.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
    },
    Cron { cron: String },
}

impl Trigger {
    /// Trigger on every event with the given name.
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event {
            event: name.into(),
            expression: None,
        }
    }

    /// Trigger on events with the given name matching `expression`.
    pub fn event_if(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::Event {
            event: name.into(),
            expression: Some(expression.into()),
        }
    }

    /// Trigger on a cron schedule.
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            cron: expression.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn event_trigger_wire_form() {
        let wire = serde_json::to_value(Trigger::event("shop/order.created")).unwrap();
        assert_eq!(wire, json!({"event": "shop/order.created"}));

        let wire =
            serde_json::to_value(Trigger::event_if("shop/order.created", "event.data.total > 100"))
                .unwrap();
        assert_eq!(
            wire,
            json!({"event": "shop/order.created", "expression": "event.data.total > 100"})
        );
    }

    #[test]
    fn cron_trigger_wire_form() {
        let wire = serde_json::to_value(Trigger::cron("0 9 * * 1")).unwrap();
        assert_eq!(wire, json!({"cron": "0 9 * * 1"}));
    }

    #[test]
    fn wire_form_parses_back() {
        let trigger: Trigger = serde_json::from_value(json!({"cron": "* * * * *"})).unwrap();
        assert_eq!(trigger, Trigger::cron("* * * * *"));
    }
}
