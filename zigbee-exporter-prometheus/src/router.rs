//! Routing of MQTT messages to gauge updates.

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::collector::SharedMetricSet;
use crate::mapping::{FIELD_MAPPINGS, is_present};

/// Default zigbee2mqtt base topic.
pub const DEFAULT_TOPIC_PREFIX: &str = "zigbee2mqtt";

/// Result of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Topic outside the domain or without an identity segment.
    Unhandled,
    /// Payload is not a JSON object.
    Malformed,
    /// Payload was processed; `updated` gauges were written and `rejected`
    /// present fields could not be converted.
    Applied { updated: usize, rejected: usize },
}

/// Extract the device identity from a topic.
///
/// Returns the second `/` segment when the first one equals `prefix`.
/// Further segments are ignored.
pub fn parse_identity<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let mut segments = topic.split('/');
    if segments.next()? != prefix {
        return None;
    }
    segments.next().filter(|identity| !identity.is_empty())
}

/// Turns (topic, payload) pairs into metric set updates.
#[derive(Clone)]
pub struct MessageRouter {
    metrics: SharedMetricSet,
    prefix: String,
}

impl MessageRouter {
    /// Create a router for topics under `prefix`.
    pub fn new(metrics: SharedMetricSet, prefix: impl Into<String>) -> Self {
        Self {
            metrics,
            prefix: prefix.into(),
        }
    }

    /// Route a message and record the outcome in the metric set statistics.
    ///
    /// All updates derived from the payload are applied before this returns.
    pub fn route(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        let outcome = self.apply(topic, payload);
        self.metrics.record_outcome(&outcome);
        outcome
    }

    fn apply(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        let Some(identity) = parse_identity(&self.prefix, topic) else {
            debug!(topic, "Unhandled topic");
            return RouteOutcome::Unhandled;
        };

        let document = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(document)) => document,
            Ok(other) => {
                warn!(topic, kind = json_kind(&other), "Payload is not a JSON object");
                return RouteOutcome::Malformed;
            }
            Err(e) => {
                warn!(topic, error = %e, "Failed to parse payload");
                return RouteOutcome::Malformed;
            }
        };

        let mut updated = 0;
        let mut rejected = 0;

        for mapping in FIELD_MAPPINGS {
            let Some(raw) = document.get(mapping.field).filter(|v| is_present(v)) else {
                continue;
            };

            let Some(value) = mapping.transform.apply(raw) else {
                warn!(
                    topic,
                    field = mapping.field,
                    value = %raw,
                    "Field value is not numeric"
                );
                rejected += 1;
                continue;
            };

            match self.metrics.set_value(mapping.metric.key, identity, value) {
                Ok(()) => updated += 1,
                Err(_) => rejected += 1,
            }
        }

        trace!(topic, identity, updated, rejected, "Message routed");
        RouteOutcome::Applied { updated, rejected }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
