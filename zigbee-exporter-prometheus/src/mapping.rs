//! Mapping from zigbee2mqtt payload fields to exported gauges.

use serde_json::Value;

use crate::catalog::{
    MetricDefinition, ZIGBEE_CO2, ZIGBEE_CONSUMPTION, ZIGBEE_CURRENT, ZIGBEE_ENERGY,
    ZIGBEE_FORMALDEHYDE, ZIGBEE_HUMIDITY, ZIGBEE_LINK, ZIGBEE_PM25, ZIGBEE_STATE, ZIGBEE_TEMP,
    ZIGBEE_VOC, ZIGBEE_VOLTAGE, ZIGBEE_WATT,
};

/// How a payload value is converted into a gauge value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTransform {
    /// JSON number passed through as `f64`.
    Numeric,
    /// `"ON"` becomes 1, anything else 0.
    OnOff,
}

impl FieldTransform {
    /// Convert a payload value.
    ///
    /// Returns `None` when the value cannot be represented as a gauge
    /// (e.g. a string in a numeric field).
    pub fn apply(&self, value: &Value) -> Option<f64> {
        match self {
            FieldTransform::Numeric => value.as_f64(),
            FieldTransform::OnOff => Some(if value.as_str() == Some("ON") {
                1.0
            } else {
                0.0
            }),
        }
    }
}

/// One row of the field table.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    /// Key in the device payload.
    pub field: &'static str,
    /// Gauge updated from that key.
    pub metric: MetricDefinition,
    pub transform: FieldTransform,
}

impl FieldMapping {
    const fn numeric(field: &'static str, metric: MetricDefinition) -> Self {
        Self {
            field,
            metric,
            transform: FieldTransform::Numeric,
        }
    }
}

/// Payload fields recognised by the exporter.
///
/// `formaldehyd` is spelled the way zigbee2mqtt publishes it.
pub const FIELD_MAPPINGS: &[FieldMapping] = &[
    FieldMapping::numeric("power", ZIGBEE_WATT),
    FieldMapping::numeric("consumption", ZIGBEE_CONSUMPTION),
    FieldMapping {
        field: "state",
        metric: ZIGBEE_STATE,
        transform: FieldTransform::OnOff,
    },
    FieldMapping::numeric("temperature", ZIGBEE_TEMP),
    FieldMapping::numeric("humidity", ZIGBEE_HUMIDITY),
    FieldMapping::numeric("co2", ZIGBEE_CO2),
    FieldMapping::numeric("voc", ZIGBEE_VOC),
    FieldMapping::numeric("formaldehyd", ZIGBEE_FORMALDEHYDE),
    FieldMapping::numeric("pm25", ZIGBEE_PM25),
    FieldMapping::numeric("linkquality", ZIGBEE_LINK),
    FieldMapping::numeric("voltage", ZIGBEE_VOLTAGE),
    FieldMapping::numeric("current", ZIGBEE_CURRENT),
    FieldMapping::numeric("energy", ZIGBEE_ENERGY),
];

/// Check whether a payload value counts as present.
///
/// `null`, `false`, zero and the empty string are treated as absent, so a
/// device reporting `0` leaves the previously stored reading untouched.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
