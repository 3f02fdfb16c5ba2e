//! The fixed set of gauges exported for zigbee2mqtt devices.

/// Label carrying the device identity on every series.
pub const IDENTITY_LABEL: &str = "name";

const IDENTITY_LABELS: &[&str] = &[IDENTITY_LABEL];

/// A gauge exported by this exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDefinition {
    /// Prometheus metric name.
    pub key: &'static str,
    /// `# HELP` text.
    pub help: &'static str,
    /// Label names attached to each series.
    pub label_names: &'static [&'static str],
}

impl MetricDefinition {
    const fn gauge(key: &'static str, help: &'static str) -> Self {
        Self {
            key,
            help,
            label_names: IDENTITY_LABELS,
        }
    }

    /// Label that carries the device identity for this gauge.
    pub fn identity_label(&self) -> &'static str {
        self.label_names.first().copied().unwrap_or(IDENTITY_LABEL)
    }
}

pub const ZIGBEE_WATT: MetricDefinition =
    MetricDefinition::gauge("zigbee_watt", "Zigbee power socket wattage");
pub const ZIGBEE_CONSUMPTION: MetricDefinition = MetricDefinition::gauge(
    "zigbee_consumption",
    "Zigbee power socket power consumption",
);
pub const ZIGBEE_STATE: MetricDefinition =
    MetricDefinition::gauge("zigbee_state", "Zigbee device state (on/off)");
pub const ZIGBEE_TEMP: MetricDefinition =
    MetricDefinition::gauge("zigbee_temp", "Zigbee device temperature");
pub const ZIGBEE_HUMIDITY: MetricDefinition =
    MetricDefinition::gauge("zigbee_humidity", "Zigbee device humidity");
pub const ZIGBEE_CO2: MetricDefinition = MetricDefinition::gauge("zigbee_co2", "Zigbee device CO2");
pub const ZIGBEE_VOC: MetricDefinition = MetricDefinition::gauge("zigbee_voc", "Zigbee device VOC");
pub const ZIGBEE_FORMALDEHYDE: MetricDefinition =
    MetricDefinition::gauge("zigbee_formaldehyde", "Zigbee device formaldehyde");
pub const ZIGBEE_PM25: MetricDefinition =
    MetricDefinition::gauge("zigbee_pm25", "Zigbee device pm25");
pub const ZIGBEE_LINK: MetricDefinition =
    MetricDefinition::gauge("zigbee_link", "Zigbee device link quality");
pub const ZIGBEE_VOLTAGE: MetricDefinition =
    MetricDefinition::gauge("zigbee_voltage", "Zigbee power socket voltage");
pub const ZIGBEE_CURRENT: MetricDefinition =
    MetricDefinition::gauge("zigbee_current", "Zigbee power socket amperage");
pub const ZIGBEE_ENERGY: MetricDefinition =
    MetricDefinition::gauge("zigbee_energy", "Zigbee power socket kWh");

/// All exported gauges, in exposition order.
const DEFINITIONS: &[MetricDefinition] = &[
    ZIGBEE_WATT,
    ZIGBEE_CONSUMPTION,
    ZIGBEE_STATE,
    ZIGBEE_TEMP,
    ZIGBEE_HUMIDITY,
    ZIGBEE_CO2,
    ZIGBEE_VOC,
    ZIGBEE_FORMALDEHYDE,
    ZIGBEE_PM25,
    ZIGBEE_LINK,
    ZIGBEE_VOLTAGE,
    ZIGBEE_CURRENT,
    ZIGBEE_ENERGY,
];

/// Immutable catalog of metric definitions.
///
/// Built once at startup and shared by the metric set; no definitions are
/// added or removed afterwards.
#[derive(Debug, Clone, Copy)]
pub struct MetricCatalog {
    definitions: &'static [MetricDefinition],
}

impl MetricCatalog {
    /// The zigbee2mqtt catalog.
    pub fn zigbee() -> Self {
        Self {
            definitions: DEFINITIONS,
        }
    }

    /// Look up a definition by metric key.
    pub fn get(&self, key: &str) -> Option<&'static MetricDefinition> {
        self.definitions.iter().find(|d| d.key == key)
    }

    /// Iterate definitions in exposition order.
    pub fn iter(&self) -> std::slice::Iter<'static, MetricDefinition> {
        self.definitions.iter()
    }

    #[cfg(test)]
    pub(crate) fn from_definitions(definitions: &'static [MetricDefinition]) -> Self {
        Self { definitions }
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::zigbee()
    }
}
