//! Metric set that stores and renders the exported gauges.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::catalog::MetricCatalog;
use crate::error::{ExporterError, Result};
use crate::router::RouteOutcome;

/// Prefix of the exporter's own statistics metrics.
const STATS_PREFIX: &str = "zigbee_exporter";

/// Last-known values of one gauge, keyed by device identity.
type Series = BTreeMap<String, f64>;

/// Ingest statistics.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Total MQTT messages handed to the router.
    pub messages_received: u64,
    /// Messages on a recognised topic with a parseable payload.
    pub messages_applied: u64,
    /// Messages whose topic was not routed.
    pub unhandled_topics: u64,
    /// Messages whose payload was not a JSON object.
    pub malformed_payloads: u64,
    /// Gauge updates written.
    pub updates_applied: u64,
    /// Field values rejected (non-numeric or non-finite).
    pub values_rejected: u64,
}

/// Thread-safe set of labeled gauges.
///
/// Every series lives for the lifetime of the process: identities are
/// created on first sighting and never evicted.
pub struct MetricSet {
    catalog: MetricCatalog,
    /// Series per metric key.
    series: RwLock<HashMap<&'static str, Series>>,
    stats: RwLock<IngestStats>,
}

impl MetricSet {
    /// Create an empty metric set over the given catalog.
    pub fn new(catalog: MetricCatalog) -> Self {
        Self {
            catalog,
            series: RwLock::new(HashMap::with_capacity(catalog.len())),
            stats: RwLock::new(IngestStats::default()),
        }
    }

    /// Set the value of `metric` for `identity`, replacing any previous value.
    pub fn set_value(&self, metric: &str, identity: &str, value: f64) -> Result<()> {
        let Some(definition) = self.catalog.get(metric) else {
            warn!(metric, identity, "Rejected update for unknown metric");
            return Err(ExporterError::UnknownMetric(metric.to_string()));
        };

        if !value.is_finite() {
            warn!(metric, identity, value, "Rejected non-finite value");
            return Err(ExporterError::NonFiniteValue {
                metric: metric.to_string(),
                identity: identity.to_string(),
                value,
            });
        }

        let mut series = self.series.write();
        series
            .entry(definition.key)
            .or_default()
            .insert(identity.to_string(), value);
        drop(series);

        trace!(metric, identity, value, "Gauge updated");
        Ok(())
    }

    /// Get the current value of `metric` for `identity`.
    pub fn get(&self, metric: &str, identity: &str) -> Option<f64> {
        self.series
            .read()
            .get(metric)
            .and_then(|s| s.get(identity))
            .copied()
    }

    /// Number of (metric, identity) series stored.
    pub fn series_count(&self) -> usize {
        self.series.read().values().map(|s| s.len()).sum()
    }

    /// Account for one routed message.
    pub fn record_outcome(&self, outcome: &RouteOutcome) {
        let mut stats = self.stats.write();
        stats.messages_received += 1;
        match outcome {
            RouteOutcome::Unhandled => stats.unhandled_topics += 1,
            RouteOutcome::Malformed => stats.malformed_payloads += 1,
            RouteOutcome::Applied { updated, rejected } => {
                stats.messages_applied += 1;
                stats.updates_applied += *updated as u64;
                stats.values_rejected += *rejected as u64;
            }
        }
    }

    /// Get ingest statistics.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }

    /// Render all gauges in Prometheus exposition format.
    ///
    /// Metrics appear in catalog order and identities in lexical order, so
    /// two renders of the same state are byte-identical.
    pub fn render(&self) -> Result<String> {
        let series = self.series.read();
        let mut output = String::with_capacity(self.catalog.len() * 128);

        for definition in self.catalog.iter() {
            writeln!(output, "# HELP {} {}", definition.key, definition.help)?;
            writeln!(output, "# TYPE {} gauge", definition.key)?;

            let Some(values) = series.get(definition.key) else {
                continue;
            };
            for (identity, value) in values {
                writeln!(
                    output,
                    "{}{{{}=\"{}\"}} {}",
                    definition.key,
                    definition.identity_label(),
                    escape_label_value(identity),
                    format_value(*value)
                )?;
            }
        }

        let series_total: usize = series.values().map(|s| s.len()).sum();
        drop(series);

        let stats = self.stats();
        writeln!(output)?;
        write_stat(&mut output, "series_total", "gauge", series_total as u64)?;
        write_stat(
            &mut output,
            "messages_received_total",
            "counter",
            stats.messages_received,
        )?;
        write_stat(
            &mut output,
            "messages_applied_total",
            "counter",
            stats.messages_applied,
        )?;
        write_stat(
            &mut output,
            "unhandled_topics_total",
            "counter",
            stats.unhandled_topics,
        )?;
        write_stat(
            &mut output,
            "malformed_payloads_total",
            "counter",
            stats.malformed_payloads,
        )?;
        write_stat(
            &mut output,
            "updates_applied_total",
            "counter",
            stats.updates_applied,
        )?;
        write_stat(
            &mut output,
            "values_rejected_total",
            "counter",
            stats.values_rejected,
        )?;

        Ok(output)
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::new(MetricCatalog::zigbee())
    }
}

/// Create a shareable metric set handle.
pub type SharedMetricSet = Arc<MetricSet>;

fn write_stat(output: &mut String, name: &str, kind: &str, value: u64) -> Result<()> {
    writeln!(output, "# TYPE {}_{} {}", STATS_PREFIX, name, kind)?;
    writeln!(output, "{}_{} {}", STATS_PREFIX, name, value)?;
    Ok(())
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a gauge value for Prometheus.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let metrics = MetricSet::default();
        metrics.set_value("zigbee_watt", "Kitchen", 42.0).unwrap();

        assert_eq!(metrics.get("zigbee_watt", "Kitchen"), Some(42.0));
        assert_eq!(metrics.get("zigbee_watt", "Garage"), None);
        assert_eq!(metrics.get("zigbee_temp", "Kitchen"), None);
        assert_eq!(metrics.series_count(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let metrics = MetricSet::default();
        metrics.set_value("zigbee_temp", "Gang", 19.5).unwrap();
        metrics.set_value("zigbee_temp", "Gang", 21.0).unwrap();

        assert_eq!(metrics.get("zigbee_temp", "Gang"), Some(21.0));
        assert_eq!(metrics.series_count(), 1);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let metrics = MetricSet::default();
        let err = metrics.set_value("zigbee_battery", "Kitchen", 90.0).unwrap_err();

        assert!(matches!(err, ExporterError::UnknownMetric(_)));
        assert_eq!(metrics.series_count(), 0);
    }

    #[test]
    fn test_non_finite_rejected() {
        let metrics = MetricSet::default();
        metrics.set_value("zigbee_watt", "Kitchen", 10.0).unwrap();

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = metrics.set_value("zigbee_watt", "Kitchen", bad).unwrap_err();
            assert!(matches!(err, ExporterError::NonFiniteValue { .. }));
        }

        assert_eq!(metrics.get("zigbee_watt", "Kitchen"), Some(10.0));
    }

    #[test]
    fn test_render_series_lines() {
        let metrics = MetricSet::default();
        metrics.set_value("zigbee_watt", "Kitchen", 42.0).unwrap();
        metrics.set_value("zigbee_state", "Kitchen", 1.0).unwrap();
        metrics.set_value("zigbee_temp", "Air Meter", 21.4).unwrap();

        let output = metrics.render().unwrap();
        assert!(output.contains("# HELP zigbee_watt Zigbee power socket wattage\n"));
        assert!(output.contains("# TYPE zigbee_watt gauge\n"));
        assert!(output.contains("zigbee_watt{name=\"Kitchen\"} 42\n"));
        assert!(output.contains("zigbee_state{name=\"Kitchen\"} 1\n"));
        assert!(output.contains("zigbee_temp{name=\"Air Meter\"} 21.4\n"));
    }

    #[test]
    fn test_render_empty_has_all_definitions() {
        let metrics = MetricSet::default();
        let output = metrics.render().unwrap();

        for definition in MetricCatalog::zigbee().iter() {
            assert!(output.contains(&format!("# TYPE {} gauge", definition.key)));
        }
        assert!(!output.contains("{name="));
    }

    #[test]
    fn test_render_is_deterministic() {
        let metrics = MetricSet::default();
        metrics.set_value("zigbee_watt", "Servers", 120.0).unwrap();
        metrics.set_value("zigbee_watt", "Koffie", 0.5).unwrap();
        metrics.set_value("zigbee_watt", "Koelkast", 80.0).unwrap();

        let first = metrics.render().unwrap();
        let second = metrics.render().unwrap();
        assert_eq!(first, second);

        // Byte order: "Koelkast" sorts before "Koffie"
        let koelkast = first.find("name=\"Koelkast\"").unwrap();
        let koffie = first.find("name=\"Koffie\"").unwrap();
        let servers = first.find("name=\"Servers\"").unwrap();
        assert!(koelkast < koffie && koffie < servers);
    }

    #[test]
    fn test_render_uses_definition_label() {
        use crate::catalog::MetricDefinition;

        const DEFINITIONS: &[MetricDefinition] = &[MetricDefinition {
            key: "zigbee_watt",
            help: "Wattage",
            label_names: &["device"],
        }];
        let metrics = MetricSet::new(MetricCatalog::from_definitions(DEFINITIONS));
        metrics.set_value("zigbee_watt", "Kitchen", 42.0).unwrap();

        let output = metrics.render().unwrap();
        assert!(output.contains("zigbee_watt{device=\"Kitchen\"} 42\n"));
        assert!(!output.contains("name="));
    }

    #[test]
    fn test_render_escapes_identity() {
        let metrics = MetricSet::default();
        metrics.set_value("zigbee_watt", "TV \"top\"", 3.0).unwrap();

        let output = metrics.render().unwrap();
        assert!(output.contains("zigbee_watt{name=\"TV \\\"top\\\"\"} 3\n"));
    }

    #[test]
    fn test_render_stats() {
        let metrics = MetricSet::default();
        metrics.record_outcome(&RouteOutcome::Unhandled);
        metrics.record_outcome(&RouteOutcome::Malformed);
        metrics.record_outcome(&RouteOutcome::Applied {
            updated: 2,
            rejected: 1,
        });

        let stats = metrics.stats();
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.messages_applied, 1);
        assert_eq!(stats.unhandled_topics, 1);
        assert_eq!(stats.malformed_payloads, 1);
        assert_eq!(stats.updates_applied, 2);
        assert_eq!(stats.values_rejected, 1);

        let output = metrics.render().unwrap();
        assert!(output.contains("zigbee_exporter_messages_received_total 3\n"));
        assert!(output.contains("zigbee_exporter_updates_applied_total 2\n"));
        assert!(output.contains("zigbee_exporter_values_rejected_total 1\n"));
        assert!(output.contains("zigbee_exporter_series_total 0\n"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
        assert_eq!(
            escape_label_value("TV (bovenste stekker)"),
            "TV (bovenste stekker)"
        );
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(-7.0), "-7");
        assert_eq!(format_value(3.14), "3.14");
        assert_eq!(format_value(0.001), "0.001");
    }
}
