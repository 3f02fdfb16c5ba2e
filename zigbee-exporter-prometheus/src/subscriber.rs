//! MQTT subscription to zigbee2mqtt device topics.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{MqttConfig, ReconnectConfig};
use crate::error::{ExporterError, Result};
use crate::router::{MessageRouter, RouteOutcome};

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let initial = Duration::from_millis(config.initial_backoff_ms);
        Self {
            initial,
            max: Duration::from_millis(config.max_backoff_ms),
            current: initial,
            attempts: 0,
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before the next attempt, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.max_attempts > 0 && self.attempts > self.max_attempts {
            return None;
        }
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        Some(delay)
    }

    /// Forget previous failures after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// What the subscriber did with one event-loop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Broker acknowledged the connection; subscriptions must be (re)issued.
    Connected,
    /// A publish was handed to the router.
    Routed(RouteOutcome),
    Ignored,
}

/// Owns the broker connection and the device subscription list.
pub struct SubscriptionManager {
    router: MessageRouter,
    mqtt: MqttConfig,
    reconnect: ReconnectConfig,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new(router: MessageRouter, mqtt: MqttConfig, reconnect: ReconnectConfig) -> Self {
        Self {
            router,
            mqtt,
            reconnect,
        }
    }

    /// Topics subscribed on every connection.
    pub fn topics(&self) -> Vec<String> {
        self.mqtt.topics()
    }

    /// Build client options from the configuration.
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.mqtt.client_id, &self.mqtt.host, self.mqtt.port);
        options.set_keep_alive(self.mqtt.keep_alive());
        options.set_clean_session(self.mqtt.clean_session);
        if let (Some(username), Some(password)) = (&self.mqtt.username, &self.mqtt.password) {
            options.set_credentials(username, password);
        }
        options
    }

    /// Handle one event from the MQTT event loop.
    ///
    /// Publishes are routed synchronously so that every update derived from a
    /// message is visible before the next event is polled.
    pub fn handle_event(&self, event: Event) -> EventAction {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!(
                    host = %self.mqtt.host,
                    port = self.mqtt.port,
                    session_present = ack.session_present,
                    "Connected to MQTT broker"
                );
                EventAction::Connected
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let outcome = self.router.route(&publish.topic, &publish.payload);
                EventAction::Routed(outcome)
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!(pkid = ack.pkid, "Subscriptions acknowledged");
                EventAction::Ignored
            }
            _ => EventAction::Ignored,
        }
    }

    async fn subscribe_all(&self, client: &AsyncClient, topics: &[String]) -> Result<()> {
        let filters: Vec<SubscribeFilter> = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce))
            .collect();

        client
            .subscribe_many(filters)
            .await
            .map_err(|e| ExporterError::Subscribe {
                topics: topics.len(),
                message: e.to_string(),
            })?;

        info!(count = topics.len(), "Subscribed to device topics");
        for topic in topics {
            debug!(topic = %topic, "Subscribed");
        }
        Ok(())
    }

    /// Run the subscriber until the shutdown signal is received.
    ///
    /// Returns an error when the broker connection fails and the reconnect
    /// policy does not allow (or no longer allows) another attempt.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (client, mut eventloop) =
            AsyncClient::new(self.mqtt_options(), self.mqtt.channel_capacity);
        let topics = self.topics();
        let mut backoff = Backoff::new(&self.reconnect);

        info!(
            host = %self.mqtt.host,
            port = self.mqtt.port,
            client_id = %self.mqtt.client_id,
            topics = topics.len(),
            "Starting MQTT subscriber"
        );

        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(event) => {
                            if self.handle_event(event) == EventAction::Connected {
                                backoff.reset();
                                self.subscribe_all(&client, &topics).await?;
                            }
                        }
                        Err(e) => {
                            if !self.reconnect.enabled {
                                error!(error = %e, "MQTT connection error");
                                return Err(e.into());
                            }

                            let Some(delay) = backoff.next_delay() else {
                                error!(
                                    error = %e,
                                    attempts = backoff.attempts() - 1,
                                    "MQTT connection error, giving up"
                                );
                                return Err(ExporterError::transport(format!(
                                    "giving up after {} reconnect attempts: {}",
                                    backoff.attempts() - 1,
                                    e
                                )));
                            };

                            warn!(
                                error = %e,
                                attempt = backoff.attempts(),
                                delay_ms = delay.as_millis() as u64,
                                "MQTT connection error, reconnecting"
                            );

                            if wait_or_shutdown(delay, &mut shutdown).await {
                                break;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("MQTT subscriber shutting down");
        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "Disconnect request not queued");
        }
        Ok(())
    }
}

/// Sleep for `delay`; returns `true` if shutdown was requested meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
