//! Sparkplug B tag intake over MQTT: subscribes to a Sparkplug topic
//! filter, decodes incoming payloads, and hands completed subgroups to a
//! caller-supplied sink. Reconnection uses the same capped exponential
//! backoff shape as the engine's other long-lived network clients.

use super::subgroup_buffer::SubgroupBufferPool;
use crate::sparkplug::{decode_payload, topic_matches, SparkplugTopic};
use crate::types::CharacteristicId;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}

/// Maps a Sparkplug metric name (scoped to a given topic) to the
/// characteristic it feeds. Returns `None` for metrics this intake isn't
/// tracking, which are silently dropped.
pub trait TagResolver: Send + Sync {
    fn resolve(&self, topic: &SparkplugTopic, metric_name: &str) -> Option<CharacteristicId>;
}

/// A resolver backed by a fixed `"group/edge_node[/device]/metric" ->
/// CharacteristicId` table, the common case for a statically configured
/// plant floor.
pub struct StaticTagResolver {
    table: HashMap<String, CharacteristicId>,
}

impl StaticTagResolver {
    pub fn new() -> Self {
        Self { table: HashMap::new() }
    }

    pub fn register(&mut self, topic_key: impl Into<String>, metric_name: &str, char_id: CharacteristicId) {
        self.table.insert(format!("{}/{}", topic_key.into(), metric_name), char_id);
    }
}

impl Default for StaticTagResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TagResolver for StaticTagResolver {
    fn resolve(&self, topic: &SparkplugTopic, metric_name: &str) -> Option<CharacteristicId> {
        let key = match &topic.device {
            Some(device) => format!("{}/{}/{}/{}", topic.group, topic.edge_node, device, metric_name),
            None => format!("{}/{}/{}", topic.group, topic.edge_node, metric_name),
        };
        self.table.get(&key).copied()
    }
}

/// Completed subgroup ready for the sample pipeline.
#[derive(Debug, Clone)]
pub struct IntakeSubgroup {
    pub characteristic_id: CharacteristicId,
    pub measurements: Vec<f64>,
}

const INITIAL_RECONNECT_DELAY_SECS: u64 = 2;
const MAX_RECONNECT_DELAY_SECS: u64 = 60;
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Drives one MQTT connection's event loop, decoding Sparkplug payloads
/// into measurement subgroups.
pub struct MqttIntakeClient {
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
    topic_filter: String,
    resolver: Arc<dyn TagResolver>,
    buffers: Mutex<SubgroupBufferPool>,
}

impl MqttIntakeClient {
    pub fn new(
        client_id: &str,
        host: &str,
        port: u16,
        topic_filter: impl Into<String>,
        resolver: Arc<dyn TagResolver>,
        buffer_timeout: Duration,
    ) -> Self {
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(opts, 256);
        Self {
            client,
            eventloop,
            topic_filter: topic_filter.into(),
            resolver,
            buffers: Mutex::new(SubgroupBufferPool::new(buffer_timeout)),
        }
    }

    pub async fn subscribe(&self) -> Result<(), IntakeError> {
        self.client.subscribe(&self.topic_filter, QoS::AtLeastOnce).await?;
        Ok(())
    }

    /// Run the event loop, invoking `sink` for each completed subgroup.
    /// Reconnects with a capped exponential backoff on transport errors;
    /// gives up after `MAX_RECONNECT_ATTEMPTS` consecutive failures.
    pub async fn run(&mut self, mut sink: impl FnMut(IntakeSubgroup)) -> Result<(), IntakeError> {
        let mut reconnect_attempts = 0u32;

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    reconnect_attempts = 0;
                    self.handle_publish(&publish.topic, &publish.payload, &mut sink).await;
                }
                Ok(_) => {
                    reconnect_attempts = 0;
                }
                Err(err) => {
                    reconnect_attempts += 1;
                    if reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
                        tracing::error!(
                            attempts = reconnect_attempts,
                            "sparkplug intake reconnection exhausted"
                        );
                        return Err(IntakeError::ReconnectExhausted(MAX_RECONNECT_ATTEMPTS));
                    }
                    let delay = (INITIAL_RECONNECT_DELAY_SECS * 2u64.saturating_pow(reconnect_attempts - 1))
                        .min(MAX_RECONNECT_DELAY_SECS);
                    tracing::warn!(
                        attempt = reconnect_attempts,
                        delay_secs = delay,
                        error = %err,
                        "sparkplug intake connection error, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
            }
        }
    }

    async fn handle_publish(&self, topic_str: &str, payload: &[u8], sink: &mut impl FnMut(IntakeSubgroup)) {
        if !topic_matches(&self.topic_filter, topic_str) {
            return;
        }
        let topic = match SparkplugTopic::parse(topic_str) {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(topic = topic_str, error = %err, "unparseable sparkplug topic, dropping");
                return;
            }
        };
        let decoded = match decode_payload(payload) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(topic = topic_str, error = %err, "undecodable sparkplug payload, dropping");
                return;
            }
        };

        let now = decoded
            .timestamp
            .try_into()
            .ok()
            .and_then(|millis: i64| chrono::DateTime::from_timestamp_millis(millis))
            .unwrap_or_else(chrono::Utc::now);

        let mut buffers = self.buffers.lock().await;
        for metric in &decoded.metrics {
            let Some(char_id) = self.resolver.resolve(&topic, &metric.name) else {
                continue;
            };
            let Some(value) = metric.value.as_f64() else {
                tracing::warn!(metric = %metric.name, "non-numeric sparkplug metric, dropping");
                continue;
            };
            if let Some(measurements) = buffers.push(char_id, value, now) {
                sink(IntakeSubgroup {
                    characteristic_id: char_id,
                    measurements,
                });
            }
        }
    }

    /// Periodic timeout sweep; meant to be driven by an external ticker
    /// alongside `run()`.
    pub async fn sweep_timeouts(&self, sink: &mut impl FnMut(IntakeSubgroup)) {
        let now = chrono::Utc::now();
        let mut buffers = self.buffers.lock().await;
        for (char_id, measurements) in buffers.sweep_timeouts(now) {
            sink(IntakeSubgroup {
                characteristic_id: char_id,
                measurements,
            });
        }
    }
}
