//! Tag intake: turns raw Sparkplug MQTT traffic into completed
//! measurement subgroups for the sample pipeline.

pub mod mqtt_client;
pub mod subgroup_buffer;

pub use mqtt_client::{IntakeError, IntakeSubgroup, MqttIntakeClient, StaticTagResolver, TagResolver};
pub use subgroup_buffer::{SubgroupBufferPool, TriggerStrategy};
