//! Sparkplug B protocol support: topic namespace parsing/matching and
//! payload encoding/decoding, used by tag intake to turn MQTT traffic
//! into measurement subgroups.

pub mod codec;
pub mod topic;

pub use codec::{decode_payload, encode_payload, DecodeError, Metric, MetricValue, SparkplugPayload};
pub use topic::{topic_matches, MessageType, SparkplugTopic, TopicError};
