//! Coverage of the Sparkplug payload/topic layer wired into tag intake,
//! independent of any live MQTT broker: a decoded payload should route
//! through a tag resolver into a completed subgroup exactly as it would
//! off the wire.

use chrono::Utc;
use spc_engine_core::intake::{StaticTagResolver, SubgroupBufferPool, TagResolver, TriggerStrategy};
use spc_engine_core::sparkplug::{
    decode_payload, encode_payload, topic_matches, Metric, MetricValue, SparkplugPayload, SparkplugTopic,
};
use spc_engine_core::types::CharacteristicId;

#[test]
fn decoded_device_metric_resolves_and_completes_a_subgroup() {
    let mut resolver = StaticTagResolver::new();
    let char_id = CharacteristicId(11);
    resolver.register("PlantA/Line1/Gauge7", "Diameter", char_id);

    let payload = SparkplugPayload {
        timestamp: 1_700_000_000_000,
        seq: 1,
        metrics: vec![Metric {
            name: "Diameter".into(),
            timestamp: 1_700_000_000_001,
            value: MetricValue::Float(12.01),
        }],
    };
    let wire = encode_payload(&payload);
    let decoded = decode_payload(&wire).unwrap();

    let topic = SparkplugTopic::parse("spBv1.0/PlantA/DDATA/Line1/Gauge7").unwrap();
    assert!(topic_matches("spBv1.0/#", "spBv1.0/PlantA/DDATA/Line1/Gauge7"));

    let mut buffers = SubgroupBufferPool::new(std::time::Duration::from_secs(60));
    buffers.set_strategy(char_id, TriggerStrategy::OnTrigger { subgroup_size: 1 });

    let metric = &decoded.metrics[0];
    let resolved = resolver.resolve(&topic, &metric.name).unwrap();
    assert_eq!(resolved, char_id);

    let completed = buffers.push(resolved, metric.value.as_f64().unwrap(), Utc::now());
    assert_eq!(completed, Some(vec![12.01]));
}

#[test]
fn unresolved_metric_is_silently_dropped() {
    let resolver = StaticTagResolver::new();
    let topic = SparkplugTopic::parse("spBv1.0/PlantA/NDATA/Line1").unwrap();
    assert!(resolver.resolve(&topic, "UnknownTag").is_none());
}
