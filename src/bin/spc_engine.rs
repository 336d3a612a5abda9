//! SPC engine binary — wires storage, the sample pipeline, and Sparkplug
//! B tag intake together into a running process.
//!
//! ## Environment variables
//!
//! | Variable             | Required | Description                              |
//! |-----------------------|----------|------------------------------------------|
//! | `SPC_DB_PATH`         | No       | sled database directory (default: `./spc-data`) |
//! | `SPC_MQTT_HOST`       | No       | Sparkplug MQTT broker host (default: `localhost`) |
//! | `SPC_MQTT_PORT`       | No       | Sparkplug MQTT broker port (default: `1883`) |
//! | `SPC_TOPIC_FILTER`    | No       | Sparkplug topic filter to subscribe to (default: `spBv1.0/#`) |

use clap::Parser;
use spc_engine_core::alerts::AlertManager;
use spc_engine_core::config::{self, EngineConfig};
use spc_engine_core::engine::{ControlLimitCalculator, SamplePipeline, WindowManager};
use spc_engine_core::events::EventBus;
use spc_engine_core::intake::{MqttIntakeClient, StaticTagResolver};
use spc_engine_core::repo::sled_store::{SledCharacteristicRepo, SledSampleRepo, SledViolationRepo};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "spc-engine", about = "Statistical process control engine core")]
struct CliArgs {
    /// sled database directory
    #[arg(long, env = "SPC_DB_PATH", default_value = "./spc-data")]
    db_path: String,

    /// Sparkplug MQTT broker host
    #[arg(long, env = "SPC_MQTT_HOST", default_value = "localhost")]
    mqtt_host: String,

    /// Sparkplug MQTT broker port
    #[arg(long, env = "SPC_MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    /// Sparkplug topic filter to subscribe to
    #[arg(long, env = "SPC_TOPIC_FILTER", default_value = "spBv1.0/#")]
    topic_filter: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,spc_engine_core=debug")),
        )
        .init();

    let args = CliArgs::parse();
    config::init(EngineConfig::default());

    info!(db_path = %args.db_path, "starting spc engine");

    let db = Arc::new(sled::open(&args.db_path)?);
    let sample_repo: Arc<dyn spc_engine_core::repo::SampleRepo> = Arc::new(SledSampleRepo::open(&db)?);
    let char_repo: Arc<dyn spc_engine_core::repo::CharacteristicRepo> =
        Arc::new(SledCharacteristicRepo::open(&db)?);
    let violation_repo: Arc<dyn spc_engine_core::repo::ViolationRepo> = Arc::new(SledViolationRepo::open(&db)?);

    let event_bus = Arc::new(EventBus::new());
    let window_manager = Arc::new(WindowManager::new(
        sample_repo.clone(),
        char_repo.clone(),
        config::get().window_cache_capacity,
    ));

    let control_limit_calculator = Arc::new(ControlLimitCalculator::new(
        sample_repo.clone(),
        char_repo.clone(),
        window_manager.clone(),
        event_bus.clone(),
    ));
    let alert_manager = Arc::new(AlertManager::new(
        sample_repo.clone(),
        violation_repo,
        event_bus.clone(),
    ));

    let pipeline = Arc::new(SamplePipeline::new(
        sample_repo,
        char_repo,
        window_manager,
        control_limit_calculator,
        alert_manager,
        event_bus,
    ));

    let resolver = Arc::new(StaticTagResolver::new());
    let mut intake = MqttIntakeClient::new(
        "spc-engine",
        &args.mqtt_host,
        args.mqtt_port,
        &args.topic_filter,
        resolver,
        config::get().buffer_timeout,
    );
    intake.subscribe().await?;

    info!(
        host = %args.mqtt_host,
        port = args.mqtt_port,
        filter = %args.topic_filter,
        "subscribed to sparkplug topic filter"
    );

    intake
        .run(move |subgroup| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let context = spc_engine_core::engine::ProcessingContext {
                    source: Some("TAG".to_string()),
                    ..Default::default()
                };
                let result = pipeline
                    .process_sample(subgroup.characteristic_id, subgroup.measurements, context)
                    .await;
                if let Err(err) = result {
                    tracing::warn!(error = %err, "failed to process incoming subgroup");
                }
            });
        })
        .await?;

    Ok(())
}
