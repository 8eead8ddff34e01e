//! Runs the sample plugin.
//!
//! - no arguments: daemon mode, until Ctrl-C
//! - `<operation> [json]`: command mode, prints the output data

use std::sync::Arc;
use std::time::Duration;

use component_runtime::config::SYSTEM_ID_KEY;
use component_runtime::{
    setup_tracing, BoxError, Config, Envelope, EventBus, InMemoryConfig, RuntimeBuilder,
    TracingLogger,
};
use runtime_sample::SamplePlugin;
use serde_json::Value;
use tracing::info;

const HEARTBEAT_INTERVAL_KEY: &str = "sample.heartbeat_interval_ms";

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    setup_tracing();

    let config = InMemoryConfig::new()
        .with(SYSTEM_ID_KEY, "sample")
        .with(HEARTBEAT_INTERVAL_KEY, 1_000);
    let interval = Duration::from_millis(config.get_u64(HEARTBEAT_INTERVAL_KEY).unwrap_or(1_000));

    let bus = EventBus::new();
    let builder = RuntimeBuilder::new()
        .with_config(Arc::new(config))
        .with_event_bus(bus.clone())
        .with_logger(Arc::new(TracingLogger))
        .with_plugin(SamplePlugin::new(bus).with_heartbeat_interval(interval));

    let mut args = std::env::args().skip(1);
    match args.next() {
        Some(operation) => {
            let input = match args.next() {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Value::Null,
            };
            let output = builder.build_command(&operation, Envelope::new(input)).await?;
            println!("{}", serde_json::to_string_pretty(&output.data)?);
        }
        None => {
            info!("Starting in daemon mode; press Ctrl-C to stop");
            builder.build_daemon().await?;
        }
    }

    Ok(())
}
