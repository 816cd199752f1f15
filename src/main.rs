//! Route simulator - replays route requests as paced position events
//!
//! Consumes route requests from an MQTT topic and, for each one, publishes
//! the route's positions to an output topic at a fixed cadence.
//!
//! Module structure:
//! - `domain/` - Route, Position, PositionEvent and route providers
//! - `io/` - MQTT consumer and broker client
//! - `services/` - Position stream publisher
//! - `infra/` - Config, metrics, embedded broker

use clap::Parser;
use route_simulator::domain::FileRouteProvider;
use route_simulator::infra::{Config, Metrics};
use route_simulator::io::{start_route_consumer, MqttBrokerClient};
use route_simulator::services::PositionStreamPublisher;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Route simulator - streams vehicle positions for requested routes
#[derive(Parser, Debug)]
#[command(name = "route-simulator", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Default: INFO, use RUST_LOG=debug to see every published position
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(git_hash = %env!("GIT_HASH"), "route-simulator starting");

    let config = Config::load_from_path(&args.config);

    route_simulator::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        input_topic = %config.input_topic(),
        output_topic = %config.output_topic(),
        pacing_interval_ms = %config.pacing_interval_ms(),
        failure_policy = ?config.failure_policy(),
        publish_retries = %config.publish_retries(),
        destinations_dir = %config.destinations_dir(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let provider = Arc::new(FileRouteProvider::new(config.destinations_dir()));
    let broker = Arc::new(MqttBrokerClient::new(&config));
    let publisher = Arc::new(PositionStreamPublisher::new(
        provider,
        broker,
        config.publisher_settings(),
        metrics.clone(),
    ));

    // Periodic metrics summary
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics.report().log();
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    start_route_consumer(&config, publisher, shutdown_rx).await?;

    info!("route-simulator shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_flag() {
        let args = Args::try_parse_from(["route-simulator", "--config", "config/prod.toml"]).unwrap();
        assert_eq!(args.config, "config/prod.toml");

        let args = Args::try_parse_from(["route-simulator", "--config=config/staging.toml"]).unwrap();
        assert_eq!(args.config, "config/staging.toml");
        assert!(!args.json_logs);
    }

    #[test]
    fn test_config_default_path() {
        // Only meaningful when the environment does not override it
        if std::env::var_os("CONFIG_FILE").is_none() {
            let args = Args::try_parse_from(["route-simulator"]).unwrap();
            assert_eq!(args.config, "config/dev.toml");
        }
    }
}
