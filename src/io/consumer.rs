//! MQTT consumer for route requests
//!
//! Each inbound message on the input topic becomes its own route stream
//! task. Streams run concurrently; ordering only holds within one stream.

use crate::infra::config::Config;
use crate::services::publisher::{PositionStreamPublisher, StreamError, StreamReport};
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Spawn a route stream for one inbound payload
///
/// Decode and export errors are logged here; the stream itself never
/// panics the consumer.
pub fn dispatch_route_request(
    streams: &mut JoinSet<Result<StreamReport, StreamError>>,
    publisher: Arc<PositionStreamPublisher>,
    topic: String,
    payload: Bytes,
    shutdown: watch::Receiver<bool>,
) {
    streams.spawn(async move {
        let result = publisher.handle(&payload, shutdown).await;
        match &result {
            Err(e @ StreamError::Decode(_)) => {
                error!(topic = %topic, error = %e, payload_len = %payload.len(), "route_request_rejected");
            }
            Err(e @ StreamError::Export { route_id, .. }) => {
                error!(topic = %topic, route_id = %route_id, error = %e, "route_request_rejected");
            }
            // Publish aborts and successful streams are logged by the publisher
            _ => {}
        }
        result
    });
}

/// Start the MQTT consumer and stream every route request it receives
///
/// Runs until the shutdown signal is set, then waits for in-flight streams
/// to stop. Streams observe the same shutdown signal and stop before their
/// next publish.
pub async fn start_route_consumer(
    config: &Config,
    publisher: Arc<PositionStreamPublisher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-sub-{}", config.mqtt_client_id(), std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let topic = config.input_topic().to_string();
    let mut streams = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(in_flight = %streams.len(), "route_consumer_shutdown");
                    while streams.join_next().await.is_some() {}
                    return Ok(());
                }
            }
            // Reap finished streams so the set does not grow unbounded
            Some(joined) = streams.join_next(), if !streams.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "route_stream_task_failed");
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean sessions drop subscriptions, so subscribe on every connect
                        client.try_subscribe(topic.as_str(), QoS::AtLeastOnce)?;
                        info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "route_consumer_subscribed");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        info!(topic = %publish.topic, payload_len = %publish.payload.len(), "route_request_received");
                        dispatch_route_request(
                            &mut streams,
                            publisher.clone(),
                            publish.topic,
                            publish.payload,
                            shutdown.clone(),
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "route_consumer_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
