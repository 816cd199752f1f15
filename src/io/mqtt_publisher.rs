//! MQTT broker client for position events

use crate::domain::types::PositionEvent;
use crate::infra::config::Config;
use crate::io::broker_client::{BrokerClient, PublishError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Publishes position events as JSON over MQTT
///
/// The rumqttc client is cheap to clone and safe to share between
/// concurrent route streams.
pub struct MqttBrokerClient {
    client: AsyncClient,
    qos: QoS,
}

impl MqttBrokerClient {
    /// Create a new MQTT broker client
    ///
    /// Connects to the broker at the configured MQTT host/port. The event
    /// loop runs on a spawned task, so this must be called inside a runtime.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("{}-pub-{}", config.mqtt_client_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_publisher_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_publisher_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_publisher_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, qos: config.qos() }
    }
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn publish(&self, event: &PositionEvent, topic: &str) -> Result<(), PublishError> {
        let json = event.to_json()?;
        self.client.publish(topic, self.qos, false, json.into_bytes()).await?;
        Ok(())
    }
}
