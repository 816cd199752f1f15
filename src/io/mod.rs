//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `broker_client` - Publishing seam used by the route stream publisher
//! - `mqtt_publisher` - MQTT implementation of the broker client
//! - `consumer` - MQTT consumer for inbound route requests

pub mod broker_client;
pub mod consumer;
pub mod mqtt_publisher;

// Re-export commonly used types
pub use broker_client::{BrokerClient, PublishError};
pub use consumer::{dispatch_route_request, start_route_consumer};
pub use mqtt_publisher::MqttBrokerClient;
