//! Route request tool
//!
//! Publishes a single route request to the simulator's input topic and,
//! optionally, prints the resulting position events until the route finishes.
//!
//! Usage:
//!   cargo run --bin route-request -- --route-id 1 --client-id demo
//!   cargo run --bin route-request -- --route-id 1 --client-id demo --follow

use clap::Parser;
use route_simulator::domain::{PositionEvent, Route};
use route_simulator::infra::Config;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "route-request")]
#[command(about = "Send a route request to the route simulator")]
struct Args {
    /// Path to TOML configuration file (broker address and topics)
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Route to replay (matches a file in the destinations directory)
    #[arg(short, long)]
    route_id: String,

    /// Client that requested the route
    #[arg(long, default_value = "route-request")]
    client_id: String,

    /// Print position events for this request until the route finishes
    #[arg(short, long)]
    follow: bool,

    /// Give up following after this many seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    let route = Route::new(args.route_id.as_str(), args.client_id.as_str());
    let payload = serde_json::to_vec(&route)?;

    let client_id = format!("route-request-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqtt_options.set_credentials(username, password);
    }
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    if args.follow {
        client.subscribe(config.output_topic(), QoS::AtLeastOnce).await?;
    }
    client.publish(config.input_topic(), QoS::AtLeastOnce, false, payload).await?;
    println!(
        "[SEND] route {} for client {} -> {}",
        route.route_id,
        route.client_id,
        config.input_topic()
    );

    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                eprintln!("[TIMEOUT] no finished position within {}s", args.timeout_secs);
                return Ok(());
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::PubAck(_))) if !args.follow => {
                        println!("[DONE] request acknowledged by broker");
                        return Ok(());
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Ok(event) = serde_json::from_slice::<PositionEvent>(&publish.payload) else {
                            continue;
                        };
                        if event.route_id != route.route_id || event.client_id != route.client_id {
                            continue;
                        }
                        println!(
                            "[POS] lat={:.5} lng={:.5}{}",
                            event.position[0],
                            event.position[1],
                            if event.finished { " (finished)" } else { "" }
                        );
                        if event.finished {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        eprintln!("[MQTT] {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
