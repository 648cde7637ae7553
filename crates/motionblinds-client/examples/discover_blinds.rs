//! Discover Motion bridges and their blinds on the local network.
//!
//! Usage:
//!   cargo run -p motionblinds-client --example discover_blinds

use motionblinds_client::{ClientConfig, MotionClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Listen on 238.0.0.18:32101 without the automatic discovery.
    let config = ClientConfig::default().with_discover_on_start(false);
    let (client, _events) = MotionClient::new(config)?;

    // Broadcast GetDeviceList and collect answers for the response window.
    let bridges = client.discover().await?;

    if bridges.is_empty() {
        println!("No bridges found.");
    } else {
        for bridge in &bridges {
            println!("Bridge {} at {}", bridge.mac(), bridge.address());
            for device in bridge.devices() {
                let position = device
                    .current_position()
                    .map_or_else(|| "unknown".to_string(), |p| format!("{}%", p.percent()));
                println!("  Blind {} open {position}", device.mac());
            }
        }
        println!("\nDiscovered {} bridge(s).", bridges.len());
    }

    Ok(())
}
