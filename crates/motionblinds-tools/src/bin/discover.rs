use clap::Parser;
use motionblinds_client::MotionClient;
use motionblinds_tools::{describe_device, device_json, CommonArgs};

#[derive(Parser, Debug)]
#[command(name = "blinds-discover")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let config = args.common.client_config()?.with_discover_on_start(false);
    let (client, _events) = MotionClient::new(config)?;

    let bridges = client.discover().await?;
    if args.json {
        let out: Vec<_> = bridges
            .iter()
            .map(|bridge| {
                let devices: Vec<_> = bridge.devices().iter().map(|d| device_json(d)).collect();
                serde_json::json!({
                    "mac": bridge.mac().as_str(),
                    "address": bridge.address().to_string(),
                    "fwVersion": bridge.info().fw_version,
                    "protocolVersion": bridge.info().protocol_version,
                    "devices": devices,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for (i, bridge) in bridges.iter().enumerate() {
            println!("{i}: bridge {} at {}", bridge.mac(), bridge.address());
            for device in bridge.devices() {
                println!("    {}", describe_device(&device));
            }
        }
    }
    Ok(())
}
