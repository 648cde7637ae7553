use clap::Parser;
use motionblinds_client::{ClientEvent, MotionClient};
use motionblinds_tools::{describe_device, CommonArgs};

#[derive(Parser, Debug)]
#[command(name = "blinds-listen")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (_client, mut events) = MotionClient::new(args.common.client_config()?)?;

    println!("Listening for bridges and blinds (Ctrl+C to stop)...");
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::BridgeAdded(bridge) => {
                println!("BRIDGE: {} at {}", bridge.mac(), bridge.address());
            }
            ClientEvent::DeviceAdded(device) => {
                println!("DEVICE: {}", describe_device(&device));
                let mut updates = device.subscribe();
                tokio::spawn(async move {
                    while let Ok(update) = updates.recv().await {
                        let fields: Vec<_> =
                            update.changes.iter().map(|(field, _)| field.as_str()).collect();
                        println!(
                            "UPDATE ({:?}): {} changed={fields:?}",
                            update.origin,
                            describe_device(&device)
                        );
                    }
                });
            }
        }
    }
    Ok(())
}
