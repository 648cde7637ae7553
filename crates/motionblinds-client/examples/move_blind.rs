//! Move a blind and wait until it comes to rest.
//!
//! Usage:
//!   cargo run -p motionblinds-client --example move_blind -- <mac> <percent-open>

use motionblinds_client::{ClientConfig, Mac, MotionClient, PositionState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mac = Mac::from(args.next().ok_or("missing blind mac")?);
    let target: u8 = args.next().ok_or("missing target position")?.parse()?;

    let config = ClientConfig::default().with_discover_on_start(false);
    let (client, _events) = MotionClient::new(config)?;
    client.discover().await?;

    let device = client.device(&mac).ok_or("blind not found")?;
    let tracker = client.track(device);
    let mut positions = tracker.subscribe();

    if tracker.set_target_position(target)? == PositionState::Stopped {
        println!("Already at {target}%.");
        return Ok(());
    }
    while let Ok(event) = positions.recv().await {
        println!("{event:?}");
        if event.state == PositionState::Stopped {
            break;
        }
    }

    Ok(())
}
