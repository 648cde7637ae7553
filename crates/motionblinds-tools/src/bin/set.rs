use clap::Parser;
use motionblinds_client::{MotionClient, PositionState};
use motionblinds_tools::{parse_mac, CommonArgs};

#[derive(Parser, Debug)]
#[command(name = "blinds-set")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
    /// MAC of the blind, as printed by blinds-discover.
    #[arg(long)]
    mac: String,
    /// Target position in percent open.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    position: u8,
    /// Return once the command is sent instead of waiting for the blind.
    #[arg(long)]
    no_wait: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let config = args.common.client_config()?.with_discover_on_start(false);
    let (client, _events) = MotionClient::new(config)?;
    client.discover().await?;

    let mac = parse_mac(&args.mac);
    let device = client
        .device(&mac)
        .ok_or_else(|| format!("no blind {mac} found"))?;
    let tracker = client.track(device);
    let mut positions = tracker.subscribe();

    let state = tracker.set_target_position(args.position)?;
    println!("{mac}: {state:?} towards {}%", args.position);
    if args.no_wait || state == PositionState::Stopped {
        return Ok(());
    }

    loop {
        match positions.recv().await {
            Ok(event) if event.state == PositionState::Stopped => {
                println!("{mac}: stopped at {}%", event.current);
                break;
            }
            Ok(event) => log::debug!("{mac}: {event:?}"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
