use clap::{Args, ValueEnum};
use motionblinds_client::{ClientConfig, CompletionStrategy, Device, Mac};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// CLI-friendly names for the position completion strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompletionArg {
    /// Re-read the blind every 500 ms until it is at rest.
    Poll,
    /// Wait for the blind to push a stopped report.
    TrustReports,
}

impl CompletionArg {
    pub fn into_strategy(self) -> CompletionStrategy {
        match self {
            Self::Poll => CompletionStrategy::poll(),
            Self::TrustReports => CompletionStrategy::trust_reports(),
        }
    }
}

/// Options shared by every tool.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// JSON file with a full client configuration. Flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Talk to the bridge at this address instead of the multicast group.
    #[arg(long)]
    pub bridge: Option<IpAddr>,
    /// 16 character key from the Motion app.
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    #[arg(long, value_enum)]
    pub strategy: Option<CompletionArg>,
}

impl CommonArgs {
    /// Builds the client configuration: file first, then flag overrides.
    pub fn client_config(&self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
            None => ClientConfig::default(),
        };
        if let Some(bridge) = self.bridge {
            config = config.with_bridge_addr(bridge);
        }
        if let Some(key) = &self.key {
            config = config.with_key(key.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_response_timeout(Duration::from_secs(secs));
        }
        if let Some(strategy) = self.strategy {
            config = config.with_completion_strategy(strategy.into_strategy());
        }
        config.access_key()?;
        Ok(config)
    }
}

/// One-line summary of a blind.
pub fn describe_device(device: &Device) -> String {
    let position = device
        .current_position()
        .map_or_else(|| "?".to_string(), |p| format!("{}%", p.percent()));
    let operation = device
        .operation()
        .map_or_else(|| "?".to_string(), |op| format!("{op:?}"));
    format!(
        "{} bridge={} position={position} operation={operation}",
        device.mac(),
        device.bridge_mac()
    )
}

/// JSON form of a blind, for `--json` output.
pub fn device_json(device: &Device) -> serde_json::Value {
    serde_json::json!({
        "mac": device.mac().as_str(),
        "bridge": device.bridge_mac().as_str(),
        "position": device.current_position().map(|p| p.percent()),
        "state": device.state(),
    })
}

pub fn parse_mac(value: &str) -> Mac {
    Mac::from(value.to_ascii_lowercase())
}
