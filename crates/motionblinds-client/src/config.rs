use crate::position::{CompletionStrategy, ReportSuppression};
use crate::ClientError;
use motionblinds_core::token::{AccessKey, DEFAULT_KEY};
use motionblinds_core::{MULTICAST_GROUP, MULTICAST_PORT, UNICAST_PORT};
use motionblinds_datalink::ReconnectBackoff;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Settings for a [`MotionClient`](crate::MotionClient).
///
/// The defaults match the protocol: multicast `238.0.0.18:32101`, commands
/// on port `32100`, a five second response window and the factory key.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ClientConfig {
    /// Key the bridge session token is encrypted with. Must be 16 bytes.
    pub key: String,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub unicast_port: u16,
    /// Fixed bridge address. When unset, each bridge's address is learned
    /// from the datagrams it sends and discovery goes to the multicast group.
    pub bridge_addr: Option<IpAddr>,
    pub response_timeout: Duration,
    pub completion: CompletionStrategy,
    pub report_suppression: ReportSuppression,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Send a broadcast GetDeviceList as soon as the client starts.
    pub discover_on_start: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            multicast_group: MULTICAST_GROUP,
            multicast_port: MULTICAST_PORT,
            unicast_port: UNICAST_PORT,
            bridge_addr: None,
            response_timeout: Duration::from_secs(5),
            completion: CompletionStrategy::default(),
            report_suppression: ReportSuppression::default(),
            reconnect_initial: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(30),
            discover_on_start: true,
        }
    }
}

impl ClientConfig {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_bridge_addr(mut self, addr: IpAddr) -> Self {
        self.bridge_addr = Some(addr);
        self
    }

    pub fn with_multicast(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.multicast_group = group;
        self.multicast_port = port;
        self
    }

    pub fn with_unicast_port(mut self, port: u16) -> Self {
        self.unicast_port = port;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_completion_strategy(mut self, strategy: CompletionStrategy) -> Self {
        self.completion = strategy;
        self
    }

    pub fn with_report_suppression(mut self, suppression: ReportSuppression) -> Self {
        self.report_suppression = suppression;
        self
    }

    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }

    pub fn with_discover_on_start(mut self, enabled: bool) -> Self {
        self.discover_on_start = enabled;
        self
    }

    pub fn access_key(&self) -> Result<AccessKey, ClientError> {
        Ok(AccessKey::new(&self.key)?)
    }

    pub fn reconnect_backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff::new(self.reconnect_initial, self.reconnect_max)
    }

    /// Where broadcast discovery is sent.
    pub fn discovery_target(&self) -> SocketAddr {
        let ip = self
            .bridge_addr
            .unwrap_or(IpAddr::V4(self.multicast_group));
        SocketAddr::new(ip, self.unicast_port)
    }
}

#[cfg(test)]
mod tests {
    use super::ClientConfig;
    use crate::position::CompletionStrategy;
    use crate::ClientError;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    #[test]
    fn defaults_follow_protocol_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.multicast_group, Ipv4Addr::new(238, 0, 0, 18));
        assert_eq!(config.multicast_port, 32101);
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert!(config.access_key().is_ok());
        assert_eq!(
            config.discovery_target(),
            SocketAddr::from(([238, 0, 0, 18], 32100))
        );
        assert!(matches!(config.completion, CompletionStrategy::Poll { .. }));
    }

    #[test]
    fn fixed_bridge_address_receives_discovery() {
        let config = ClientConfig::default()
            .with_bridge_addr(IpAddr::V4(Ipv4Addr::new(192, 168, 178, 22)))
            .with_unicast_port(40000);
        assert_eq!(
            config.discovery_target(),
            SocketAddr::from(([192, 168, 178, 22], 40000))
        );
    }

    #[test]
    fn custom_multicast_group_and_backoff() {
        let config = ClientConfig::default()
            .with_multicast(Ipv4Addr::new(239, 1, 2, 3), 40101)
            .with_reconnect_backoff(Duration::from_millis(50), Duration::from_millis(120));
        assert_eq!(config.multicast_port, 40101);
        assert_eq!(
            config.discovery_target(),
            SocketAddr::from(([239, 1, 2, 3], 32100))
        );

        let mut backoff = config.reconnect_backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(120));
    }

    #[test]
    fn rejects_key_of_wrong_length() {
        let config = ClientConfig::default().with_key("abc");
        assert!(matches!(config.access_key(), Err(ClientError::Key(_))));
    }
}
