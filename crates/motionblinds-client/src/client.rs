use crate::bridge::{update_devices, BridgeLink};
use crate::position::PositionTracker;
use crate::queue::{command_queue, CommandQueue, PendingCall, Response};
use crate::{Bridge, ClientConfig, ClientError, Device};
use motionblinds_core::message::{Message, MessageType, Request};
use motionblinds_core::token::AccessKey;
use motionblinds_core::types::{DeviceType, Mac};
use motionblinds_datalink::{create_multicast_listener, MulticastListener, SocketBinder, UdpBinder};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Announcements raised as the client learns about the network.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A bridge answered its first state read.
    BridgeAdded(Arc<Bridge>),
    /// A device received its first state.
    DeviceAdded(Arc<Device>),
}

#[derive(Debug)]
pub struct ClientEvents {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ClientEvents {
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    key: AccessKey,
    queue: CommandQueue,
    bridges: RwLock<BTreeMap<Mac, Arc<Bridge>>>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

/// Entry point: tracks every bridge and device heard on the network.
///
/// Background tasks (command queue, multicast listener, discovery) stop when
/// the client is dropped.
#[derive(Debug)]
pub struct MotionClient {
    inner: Arc<ClientInner>,
    tasks: Vec<JoinHandle<()>>,
}

impl MotionClient {
    /// Starts a client on real UDP sockets.
    pub fn new(config: ClientConfig) -> Result<(Self, ClientEvents), ClientError> {
        Self::with_binder(UdpBinder::new(), config)
    }

    /// Starts a client on sockets opened by `binder`. Must be called from
    /// within a tokio runtime.
    pub fn with_binder<B: SocketBinder>(
        binder: B,
        config: ClientConfig,
    ) -> Result<(Self, ClientEvents), ClientError> {
        let key = config.access_key()?;
        let binder = Arc::new(binder);
        let (queue, queue_driver) = command_queue(binder.clone());
        let (listener, listener_driver) = create_multicast_listener(
            binder,
            config.multicast_group,
            config.multicast_port,
            config.reconnect_backoff(),
        );
        let (events, rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            config,
            key,
            queue,
            bridges: RwLock::new(BTreeMap::new()),
            events,
        });

        let mut tasks = vec![
            tokio::spawn(queue_driver),
            tokio::spawn(listener_driver),
            tokio::spawn(route_multicast(inner.clone(), listener)),
        ];
        if inner.config.discover_on_start {
            let inner = inner.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = inner.discover().await {
                    log::warn!("initial discovery failed: {e}");
                }
            }));
        }

        Ok((Self { inner, tasks }, ClientEvents { rx }))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Broadcasts GetDeviceList, collects every bridge that answers within
    /// the response window, and reads the state of the bridges and blinds
    /// found.
    pub async fn discover(&self) -> Result<Vec<Arc<Bridge>>, ClientError> {
        self.inner.discover().await
    }

    pub fn bridges(&self) -> Vec<Arc<Bridge>> {
        self.inner.bridges()
    }

    pub fn bridge(&self, mac: &Mac) -> Option<Arc<Bridge>> {
        self.inner.bridge(mac)
    }

    /// Finds a device behind any known bridge.
    pub fn device(&self, mac: &Mac) -> Option<Arc<Device>> {
        self.inner.device(mac)
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner
            .bridges()
            .iter()
            .flat_map(|bridge| bridge.devices())
            .collect()
    }

    /// Creates a position tracker for `device` using the configured
    /// completion strategy and report suppression.
    pub fn track(&self, device: Arc<Device>) -> PositionTracker {
        PositionTracker::new(
            device,
            self.inner.config.completion,
            self.inner.config.report_suppression,
        )
    }
}

impl Drop for MotionClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl ClientInner {
    fn bridges(&self) -> Vec<Arc<Bridge>> {
        self.bridges
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn bridge(&self, mac: &Mac) -> Option<Arc<Bridge>> {
        self.bridges
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(mac)
            .cloned()
    }

    fn device(&self, mac: &Mac) -> Option<Arc<Device>> {
        self.bridges()
            .iter()
            .find_map(|bridge| bridge.device(mac))
    }

    /// Returns the bridge for `mac`, creating it when unknown. The flag is
    /// `true` when the bridge was created by this call. A bridge created
    /// without a `source` starts at the discovery target.
    fn insert_bridge(&self, mac: &Mac, source: Option<IpAddr>) -> (Arc<Bridge>, bool) {
        let mut bridges = self
            .bridges
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(bridge) = bridges.get(mac) {
            return (bridge.clone(), false);
        }

        let (target, fixed) = match self.config.bridge_addr {
            Some(ip) => (SocketAddr::new(ip, self.config.unicast_port), true),
            None => {
                let target = match source {
                    Some(ip) => SocketAddr::new(ip, self.config.unicast_port),
                    None => self.config.discovery_target(),
                };
                (target, false)
            }
        };
        log::debug!("new bridge {mac} at {target}");
        let link = Arc::new(BridgeLink::new(
            mac.clone(),
            self.queue.clone(),
            self.key.clone(),
            target,
            fixed,
            self.config.response_timeout,
        ));
        let bridge = Arc::new(Bridge::new(link, self.events.clone()));
        bridges.insert(mac.clone(), bridge.clone());
        (bridge, true)
    }

    async fn discover(&self) -> Result<Vec<Arc<Bridge>>, ClientError> {
        let call = PendingCall::new(
            Request::broadcast(MessageType::GetDeviceList),
            self.config.discovery_target(),
            self.config.response_timeout,
        );
        let responses = self.queue.enqueue(call).responses().await?;
        log::debug!("discovery got {} responses", responses.len());

        let mut found = Vec::new();
        let mut pending_reads = Vec::new();
        let mut new_devices = Vec::new();
        for Response { message, source } in responses {
            if message.device_type != Some(DeviceType::Bridge) {
                continue;
            }
            let Some(mac) = message.mac.clone() else {
                continue;
            };

            let (bridge, created) = self.insert_bridge(&mac, Some(source.ip()));
            bridge.learn_address(source.ip());
            new_devices.extend(bridge.apply_device_list(&message));
            if created {
                pending_reads.push(bridge.clone());
            }

            // Other bridges named in the list are only registered here; their
            // first heartbeat supplies address and token and triggers the read.
            for entry in message.device_list().unwrap_or_default() {
                if entry.device_type == DeviceType::Bridge && entry.mac != mac {
                    let (_, created) = self.insert_bridge(&entry.mac, None);
                    if created {
                        log::debug!("bridge {mac} lists bridge {}", entry.mac);
                    }
                }
            }
            found.push(bridge);
        }

        for bridge in &pending_reads {
            if let Err(e) = bridge.read_device().await {
                log::warn!("reading bridge {} failed: {e}", bridge.mac());
            }
        }
        update_devices(&new_devices).await;
        Ok(found)
    }

    fn handle_heartbeat(&self, message: Message, source: SocketAddr) {
        if message.device_type != Some(DeviceType::Bridge) {
            log::debug!("ignoring heartbeat from non-bridge device");
            return;
        }
        let Some(mac) = message.mac.as_ref() else {
            log::debug!("ignoring heartbeat without mac from {source}");
            return;
        };

        let (bridge, created) = self.insert_bridge(mac, Some(source.ip()));
        let unread = created || bridge.access_token().is_none();
        if let Some(token) = &message.token {
            bridge.set_token(token);
        }
        bridge.learn_address(source.ip());

        if unread {
            log::debug!("first heartbeat from bridge {mac}");
            tokio::spawn(async move {
                if let Err(e) = bridge.refresh().await {
                    log::warn!("refreshing bridge {} failed: {e}", bridge.mac());
                }
            });
            return;
        }

        if let Some(count) = message.number_of_devices() {
            if count != bridge.device_count() {
                log::debug!(
                    "bridge {mac} reports {count} devices, {} known",
                    bridge.device_count()
                );
                bridge.spawn_device_refresh();
            }
        }
    }

    fn handle_report(&self, message: Message) {
        let Some(mac) = message.mac.as_ref() else {
            log::debug!("ignoring report without mac");
            return;
        };
        let Some(state) = message.state() else {
            log::debug!("ignoring report from {mac} without state");
            return;
        };

        match self.device(mac) {
            Some(device) => {
                device.apply_report(state);
            }
            None => {
                log::debug!("report from unknown device {mac}; refreshing device lists");
                for bridge in self.bridges() {
                    bridge.spawn_device_refresh();
                }
            }
        }
    }
}

async fn route_multicast(inner: Arc<ClientInner>, mut listener: MulticastListener) {
    while let Some(datagram) = listener.recv().await {
        let message = match Message::decode(&datagram.payload) {
            Ok(message) => message,
            Err(e) => {
                log::debug!(
                    "dropping malformed multicast datagram from {}: {e}",
                    datagram.source
                );
                continue;
            }
        };
        log::debug!(
            "multicast {} from {}",
            message.msg_type,
            message.mac.as_ref().map_or("unknown", |mac| mac.as_str())
        );

        match message.msg_type {
            MessageType::Heartbeat => inner.handle_heartbeat(message, datagram.source),
            MessageType::Report => inner.handle_report(message),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientEvent, MotionClient};
    use crate::{ClientConfig, SimulatedBridge};
    use motionblinds_core::message::{Message, MessageType, Request};
    use motionblinds_core::types::{DeviceType, Mac, Position};
    use motionblinds_datalink::loopback;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::time::Duration;

    const BRIDGE: &str = "f0c77f123456";
    const BLIND_A: &str = "f0c77f1234560001";
    const BLIND_B: &str = "f0c77f1234560002";

    fn bridge_addr() -> SocketAddr {
        ([192, 168, 1, 40], 32101).into()
    }

    fn quiet_config() -> ClientConfig {
        ClientConfig::default().with_discover_on_start(false)
    }

    fn heartbeat(bridge: &str, devices: usize) -> Vec<u8> {
        Message::new(MessageType::Heartbeat)
            .with_mac(Mac::from(bridge))
            .with_device_type(DeviceType::Bridge)
            .with_token("12345678abcdefgh")
            .with_data(json!({"currentState": 2, "numberOfDevices": devices}))
            .encode()
            .unwrap()
    }

    async fn wait_for_listener(network: &motionblinds_datalink::LoopbackNetwork) {
        while network.multicast_binds() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn discovers_bridges_and_devices_through_simulator() {
        let (binder, network) = loopback();
        let bridge = Arc::new(SimulatedBridge::new(
            Mac::from(BRIDGE),
            "12345678abcdefgh",
            bridge_addr(),
            network.announcer(),
        ));
        bridge.add_blind(Mac::from(BLIND_A), 100);
        bridge.add_blind(Mac::from(BLIND_B), 0);
        tokio::spawn(bridge.clone().run(network));

        let (client, mut events) = MotionClient::with_binder(binder, quiet_config()).unwrap();
        let found = client.discover().await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].device_count(), 2);
        assert_eq!(found[0].info().fw_version.as_deref(), Some("A1.0.0"));
        assert!(found[0].access_token().is_some());
        let a = client.device(&Mac::from(BLIND_A)).unwrap();
        assert_eq!(a.current_position(), Some(Position::CLOSED));

        let mut added = Vec::new();
        while let Some(event) = events.try_recv() {
            added.push(match event {
                ClientEvent::BridgeAdded(bridge) => bridge.mac().to_string(),
                ClientEvent::DeviceAdded(device) => device.mac().to_string(),
            });
        }
        added.sort();
        assert_eq!(added, vec![BRIDGE, BLIND_A, BLIND_B]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_from_unknown_bridge_reads_it() {
        let (binder, mut network) = loopback();
        let (client, _events) = MotionClient::with_binder(binder, quiet_config()).unwrap();
        wait_for_listener(&network).await;

        network.publish(&heartbeat(BRIDGE, 1), bridge_addr());
        let first = network.next_outbound().await.unwrap();
        let request = Request::decode(&first.payload).unwrap();
        assert_eq!(request.msg_type, MessageType::ReadDevice);
        assert_eq!(request.mac, Some(Mac::from(BRIDGE)));
        assert_eq!(
            first.target,
            SocketAddr::from(([192, 168, 1, 40], 32100))
        );
        assert!(request.access_token.is_some());
        assert!(client.bridge(&Mac::from(BRIDGE)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_listed_in_discovery_reply_waits_for_its_heartbeat() {
        const OTHER: &str = "f0c77f654321";
        let (binder, mut network) = loopback();
        let (client, _events) = MotionClient::with_binder(binder, quiet_config()).unwrap();

        let ack = Message::new(MessageType::GetDeviceListAck)
            .with_mac(Mac::from(BRIDGE))
            .with_device_type(DeviceType::Bridge)
            .with_token("12345678abcdefgh")
            .with_data(json!([
                {"mac": BRIDGE, "deviceType": "02000001"},
                {"mac": OTHER, "deviceType": "02000001"}
            ]))
            .encode()
            .unwrap();
        let bridge_side = async {
            let discovery = network.next_outbound().await.unwrap();
            discovery.reply(&ack, bridge_addr());
            // Left unanswered.
            network.next_outbound().await.unwrap()
        };
        let (found, read) = tokio::join!(client.discover(), bridge_side);

        assert_eq!(found.unwrap().len(), 1);
        let read = Request::decode(&read.payload).unwrap();
        assert_eq!(read.msg_type, MessageType::ReadDevice);
        assert_eq!(read.mac, Some(Mac::from(BRIDGE)));
        assert!(network.try_next_outbound().is_none());

        let other = client.bridge(&Mac::from(OTHER)).unwrap();
        assert_eq!(other.address(), SocketAddr::from(([238, 0, 0, 18], 32100)));
        assert!(other.access_token().is_none());

        let other_addr = SocketAddr::from(([192, 168, 1, 41], 32101));
        network.publish(&heartbeat(OTHER, 0), other_addr);
        let first = network.next_outbound().await.unwrap();
        let request = Request::decode(&first.payload).unwrap();
        assert_eq!(request.msg_type, MessageType::ReadDevice);
        assert_eq!(request.mac, Some(Mac::from(OTHER)));
        assert_eq!(first.target, SocketAddr::from(([192, 168, 1, 41], 32100)));
        assert!(request.access_token.is_some());
        assert_eq!(other.address(), first.target);
    }

    #[tokio::test(start_paused = true)]
    async fn device_count_mismatch_triggers_device_list() {
        let (binder, network) = loopback();
        let simulated = Arc::new(SimulatedBridge::new(
            Mac::from(BRIDGE),
            "12345678abcdefgh",
            bridge_addr(),
            network.announcer(),
        ));
        simulated.add_blind(Mac::from(BLIND_A), 40);
        tokio::spawn(simulated.clone().run(network));

        let (client, _events) = MotionClient::with_binder(binder, quiet_config()).unwrap();
        client.discover().await.unwrap();
        let bridge = client.bridge(&Mac::from(BRIDGE)).unwrap();
        assert_eq!(bridge.device_count(), 1);

        simulated.add_blind(Mac::from(BLIND_B), 10);
        simulated.heartbeat();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(bridge.device_count(), 2);
        let b = client.device(&Mac::from(BLIND_B)).unwrap();
        assert_eq!(b.current_position(), Some(Position::new(90).unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn report_for_known_device_updates_state() {
        let (binder, network) = loopback();
        let simulated = Arc::new(SimulatedBridge::new(
            Mac::from(BRIDGE),
            "12345678abcdefgh",
            bridge_addr(),
            network.announcer(),
        ));
        simulated.add_blind(Mac::from(BLIND_A), 40);
        let announcer = network.announcer();
        tokio::spawn(simulated.run(network));

        let (client, _events) = MotionClient::with_binder(binder, quiet_config()).unwrap();
        client.discover().await.unwrap();
        let device = client.device(&Mac::from(BLIND_A)).unwrap();
        let mut updates = device.subscribe();

        let report = Message::new(MessageType::Report)
            .with_mac(Mac::from(BLIND_A))
            .with_device_type(DeviceType::Blind)
            .with_data(json!({"currentPosition": 25, "operation": 2}))
            .encode()
            .unwrap();
        announcer.publish(&report, bridge_addr());
        announcer.publish(b"garbage", bridge_addr());

        let update = updates.recv().await.unwrap();
        assert!(update.changes.contains("currentPosition"));
        assert_eq!(device.current_position(), Some(Position::new(75).unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn report_from_unknown_device_refreshes_device_lists() {
        let (binder, network) = loopback();
        let simulated = Arc::new(SimulatedBridge::new(
            Mac::from(BRIDGE),
            "12345678abcdefgh",
            bridge_addr(),
            network.announcer(),
        ));
        simulated.add_blind(Mac::from(BLIND_A), 40);
        let announcer = network.announcer();
        tokio::spawn(simulated.clone().run(network));

        let (client, _events) = MotionClient::with_binder(binder, quiet_config()).unwrap();
        client.discover().await.unwrap();

        simulated.add_blind(Mac::from(BLIND_B), 60);
        let report = Message::new(MessageType::Report)
            .with_mac(Mac::from(BLIND_B))
            .with_data(json!({"currentPosition": 60, "operation": 2}))
            .encode()
            .unwrap();
        announcer.publish(&report, bridge_addr());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(client.device(&Mac::from(BLIND_B)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn tracked_move_completes_against_simulator() {
        let (binder, network) = loopback();
        let simulated = Arc::new(
            SimulatedBridge::new(
                Mac::from(BRIDGE),
                "12345678abcdefgh",
                bridge_addr(),
                network.announcer(),
            )
            .with_step(Duration::from_millis(50)),
        );
        simulated.add_blind(Mac::from(BLIND_A), 50);
        tokio::spawn(simulated.clone().run(network));

        let (client, _events) = MotionClient::with_binder(binder, quiet_config()).unwrap();
        client.discover().await.unwrap();
        let tracker = client.track(client.device(&Mac::from(BLIND_A)).unwrap());
        let mut positions = tracker.subscribe();

        assert_eq!(
            tracker.set_target_position(80).unwrap(),
            crate::PositionState::Opening
        );
        loop {
            let event = positions.recv().await.unwrap();
            if event.state == crate::PositionState::Stopped {
                assert_eq!(event.current, 80);
                break;
            }
        }
        assert_eq!(simulated.blind_position(&Mac::from(BLIND_A)), Some(20));
        assert_eq!(tracker.target_position(), Position::new(80).unwrap());
    }
}
