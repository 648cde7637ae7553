use crate::client::ClientEvent;
use crate::queue::{CallHandle, CommandQueue, PendingCall};
use crate::state::{StateStore, StateUpdate, UpdateOrigin};
use crate::{ClientError, Device};
use futures_util::future::join_all;
use motionblinds_core::message::{Message, MessageType, Request};
use motionblinds_core::state::StateMap;
use motionblinds_core::token::{AccessKey, AccessToken};
use motionblinds_core::types::{DeviceType, Mac};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    access_token: AccessToken,
}

/// What a bridge and its devices share to reach the bridge: the command
/// queue, the bridge's unicast address and its current access token.
#[derive(Debug)]
pub(crate) struct BridgeLink {
    mac: Mac,
    queue: CommandQueue,
    key: AccessKey,
    target: RwLock<SocketAddr>,
    fixed_target: bool,
    session: RwLock<Option<Session>>,
    response_timeout: Duration,
}

impl BridgeLink {
    pub(crate) fn new(
        mac: Mac,
        queue: CommandQueue,
        key: AccessKey,
        target: SocketAddr,
        fixed_target: bool,
        response_timeout: Duration,
    ) -> Self {
        Self {
            mac,
            queue,
            key,
            target: RwLock::new(target),
            fixed_target,
            session: RwLock::new(None),
            response_timeout,
        }
    }

    pub(crate) fn mac(&self) -> &Mac {
        &self.mac
    }

    /// Queues `request` with the current access token attached.
    pub(crate) fn call(&self, request: Request) -> CallHandle {
        let request = request.with_access_token(self.access_token());
        self.queue
            .enqueue(PendingCall::new(request, self.target(), self.response_timeout))
    }

    /// Stores a session token and derives the access token from it.
    /// Returns `true` when the token differs from the previous one.
    pub(crate) fn set_token(&self, token: &str) -> bool {
        let mut session = write(&self.session);
        if session.as_ref().is_some_and(|s| s.token == token) {
            return false;
        }
        *session = Some(Session {
            token: token.to_string(),
            access_token: self.key.derive(token),
        });
        true
    }

    pub(crate) fn access_token(&self) -> Option<AccessToken> {
        read(&self.session).as_ref().map(|s| s.access_token.clone())
    }

    pub(crate) fn target(&self) -> SocketAddr {
        *read(&self.target)
    }

    pub(crate) fn learn_address(&self, ip: IpAddr) {
        if self.fixed_target {
            return;
        }
        let mut target = write(&self.target);
        if target.ip() != ip {
            log::debug!("bridge {} now at {ip}", self.mac);
            target.set_ip(ip);
        }
    }
}

/// Firmware details a bridge reports in its device list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BridgeInfo {
    pub fw_version: Option<String>,
    pub protocol_version: Option<String>,
}

/// A Motion bridge and the blinds paired with it.
///
/// Bridges are never removed once known. Devices are added when a device
/// list names them and are never removed either.
#[derive(Debug)]
pub struct Bridge {
    link: Arc<BridgeLink>,
    store: StateStore,
    devices: RwLock<BTreeMap<Mac, Arc<Device>>>,
    info: RwLock<BridgeInfo>,
    announced: AtomicBool,
    refreshing: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Bridge {
    pub(crate) fn new(link: Arc<BridgeLink>, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            link,
            store: StateStore::new(),
            devices: RwLock::new(BTreeMap::new()),
            info: RwLock::new(BridgeInfo::default()),
            announced: AtomicBool::new(false),
            refreshing: AtomicBool::new(false),
            events,
        }
    }

    pub fn mac(&self) -> &Mac {
        self.link.mac()
    }

    /// Unicast address commands for this bridge are sent to.
    pub fn address(&self) -> SocketAddr {
        self.link.target()
    }

    /// Reads the bridge state and its device list.
    pub async fn refresh(self: &Arc<Self>) -> Result<(), ClientError> {
        let (read, list) = tokio::join!(self.read_device(), self.list_devices());
        read?;
        list?;
        Ok(())
    }

    /// Sends ReadDevice to the bridge itself. Returns `false` when the
    /// bridge did not answer in time.
    pub async fn read_device(self: &Arc<Self>) -> Result<bool, ClientError> {
        let request = Request::targeted(
            MessageType::ReadDevice,
            self.mac().clone(),
            DeviceType::Bridge,
        );
        let response = self.link.call(request).response().await?;
        let Some(state) = response.and_then(|r| r.message.state()) else {
            return Ok(false);
        };

        self.store.set_state(state, UpdateOrigin::Read);
        if !self.announced.swap(true, Ordering::SeqCst) {
            log::debug!("bridge {} added", self.mac());
            let _ = self.events.send(ClientEvent::BridgeAdded(self.clone()));
        }
        Ok(true)
    }

    /// Sends GetDeviceList to the bridge, adds the blinds it does not track
    /// yet, and reads their state. Returns the devices that were added.
    pub async fn list_devices(self: &Arc<Self>) -> Result<Vec<Arc<Device>>, ClientError> {
        let request = Request::targeted(
            MessageType::GetDeviceList,
            self.mac().clone(),
            DeviceType::Bridge,
        );
        let Some(response) = self.link.call(request).response().await? else {
            return Ok(Vec::new());
        };

        let added = self.apply_device_list(&response.message);
        update_devices(&added).await;
        Ok(added)
    }

    /// Records metadata and creates untracked blinds from a
    /// GetDeviceListAck.
    pub(crate) fn apply_device_list(&self, message: &Message) -> Vec<Arc<Device>> {
        {
            let mut info = write(&self.info);
            if message.fw_version.is_some() {
                info.fw_version.clone_from(&message.fw_version);
            }
            if message.protocol_version.is_some() {
                info.protocol_version.clone_from(&message.protocol_version);
            }
        }
        if let Some(token) = &message.token {
            self.set_token(token);
        }

        let entries = match message.device_list() {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("bridge {} sent an unusable device list: {e}", self.mac());
                return Vec::new();
            }
        };

        let mut devices = write(&self.devices);
        let mut added = Vec::new();
        for entry in entries {
            if entry.device_type != DeviceType::Blind || devices.contains_key(&entry.mac) {
                continue;
            }
            log::debug!("bridge {} lists new device {}", self.mac(), entry.mac);
            let device = Arc::new(Device::new(
                entry.mac.clone(),
                self.link.clone(),
                self.events.clone(),
            ));
            devices.insert(entry.mac, device.clone());
            added.push(device);
        }
        added
    }

    /// Starts a device-list refresh in the background unless one is already
    /// running for this bridge.
    pub(crate) fn spawn_device_refresh(self: &Arc<Self>) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            log::debug!("device list refresh for {} already running", self.mac());
            return;
        }
        let bridge = self.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.list_devices().await {
                log::warn!("refreshing devices of bridge {} failed: {e}", bridge.mac());
            }
            bridge.refreshing.store(false, Ordering::SeqCst);
        });
    }

    pub fn device(&self, mac: &Mac) -> Option<Arc<Device>> {
        read(&self.devices).get(mac).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        read(&self.devices).values().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        read(&self.devices).len()
    }

    /// Replaces the session token, e.g. after the bridge rotated it.
    pub fn set_token(&self, token: &str) {
        if self.link.set_token(token) {
            log::debug!("bridge {} session token updated", self.mac());
        }
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.link.access_token()
    }

    pub(crate) fn learn_address(&self, ip: IpAddr) {
        self.link.learn_address(ip);
    }

    pub fn info(&self) -> BridgeInfo {
        read(&self.info).clone()
    }

    pub fn state(&self) -> StateMap {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.store.subscribe()
    }
}

pub(crate) async fn update_devices(devices: &[Arc<Device>]) {
    let results = join_all(devices.iter().map(|device| device.update())).await;
    for (device, result) in devices.iter().zip(results) {
        if let Err(e) = result {
            log::warn!("reading device {} failed: {e}", device.mac());
        }
    }
}
