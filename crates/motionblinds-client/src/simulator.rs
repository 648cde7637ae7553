//! Simulated Motion bridge.
//!
//! [`SimulatedBridge`] answers GetDeviceList, ReadDevice and WriteDevice on
//! the bridge side of a loopback network, moves its blinds one step at a
//! time after a write and pushes multicast reports the way a real bridge
//! does. Useful for testing and development without hardware.

use crate::ClientError;
use motionblinds_core::message::{Message, MessageType, Request};
use motionblinds_core::token::AccessKey;
use motionblinds_core::types::{DeviceType, Mac, Operation};
use motionblinds_core::FIELD_TARGET_POSITION;
use motionblinds_datalink::{LoopbackNetwork, MulticastAnnouncer, OutboundDatagram};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

const FW_VERSION: &str = "A1.0.0";
const PROTOCOL_VERSION: &str = "0.9.9";

#[derive(Debug)]
struct SimulatedBlind {
    /// Device-native position, `0` open.
    position: u8,
    operation: Operation,
    battery_level: u64,
    motion: Option<JoinHandle<()>>,
}

/// A simulated bridge with any number of blinds.
#[derive(Debug)]
pub struct SimulatedBridge {
    mac: Mac,
    token: String,
    address: SocketAddr,
    key: AccessKey,
    announcer: MulticastAnnouncer,
    step: Duration,
    blinds: Mutex<BTreeMap<Mac, SimulatedBlind>>,
}

impl SimulatedBridge {
    /// Creates a bridge that answers from `address` and publishes through
    /// `announcer`.
    pub fn new(
        mac: Mac,
        token: impl Into<String>,
        address: SocketAddr,
        announcer: MulticastAnnouncer,
    ) -> Self {
        Self {
            mac,
            token: token.into(),
            address,
            key: AccessKey::default(),
            announcer,
            step: Duration::from_millis(100),
            blinds: Mutex::new(BTreeMap::new()),
        }
    }

    /// Time a blind takes to travel one percent.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    pub fn mac(&self) -> &Mac {
        &self.mac
    }

    /// Adds a stopped blind at a device-native position.
    pub fn add_blind(&self, mac: Mac, native_position: u8) {
        self.lock().insert(
            mac,
            SimulatedBlind {
                position: native_position.min(100),
                operation: Operation::Stopped,
                battery_level: 1197,
                motion: None,
            },
        );
    }

    /// Device-native position of a blind.
    pub fn blind_position(&self, mac: &Mac) -> Option<u8> {
        self.lock().get(mac).map(|blind| blind.position)
    }

    /// Publishes a heartbeat announcing the current blind count.
    pub fn heartbeat(&self) {
        let message = Message::new(MessageType::Heartbeat)
            .with_mac(self.mac.clone())
            .with_device_type(DeviceType::Bridge)
            .with_token(self.token.clone())
            .with_data(json!({
                "currentState": 2,
                "numberOfDevices": self.lock().len(),
                "RSSI": -52
            }));
        self.publish(&message);
    }

    /// Runs the bridge loop, answering requests until the network closes.
    pub async fn run(self: Arc<Self>, mut network: LoopbackNetwork) {
        while let Some(datagram) = network.next_outbound().await {
            if let Err(e) = self.handle_datagram(&datagram) {
                log::debug!("simulator: error handling request: {e}");
            }
        }
    }

    fn handle_datagram(self: &Arc<Self>, datagram: &OutboundDatagram) -> Result<(), ClientError> {
        let request = Request::decode(&datagram.payload)?;
        let reply = match (request.msg_type, request.mac.as_ref()) {
            (MessageType::GetDeviceList, None) => Some(self.device_list_ack()),
            (MessageType::GetDeviceList, Some(mac)) if *mac == self.mac => {
                Some(self.device_list_ack())
            }
            (MessageType::ReadDevice, Some(mac)) if *mac == self.mac => Some(self.bridge_ack()),
            (MessageType::ReadDevice, Some(mac)) => {
                self.blind_ack(mac, MessageType::ReadDeviceAck)
            }
            (MessageType::WriteDevice, Some(mac)) => {
                if !self.authorized(&request) {
                    log::debug!("simulator: rejecting write without a valid access token");
                    return Ok(());
                }
                self.start_motion(mac, &request);
                self.blind_ack(mac, MessageType::WriteDeviceAck)
            }
            _ => None,
        };

        if let Some(reply) = reply {
            datagram.reply(&reply.encode()?, self.address);
        }
        Ok(())
    }

    fn authorized(&self, request: &Request) -> bool {
        request.access_token.as_ref() == Some(&self.key.derive(&self.token))
    }

    fn device_list_ack(&self) -> Message {
        let mut entries = vec![json!({
            "mac": self.mac.as_str(),
            "deviceType": DeviceType::BRIDGE_CODE
        })];
        entries.extend(self.lock().keys().map(|mac| {
            json!({
                "mac": mac.as_str(),
                "deviceType": DeviceType::BLIND_CODE
            })
        }));

        let mut message = Message::new(MessageType::GetDeviceListAck)
            .with_mac(self.mac.clone())
            .with_device_type(DeviceType::Bridge)
            .with_token(self.token.clone())
            .with_data(Value::Array(entries));
        message.fw_version = Some(FW_VERSION.to_string());
        message.protocol_version = Some(PROTOCOL_VERSION.to_string());
        message
    }

    fn bridge_ack(&self) -> Message {
        Message::new(MessageType::ReadDeviceAck)
            .with_mac(self.mac.clone())
            .with_device_type(DeviceType::Bridge)
            .with_data(json!({
                "currentState": 2,
                "numberOfDevices": self.lock().len()
            }))
    }

    fn blind_ack(&self, mac: &Mac, msg_type: MessageType) -> Option<Message> {
        let state = blind_state(self.lock().get(mac)?);
        Some(
            Message::new(msg_type)
                .with_mac(mac.clone())
                .with_device_type(DeviceType::Blind)
                .with_data(state),
        )
    }

    fn start_motion(self: &Arc<Self>, mac: &Mac, request: &Request) {
        let Some(target) = request
            .data
            .as_ref()
            .and_then(|data| data.get(FIELD_TARGET_POSITION))
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
        else {
            return;
        };
        let target = target.min(100);

        let report = {
            let mut blinds = self.lock();
            let Some(blind) = blinds.get_mut(mac) else {
                return;
            };
            if let Some(motion) = blind.motion.take() {
                motion.abort();
            }
            if blind.position == target {
                blind.operation = Operation::Stopped;
                return;
            }
            blind.operation = if target > blind.position {
                Operation::Closing
            } else {
                Operation::Opening
            };
            blind.motion = Some(tokio::spawn(self.clone().animate(mac.clone(), target)));
            blind_state(blind)
        };
        self.publish_report(mac, report);
    }

    async fn animate(self: Arc<Self>, mac: Mac, target: u8) {
        loop {
            tokio::time::sleep(self.step).await;
            let report = {
                let mut blinds = self.lock();
                let Some(blind) = blinds.get_mut(&mac) else {
                    return;
                };
                if blind.position < target {
                    blind.position += 1;
                } else if blind.position > target {
                    blind.position -= 1;
                }
                if blind.position != target {
                    continue;
                }
                blind.operation = Operation::Stopped;
                blind.motion = None;
                blind_state(blind)
            };
            self.publish_report(&mac, report);
            return;
        }
    }

    fn publish_report(&self, mac: &Mac, state: Value) {
        let message = Message::new(MessageType::Report)
            .with_mac(mac.clone())
            .with_device_type(DeviceType::Blind)
            .with_data(state);
        self.publish(&message);
    }

    fn publish(&self, message: &Message) {
        match message.encode() {
            Ok(frame) => {
                self.announcer.publish(&frame, self.address);
            }
            Err(e) => log::debug!("simulator: failed to encode {}: {e}", message.msg_type),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Mac, SimulatedBlind>> {
        self.blinds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SimulatedBridge {
    fn drop(&mut self) {
        for blind in self.lock().values_mut() {
            if let Some(motion) = blind.motion.take() {
                motion.abort();
            }
        }
    }
}

fn blind_state(blind: &SimulatedBlind) -> Value {
    json!({
        "type": 1,
        "operation": blind.operation.to_u8(),
        "currentPosition": blind.position,
        "currentAngle": 0,
        "currentState": 0,
        "voltageMode": 1,
        "batteryLevel": blind.battery_level,
        "RSSI": -71
    })
}
