use crate::bridge::BridgeLink;
use crate::client::ClientEvent;
use crate::queue::CallHandle;
use crate::state::{StateStore, StateUpdate, UpdateOrigin};
use crate::ClientError;
use motionblinds_core::message::{MessageType, Request};
use motionblinds_core::state::{field_u8, ChangeSet, StateMap};
use motionblinds_core::types::{DeviceType, Mac, Operation, Position};
use motionblinds_core::{
    FIELD_BATTERY_LEVEL, FIELD_CURRENT_POSITION, FIELD_OPERATION, FIELD_TARGET_POSITION,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

/// Which incoming report a pending suppression drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFilter {
    Next,
    /// Drop the next report unless it already shows this position.
    NextUnlessAt(Position),
}

/// A blind behind a bridge.
#[derive(Debug)]
pub struct Device {
    mac: Mac,
    link: Arc<BridgeLink>,
    store: StateStore,
    ignore_report: Mutex<Option<ReportFilter>>,
    announced: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Device {
    pub(crate) fn new(
        mac: Mac,
        link: Arc<BridgeLink>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            mac,
            link,
            store: StateStore::new(),
            ignore_report: Mutex::new(None),
            announced: AtomicBool::new(false),
            events,
        }
    }

    pub fn mac(&self) -> &Mac {
        &self.mac
    }

    pub fn bridge_mac(&self) -> &Mac {
        self.link.mac()
    }

    /// Re-reads the device state. Returns `false` when the device did not
    /// answer in time; the cached state is kept in that case.
    pub async fn update(self: &Arc<Self>) -> Result<bool, ClientError> {
        let request = Request::targeted(
            MessageType::ReadDevice,
            self.mac.clone(),
            DeviceType::Blind,
        );
        let response = self.link.call(request).response().await?;
        match response.and_then(|r| r.message.state()) {
            Some(state) => {
                self.apply(state, UpdateOrigin::Read);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Queues a WriteDevice carrying `data`.
    pub fn write_device(&self, data: StateMap) -> CallHandle {
        log::debug!("writing {data:?} to device {}", self.mac);
        let request = Request::targeted(
            MessageType::WriteDevice,
            self.mac.clone(),
            DeviceType::Blind,
        )
        .with_data(data);
        self.link.call(request)
    }

    /// Queues a move to `position`.
    pub fn move_to(&self, position: Position) -> CallHandle {
        let mut data = StateMap::new();
        data.insert(
            FIELD_TARGET_POSITION.to_string(),
            Value::from(position.native()),
        );
        self.write_device(data)
    }

    /// Drops the next report received for this device.
    pub fn ignore_next_report(&self) {
        self.set_filter(Some(ReportFilter::Next));
    }

    /// Drops the next report received for this device unless it already
    /// shows `position`.
    pub fn ignore_next_report_unless_at(&self, position: Position) {
        self.set_filter(Some(ReportFilter::NextUnlessAt(position)));
    }

    pub(crate) fn clear_ignored_report(&self) {
        self.set_filter(None);
    }

    /// Applies a multicast report, unless a suppression is pending. Returns
    /// the change set when the report was applied.
    pub(crate) fn apply_report(self: &Arc<Self>, state: StateMap) -> Option<ChangeSet> {
        let filter = self
            .ignore_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let drop_report = match filter {
            None => false,
            Some(ReportFilter::Next) => true,
            Some(ReportFilter::NextUnlessAt(target)) => {
                field_u8(&state, FIELD_CURRENT_POSITION).map(Position::from_native)
                    != Some(target)
            }
        };
        if drop_report {
            log::debug!("ignoring report from device {}", self.mac);
            return None;
        }
        Some(self.apply(state, UpdateOrigin::Report))
    }

    fn apply(self: &Arc<Self>, state: StateMap, origin: UpdateOrigin) -> ChangeSet {
        let changes = self.store.set_state(state, origin);
        log::debug!(
            "device {} updated from {origin:?}: {} changed fields",
            self.mac,
            changes.len()
        );
        if !self.announced.swap(true, Ordering::SeqCst) {
            log::debug!("device {} added", self.mac);
            let _ = self.events.send(ClientEvent::DeviceAdded(self.clone()));
        }
        changes
    }

    fn set_filter(&self, filter: Option<ReportFilter>) {
        *self
            .ignore_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = filter;
    }

    /// Current position in percent open, `None` until the device has
    /// reported one.
    pub fn current_position(&self) -> Option<Position> {
        self.state_u8(FIELD_CURRENT_POSITION)
            .map(Position::from_native)
    }

    pub fn operation(&self) -> Option<Operation> {
        self.state_u8(FIELD_OPERATION).map(Operation::from_u8)
    }

    /// Raw `batteryLevel` as reported by the device.
    pub fn battery_level(&self) -> Option<u64> {
        self.store.get(FIELD_BATTERY_LEVEL).and_then(|v| v.as_u64())
    }

    pub fn state(&self) -> StateMap {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.store.subscribe()
    }

    fn state_u8(&self, field: &str) -> Option<u8> {
        self.store
            .get(field)
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
    }
}
