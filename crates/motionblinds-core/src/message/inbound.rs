use crate::message::{MessageType, Request};
use crate::state::StateMap;
use crate::types::{DeviceType, Mac};
use crate::{DecodeError, EncodeError, FIELD_NUMBER_OF_DEVICES};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A datagram received from a bridge: an acknowledgement on a unicast
/// socket, or a `Heartbeat`/`Report` on the multicast group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<Mac>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    /// Session token, present in heartbeats and GetDeviceListAck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_version: Option<String>,
    #[serde(
        rename = "ProtocolVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// One element of the `data` array of a GetDeviceListAck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListEntry {
    pub mac: Mac,
    pub device_type: DeviceType,
}

impl Message {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            mac: None,
            device_type: None,
            token: None,
            fw_version: None,
            protocol_version: None,
            data: Value::Null,
        }
    }

    pub fn with_mac(mut self, mac: Mac) -> Self {
        self.mac = Some(mac);
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.is_empty() {
            return Err(DecodeError::Empty);
        }
        serde_json::from_slice(frame).map_err(|e| DecodeError::Json(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(self).map_err(|e| EncodeError::Json(e.to_string()))
    }

    /// `true` when this is the acknowledgement `request` waits for: the
    /// `<request>Ack` type and, for targeted requests, the same MAC.
    pub fn answers(&self, request: &Request) -> bool {
        if request.expected_ack() != Some(self.msg_type) {
            return false;
        }
        match &request.mac {
            Some(mac) => self.mac.as_ref() == Some(mac),
            None => true,
        }
    }

    /// The `data` object as a state map, if `data` is an object.
    pub fn state(&self) -> Option<StateMap> {
        self.data
            .as_object()
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Entries of a GetDeviceListAck `data` array. Malformed entries are
    /// skipped.
    pub fn device_list(&self) -> Result<Vec<DeviceListEntry>, DecodeError> {
        let entries = self
            .data
            .as_array()
            .ok_or(DecodeError::InvalidValue("data"))?;
        Ok(entries
            .iter()
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect())
    }

    /// `numberOfDevices` announced by a heartbeat.
    pub fn number_of_devices(&self) -> Option<usize> {
        self.data
            .get(FIELD_NUMBER_OF_DEVICES)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceListEntry, Message};
    use crate::message::{MessageType, Request};
    use crate::types::{DeviceType, Mac};
    use crate::DecodeError;
    use serde_json::json;

    #[test]
    fn decodes_heartbeat() {
        let frame = br#"{"msgType":"Heartbeat","mac":"f0c77f123456","deviceType":"02000001","token":"12345678abcdefgh","data":{"currentState":2,"numberOfDevices":2,"RSSI":-53}}"#;
        let msg = Message::decode(frame).unwrap();
        assert_eq!(msg.msg_type, MessageType::Heartbeat);
        assert_eq!(msg.device_type, Some(DeviceType::Bridge));
        assert_eq!(msg.token.as_deref(), Some("12345678abcdefgh"));
        assert_eq!(msg.number_of_devices(), Some(2));
    }

    #[test]
    fn decodes_device_list_and_skips_malformed_entries() {
        let msg = Message::new(MessageType::GetDeviceListAck).with_data(json!([
            {"mac": "f0c77f123456", "deviceType": "02000001"},
            {"mac": "f0c77f1234560001", "deviceType": "10000000"},
            {"deviceType": "10000000"}
        ]));
        assert_eq!(
            msg.device_list().unwrap(),
            vec![
                DeviceListEntry {
                    mac: Mac::from("f0c77f123456"),
                    device_type: DeviceType::Bridge,
                },
                DeviceListEntry {
                    mac: Mac::from("f0c77f1234560001"),
                    device_type: DeviceType::Blind,
                },
            ]
        );
        assert_eq!(
            Message::new(MessageType::GetDeviceListAck).device_list(),
            Err(DecodeError::InvalidValue("data"))
        );
    }

    #[test]
    fn answers_requires_ack_type_and_mac() {
        let request = Request::targeted(
            MessageType::ReadDevice,
            Mac::from("f0c77f1234560001"),
            DeviceType::Blind,
        );
        let ack = Message::new(MessageType::ReadDeviceAck).with_mac(Mac::from("f0c77f1234560001"));
        assert!(ack.answers(&request));

        let other = Message::new(MessageType::ReadDeviceAck).with_mac(Mac::from("f0c77f1234560002"));
        assert!(!other.answers(&request));

        let report = Message::new(MessageType::Report).with_mac(Mac::from("f0c77f1234560001"));
        assert!(!report.answers(&request));

        let broadcast = Request::broadcast(MessageType::GetDeviceList);
        let any_bridge = Message::new(MessageType::GetDeviceListAck).with_mac(Mac::from("aa"));
        assert!(any_bridge.answers(&broadcast));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Message::decode(b""), Err(DecodeError::Empty));
        assert!(matches!(
            Message::decode(b"not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Message::decode(br#"{"mac":"f0c77f123456"}"#),
            Err(DecodeError::Json(_))
        ));
    }
}
