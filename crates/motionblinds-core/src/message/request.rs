use crate::message::MessageType;
use crate::state::StateMap;
use crate::token::AccessToken;
use crate::types::{DeviceType, Mac};
use crate::{DecodeError, EncodeError};
use serde::{Deserialize, Serialize};

/// An outbound command envelope.
///
/// Broadcast requests (no `mac`) address every bridge listening on the
/// target address and are answered by each of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<Mac>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(
        rename = "AccessToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StateMap>,
}

impl Request {
    pub fn broadcast(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            mac: None,
            device_type: None,
            access_token: None,
            data: None,
        }
    }

    pub fn targeted(msg_type: MessageType, mac: Mac, device_type: DeviceType) -> Self {
        Self {
            msg_type,
            mac: Some(mac),
            device_type: Some(device_type),
            access_token: None,
            data: None,
        }
    }

    pub fn with_access_token(mut self, token: Option<AccessToken>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_data(mut self, data: StateMap) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.mac.is_none()
    }

    /// Message type of the acknowledgement that answers this request.
    pub fn expected_ack(&self) -> Option<MessageType> {
        self.msg_type.ack()
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(self).map_err(|e| EncodeError::Json(e.to_string()))
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.is_empty() {
            return Err(DecodeError::Empty);
        }
        serde_json::from_slice(frame).map_err(|e| DecodeError::Json(e.to_string()))
    }
}
