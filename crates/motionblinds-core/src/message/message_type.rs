use serde::{Deserialize, Serialize};

/// Value of the `msgType` envelope field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    GetDeviceList,
    GetDeviceListAck,
    ReadDevice,
    ReadDeviceAck,
    WriteDevice,
    WriteDeviceAck,
    Heartbeat,
    Report,
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// The acknowledgement a bridge answers this request with.
    pub const fn ack(self) -> Option<Self> {
        match self {
            Self::GetDeviceList => Some(Self::GetDeviceListAck),
            Self::ReadDevice => Some(Self::ReadDeviceAck),
            Self::WriteDevice => Some(Self::WriteDeviceAck),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetDeviceList => "GetDeviceList",
            Self::GetDeviceListAck => "GetDeviceListAck",
            Self::ReadDevice => "ReadDevice",
            Self::ReadDeviceAck => "ReadDeviceAck",
            Self::WriteDevice => "WriteDevice",
            Self::WriteDeviceAck => "WriteDeviceAck",
            Self::Heartbeat => "Heartbeat",
            Self::Report => "Report",
            Self::Unknown => "Unknown",
        }
    }
}

impl core::fmt::Display for MessageType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
