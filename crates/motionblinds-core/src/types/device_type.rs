use core::fmt;
use serde::{Deserialize, Serialize};

/// Device type code carried in the `deviceType` envelope field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    /// `02000001`: the Wi-Fi bridge itself.
    Bridge,
    /// `10000000`: a roller blind behind a bridge.
    Blind,
    Other(String),
}

impl DeviceType {
    pub const BRIDGE_CODE: &'static str = "02000001";
    pub const BLIND_CODE: &'static str = "10000000";

    pub fn from_code(code: &str) -> Self {
        match code {
            Self::BRIDGE_CODE => Self::Bridge,
            Self::BLIND_CODE => Self::Blind,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Bridge => Self::BRIDGE_CODE,
            Self::Blind => Self::BLIND_CODE,
            Self::Other(code) => code,
        }
    }
}

impl From<String> for DeviceType {
    fn from(value: String) -> Self {
        Self::from_code(&value)
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
