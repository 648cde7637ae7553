use core::fmt;
use serde::{Deserialize, Serialize};

/// Hardware address of a bridge or device, as it appears on the wire.
///
/// Bridges use a 12-digit hex address; devices behind a bridge carry the
/// bridge address followed by a 4-digit suffix. The value is compared
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mac(String);

impl Mac {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Mac {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Mac {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
