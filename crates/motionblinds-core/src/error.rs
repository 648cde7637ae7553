use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    ValueOutOfRange,
    Json(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueOutOfRange => f.write_str("value out of range"),
            Self::Json(msg) => write!(f, "json encoding failed: {msg}"),
        }
    }
}

impl std::error::Error for EncodeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Empty,
    Json(String),
    MissingField(&'static str),
    InvalidValue(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty datagram"),
            Self::Json(msg) => write!(f, "invalid json: {msg}"),
            Self::MissingField(field) => write!(f, "missing field `{field}`"),
            Self::InvalidValue(field) => write!(f, "invalid value for `{field}`"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    InvalidLength(usize),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(len) => {
                write!(f, "access key must be exactly 16 bytes, got {len}")
            }
        }
    }
}

impl std::error::Error for KeyError {}
