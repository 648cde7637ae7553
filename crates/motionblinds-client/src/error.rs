use motionblinds_core::{DecodeError, EncodeError, KeyError};
use motionblinds_datalink::DataLinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("datalink error: {0}")]
    DataLink(#[from] DataLinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid access key: {0}")]
    Key(#[from] KeyError),
    #[error("command queue closed")]
    QueueClosed,
    #[error("position {0} is outside 0..=100")]
    PositionOutOfRange(u8),
}
