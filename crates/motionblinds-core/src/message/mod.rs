mod inbound;
mod message_type;
mod request;

pub use inbound::{DeviceListEntry, Message};
pub use message_type::MessageType;
pub use request::Request;
