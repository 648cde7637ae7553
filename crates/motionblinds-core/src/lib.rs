//! Motion blind bridge protocol types and codecs in pure Rust.
//!
//! `motionblinds-core` describes the JSON datagrams exchanged with Motion
//! blind bridges: the request/acknowledgement envelope used on the unicast
//! command port, the `Heartbeat` and `Report` messages pushed on the
//! multicast group, and the raw state fields carried inside them. It also
//! derives the per-session `AccessToken` required by bridge-scoped commands.
//!
//! It performs no I/O; transports live in `motionblinds-datalink` and the
//! stateful client in `motionblinds-client`.

/// Error types for encoding, decoding and key handling.
pub mod error;
/// Request and response envelopes.
pub mod message;
/// Raw state mappings and the change sets computed between them.
pub mod state;
/// Access-token derivation from a bridge session token.
pub mod token;
/// Identifiers, device type codes, operation codes and positions.
pub mod types;

pub use error::{DecodeError, EncodeError, KeyError};

use std::net::Ipv4Addr;

/// Multicast group bridges announce heartbeats and reports on.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(238, 0, 0, 18);
/// Port of the multicast announcement channel.
pub const MULTICAST_PORT: u16 = 32101;
/// Port bridges accept unicast commands on.
pub const UNICAST_PORT: u16 = 32100;

pub const FIELD_CURRENT_POSITION: &str = "currentPosition";
pub const FIELD_TARGET_POSITION: &str = "targetPosition";
pub const FIELD_OPERATION: &str = "operation";
pub const FIELD_BATTERY_LEVEL: &str = "batteryLevel";
pub const FIELD_NUMBER_OF_DEVICES: &str = "numberOfDevices";
