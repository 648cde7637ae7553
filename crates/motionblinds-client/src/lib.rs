//! Async client for Motion blind bridges.
//!
//! [`MotionClient`] listens for bridge heartbeats and device reports on the
//! multicast group, discovers bridges and their blinds, and keeps the last
//! reported state of each one in a [`StateStore`]. Unicast commands go
//! through a single FIFO [`CommandQueue`] so that at most one call is on
//! the wire at any time.
//!
//! [`PositionTracker`] sits on top of a [`Device`] and turns its raw state
//! into a current/target/direction triple, sending moves and detecting when
//! the blind has come to rest.

pub mod bridge;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod position;
pub mod queue;
pub mod simulator;
pub mod state;

pub use bridge::Bridge;
pub use client::{ClientEvent, ClientEvents, MotionClient};
pub use config::ClientConfig;
pub use device::Device;
pub use error::ClientError;
pub use position::{
    CompletionStrategy, PositionEvent, PositionState, PositionTracker, ReportSuppression,
};
pub use queue::{command_queue, CallHandle, CommandQueue, PendingCall, Response};
pub use simulator::SimulatedBridge;
pub use state::{StateStore, StateUpdate, UpdateOrigin};

pub use motionblinds_core::types::{DeviceType, Mac, Operation, Position};
