// z21gw-api: Async Rust client for the z21 LAN protocol (UDP)

pub mod client;
pub mod error;
pub mod message;

pub use client::{DEFAULT_PORT, Z21Client};
pub use error::Error;
pub use message::{BroadcastFlags, CAN_NETWORK_ALL, CanDetector, Message, Request, SystemState};
