//! Gateway between a z21 command station and a publish/subscribe bus.
//!
//! - **[`Gateway`]**: owns the lifecycle. [`start()`](Gateway::start)
//!   launches the reachability monitor, subscription arming, event relay
//!   and command dispatcher; [`stop()`](Gateway::stop) cancels and drains
//!   them.
//!
//! - **[`DeviceTransport`]**: the device seam, implemented for
//!   [`z21gw_api::Z21Client`].
//!
//! - **[`MessageBus`]**: the bus seam, with [`NatsBus`] for production and
//!   [`MemoryBus`] for in-process use.
//!
//! Subjects live under `<prefix>.<name>` (see [`GatewayIdentity`]):
//! `.status`, `.event.<kind>`, `.cmd.<command>` and `.reply`.

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{BusMessage, MemoryBus, MessageBus, NatsBus};
pub use config::GatewayConfig;
pub use device::DeviceTransport;
pub use error::{BusError, CoreError};
pub use gateway::Gateway;
pub use identity::GatewayIdentity;
pub use model::{
    CanDiscoverQuery, CommandKind, CommandReply, CommandRequest, ReachabilityState,
    StatusMessage, Transition,
};
