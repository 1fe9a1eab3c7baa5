//! Status broadcast mechanics shared by the orchestrators.

pub mod bus;
pub mod status_bus;

pub use bus::Subscription;
pub use status_bus::{BusError, StatusBus};
