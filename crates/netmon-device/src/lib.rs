pub mod error;
pub mod inventory;

pub use error::{DeviceError, Result};
pub use inventory::{DeviceInventory, ReachabilityChange};
