pub mod config;
pub mod errors;
pub mod types;

pub use errors::{HardwareError, Result};
pub use types::{Account, Address, DerivationPath, DeviceIdentity};
