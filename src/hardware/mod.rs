//! 硬件wallet集成模块
//!
//! - [`bus`]: USB/HID 枚举与原始读写
//! - [`driver`]: 厂商 driver 契约
//! - [`wallet`]: 单台设备的生命周期
//! - [`hub`]: 设备发现与对账
//! - [`ledger`]: Ledger Ethereum 应用 driver
//! - [`mock`]: 进程内模拟设备

pub mod bus;
pub mod driver;
pub mod hub;
pub mod ledger;
pub mod mock;
pub mod wallet;

pub use bus::{DeviceBus, DeviceIo, SharedDevice};
pub use driver::{Driver, DriverFactory, DriverStatus};
pub use hub::{LedgerHub, PendingConfirmations};
pub use wallet::LedgerWallet;

#[cfg(feature = "ledger")]
pub use bus::HidBus;
