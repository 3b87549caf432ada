//! Ledger 硬件wallet集成
//!
//! 此模块实现与 Ledger Ethereum 应用的通信：
//! - APDU 编解码
//! - HID 分帧传输
//! - [`Driver`](crate::hardware::driver::Driver) 实现

pub mod apdu;
pub mod driver;
pub mod transport;

pub use driver::{AppVersion, LedgerEthereumDriver};
