// src/lib.rs
//! Ledger 硬件wallet发现、生命周期管理与经过validate的 EIP-712 签名。
//!
//! ```text
//! LedgerSigner -> LedgerHub (discover) -> LedgerWallet (open / derive / sign) -> Driver -> DeviceIo
//! ```

pub mod core;
pub mod hardware;
pub mod signing;

pub use crate::core::errors::{HardwareError, Result};
pub use crate::core::types::{Account, Address, DerivationPath, DeviceIdentity};
pub use crate::hardware::{LedgerHub, LedgerWallet};
pub use crate::signing::LedgerSigner;
