//! 厂商 driver 契约
//!
//! wallet生命周期只通过 [`Driver`] 与设备通信，具体的字节协议（例如 Ledger APDU）
//! 完全封装在实现内部。

use crate::core::errors::Result;
use crate::core::types::{Address, DerivationPath};
use crate::hardware::bus::SharedDevice;
use async_trait::async_trait;
use secp256k1::PublicKey;
use std::sync::Arc;

/// driver 自报的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverStatus {
    /// 给user看的状态描述
    pub text: String,
    /// 最近一次遇到的failed
    pub failure: Option<String>,
}

impl DriverStatus {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { text: text.into(), failure: None }
    }

    pub fn failed(text: impl Into<String>, failure: impl Into<String>) -> Self {
        Self { text: text.into(), failure: Some(failure.into()) }
    }

    pub fn is_operational(&self) -> bool {
        self.failure.is_none()
    }
}

/// 硬件wallet厂商 driver
///
/// 所有 I/O 方法都可能阻塞等待user在设备上确认，调用方必须持有 transport 锁。
#[async_trait]
pub trait Driver: Send {
    /// 当前状态与最近的failed
    fn status(&self) -> DriverStatus;

    /// 在已打开的设备上初始化 driver；passphrase 是否使用由实现决定
    async fn open(&mut self, device: SharedDevice, passphrase: &str) -> Result<()>;

    /// 释放 driver 持有的设备引用
    async fn close(&mut self) -> Result<()>;

    /// 存活探测
    async fn heartbeat(&mut self) -> Result<()>;

    /// 派生指定路径的address与公钥
    async fn derive(&mut self, path: &DerivationPath) -> Result<(Address, PublicKey)>;

    /// 对 EIP-712 哈希对签名，返回 r ‖ s ‖ v (65 字节)
    async fn sign_typed_message(
        &mut self,
        path: &DerivationPath,
        message_hash: &[u8; 32],
        domain_hash: &[u8; 32],
    ) -> Result<Vec<u8>>;
}

/// 为每个新发现的设备构造 driver
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;
