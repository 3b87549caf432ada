//! 硬件签名error类型
//!
//! 所有 hub / wallet / signer 操作统一返回 [`HardwareError`]，调用方可以据此区分
//! "设置问题"（请检查设备连接）与 "可重试问题"（设备通信failed）。

use crate::core::types::Address;
use thiserror::Error;

/// Hardware signing error.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// 当前主机没有可用的 USB/HID 枚举能力
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// 没有发现任何硬件wallet
    #[error("No Ledger devices detected")]
    NoDeviceFound,

    /// 发现多个硬件wallet，不会自动选择
    #[error("Multiple Ledger devices detected ({0}): connect a single device and retry")]
    MultipleDevicesFound(usize),

    /// wallet已经打开
    #[error("Wallet already open")]
    AlreadyOpen,

    /// wallet已关闭（或心跳failed后被关闭）
    #[error("Wallet closed")]
    Closed,

    /// 该address没有固定的派生路径，需要先 derive(pin = true)
    #[error("Unknown account: {0}")]
    UnknownAccount(Address),

    /// 只支持 LEGACY_AMINO_JSON 签名模式
    #[error("Unsupported sign mode: {0} (only LEGACY_AMINO_JSON is supported)")]
    UnsupportedSignMode(u8),

    /// 结构化数据信封格式error
    #[error("Unsupported payload: {0}")]
    UnsupportedPayload(String),

    /// 设备传输层 I/O failed
    #[error("Device communication error: {0}")]
    DeviceCommunication(String),

    /// 恢复出的公钥与账户公钥不一致，签名已丢弃
    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// 派生路径error
    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),

    /// 待签名文档无法解析
    #[error("Invalid sign document: {0}")]
    InvalidSignDoc(String),

    /// 配置error
    #[error("Configuration error: {0}")]
    Config(String),

    /// address编码failed
    #[error("Address encoding error: {0}")]
    AddressEncoding(String),
}

/// 硬件签名结果类型
pub type Result<T> = std::result::Result<T, HardwareError>;

impl HardwareError {
    /// 判断是否可以重试整个操作
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeviceCommunication(_) | Self::Closed)
    }

    /// 判断是否为需要user调整设备/环境的error
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform(_) | Self::NoDeviceFound | Self::MultipleDevicesFound(_)
        )
    }
}

impl From<std::io::Error> for HardwareError {
    fn from(err: std::io::Error) -> Self {
        HardwareError::DeviceCommunication(err.to_string())
    }
}

impl From<secp256k1::Error> for HardwareError {
    fn from(err: secp256k1::Error) -> Self {
        HardwareError::SignatureVerificationFailed(err.to_string())
    }
}
