//! 硬件wallet领域类型
//!
//! - [`DerivationPath`]: BIP32 派生路径
//! - [`Address`] / [`Account`]: 设备派生出的账户
//! - [`DeviceIdentity`]: 总线上的物理设备位置，用于跨枚举比较

use crate::core::errors::HardwareError;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// BIP32 hardened 偏移量
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// 强制 hardened 的前缀层级数（purpose / coin_type / account）
const HARDENED_PREFIX_LEN: usize = 3;

/// Keccak-256 摘要
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BIP32 派生路径
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn new(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    /// Ethereum 默认路径 m/44'/60'/0'/0/0
    pub fn ethereum_default() -> Self {
        Self(vec![
            HARDENED_OFFSET + 44,
            HARDENED_OFFSET + 60,
            HARDENED_OFFSET,
            0,
            0,
        ])
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 将前三层强制转换到 hardened 范围
    ///
    /// 已经 hardened 的层级保持不变，其余层级原样保留。
    pub fn hardened(&self) -> Self {
        let mut indices = self.0.clone();
        for index in indices.iter_mut().take(HARDENED_PREFIX_LEN) {
            if *index < HARDENED_OFFSET {
                *index += HARDENED_OFFSET;
            }
        }
        Self(indices)
    }

    /// 序列化为设备使用的格式：深度 (1 字节) + 每层 4 字节大端
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.0.len() * 4);
        bytes.push(self.0.len() as u8);
        for index in &self.0 {
            bytes.extend_from_slice(&index.to_be_bytes());
        }
        bytes
    }
}

impl From<Vec<u32>> for DerivationPath {
    fn from(indices: Vec<u32>) -> Self {
        Self(indices)
    }
}

impl FromStr for DerivationPath {
    type Err = HardwareError;

    /// 解析 "m/44'/60'/0'/0/0" 形式的路径
    fn from_str(path_str: &str) -> Result<Self, Self::Err> {
        let rest = path_str
            .strip_prefix("m/")
            .ok_or_else(|| HardwareError::InvalidPath(format!("must start with m/: {}", path_str)))?;

        if rest.is_empty() {
            return Err(HardwareError::InvalidPath(format!(
                "at least one component required: {}",
                path_str
            )));
        }

        let mut indices = Vec::new();
        for part in rest.split('/') {
            let hardened = part.ends_with('\'') || part.ends_with('h');
            let digits = part.trim_end_matches('\'').trim_end_matches('h');
            if digits.is_empty() {
                return Err(HardwareError::InvalidPath(format!("empty component in {}", path_str)));
            }

            let index: u32 = digits
                .parse()
                .map_err(|_| HardwareError::InvalidPath(format!("invalid component '{}'", part)))?;
            if index >= HARDENED_OFFSET {
                return Err(HardwareError::InvalidPath(format!("component out of range '{}'", part)));
            }

            indices.push(if hardened { index | HARDENED_OFFSET } else { index });
        }

        Ok(Self(indices))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.0 {
            if *index >= HARDENED_OFFSET {
                write!(f, "/{}'", index - HARDENED_OFFSET)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}

/// 20 字节 Ethereum 风格address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// keccak256(未压缩公钥去掉 0x04 前缀) 的后 20 字节
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let uncompressed = public_key.serialize_uncompressed();
        let hash = keccak256(&uncompressed[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let decoded = hex::decode(raw)
            .map_err(|e| HardwareError::AddressEncoding(format!("invalid hex address: {}", e)))?;
        let bytes: [u8; 20] = decoded
            .try_into()
            .map_err(|_| HardwareError::AddressEncoding(format!("address must be 20 bytes: {}", s)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// 设备派生的账户；同一路径派生结果不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub public_key: PublicKey,
}

impl Account {
    pub fn new(address: Address, public_key: PublicKey) -> Self {
        Self { address, public_key }
    }
}

/// 总线上的物理设备标识
///
/// 字段顺序即排序顺序（bus path 优先），hub 依赖这个全序做合并。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub bus_path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub interface_number: i32,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ledger://{} ({:04x}:{:04x})",
            self.bus_path, self.vendor_id, self.product_id
        )
    }
}
