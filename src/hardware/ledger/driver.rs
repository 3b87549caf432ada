//! Ledger Ethereum 应用 driver
//!
//! 通过 APDU 与设备上的 Ethereum 应用交互：
//! - `GET_APP_CONFIGURATION`：版本探测（open / heartbeat）
//! - `GET_ETH_PUBLIC_ADDRESS`：派生address与公钥
//! - `SIGN_ETH_EIP_712`（hashed 模式）：结构化数据签名，需要应用 ≥ 1.5.0

use super::apdu::{ApduClass, ApduCommand, ApduInstruction, ApduResponse};
use super::transport;
use crate::core::errors::{HardwareError, Result};
use crate::core::types::{Address, DerivationPath};
use crate::hardware::bus::SharedDevice;
use crate::hardware::driver::{Driver, DriverStatus};
use async_trait::async_trait;
use secp256k1::PublicKey;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 支持 hashed EIP-712 签名的最低应用版本
const MIN_EIP712_VERSION: AppVersion = AppVersion { major: 1, minor: 5, patch: 0 };

/// 未压缩公钥长度
const UNCOMPRESSED_KEY_LEN: usize = 65;

/// Ethereum 应用版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AppVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Ledger Ethereum 应用 driver
pub struct LedgerEthereumDriver {
    device: Option<SharedDevice>,
    /// `None` 表示应用不可达（offline）
    version: Option<AppVersion>,
    failure: Option<String>,
    read_timeout: Duration,
}

/// hidapi 把 0 毫秒超时当作非阻塞读取
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

impl LedgerEthereumDriver {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            device: None,
            version: None,
            failure: None,
            read_timeout: read_timeout.max(MIN_READ_TIMEOUT),
        }
    }

    /// 当前探测到的应用版本
    pub fn version(&self) -> Option<AppVersion> {
        self.version
    }

    /// 在阻塞线程池中完成一次 APDU 交换
    async fn exchange_raw(&self, command: ApduCommand, wait_for_user: bool) -> Result<ApduResponse> {
        let device = self.device.clone().ok_or(HardwareError::Closed)?;
        let timeout = self.read_timeout;
        let apdu = command.to_bytes();

        let reply = tokio::task::spawn_blocking(move || {
            let mut io = device.lock();
            transport::exchange(&mut **io, &apdu, timeout, wait_for_user)
        })
        .await
        .map_err(|e| HardwareError::DeviceCommunication(format!("transport task failed: {}", e)))??;

        ApduResponse::from_bytes(&reply)
    }

    async fn exchange(&self, command: ApduCommand, wait_for_user: bool) -> Result<Vec<u8>> {
        self.exchange_raw(command, wait_for_user).await?.into_data()
    }

    fn version_command() -> Result<ApduCommand> {
        ApduCommand::new(
            ApduClass::Ethereum,
            ApduInstruction::GetAppConfiguration,
            0x00,
            0x00,
            vec![],
        )
    }

    async fn app_version(&self) -> Result<AppVersion> {
        let data = self.exchange(Self::version_command()?, false).await?;
        parse_version(&data)
    }

    /// 应用离线时重新探测一次
    async fn ensure_online(&mut self) -> Result<AppVersion> {
        if let Some(version) = self.version {
            return Ok(version);
        }
        let version = self.app_version().await.map_err(|e| {
            HardwareError::DeviceCommunication(format!("Ethereum app offline: {}", e))
        })?;
        info!("✅ Ethereum 应用已上线: v{}", version);
        self.version = Some(version);
        Ok(version)
    }
}

#[async_trait]
impl Driver for LedgerEthereumDriver {
    fn status(&self) -> DriverStatus {
        let text = match (&self.device, self.version) {
            (None, _) => "Closed".to_string(),
            (Some(_), None) => "Ethereum app offline".to_string(),
            (Some(_), Some(version)) => format!("Ethereum app v{} online", version),
        };
        DriverStatus { text, failure: self.failure.clone() }
    }

    async fn open(&mut self, device: SharedDevice, _passphrase: &str) -> Result<()> {
        self.device = Some(device);
        self.failure = None;

        // 应用未打开时保持 offline，后续操作会重新探测
        self.version = match self.app_version().await {
            Ok(version) => {
                info!("✅ Ethereum 应用: v{}", version);
                Some(version)
            }
            Err(e) => {
                warn!("⚠️ Ethereum 应用不可达，进入 offline 状态: {}", e);
                None
            }
        };
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.device = None;
        self.version = None;
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        let result = match self.exchange_raw(Self::version_command()?, false).await {
            // 设备仍在响应，只是应用被关闭
            Ok(response) if !response.is_success() => {
                debug!("Ethereum 应用未响应: {}", response.error_description());
                self.version = None;
                return Ok(());
            }
            Ok(response) => parse_version(&response.data),
            Err(e) => Err(e),
        };

        match result {
            Ok(version) => {
                self.version = Some(version);
                Ok(())
            }
            Err(e) => {
                self.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn derive(&mut self, path: &DerivationPath) -> Result<(Address, PublicKey)> {
        self.ensure_online().await?;

        let command = ApduCommand::new(
            ApduClass::Ethereum,
            ApduInstruction::GetEthPublicAddress,
            0x00, // 不在设备上显示
            0x00, // 不返回 chain code
            path.to_bytes(),
        )?;
        let data = self.exchange(command, false).await?;

        let (public_key, address) = parse_address_reply(&data)?;
        debug!("派生 {} -> {}", path, address);
        Ok((address, public_key))
    }

    async fn sign_typed_message(
        &mut self,
        path: &DerivationPath,
        message_hash: &[u8; 32],
        domain_hash: &[u8; 32],
    ) -> Result<Vec<u8>> {
        let version = self.ensure_online().await?;
        if version < MIN_EIP712_VERSION {
            return Err(HardwareError::DeviceCommunication(format!(
                "Ethereum app v{} does not support EIP-712 signing (requires v{}+)",
                version, MIN_EIP712_VERSION
            )));
        }

        let mut payload = path.to_bytes();
        payload.extend_from_slice(domain_hash);
        payload.extend_from_slice(message_hash);

        let command = ApduCommand::new(
            ApduClass::Ethereum,
            ApduInstruction::SignEthEip712,
            0x00,
            0x00,
            payload,
        )?;
        let reply = self.exchange(command, true).await?;

        // 设备返回 v ‖ r ‖ s
        if reply.len() != 65 {
            return Err(HardwareError::DeviceCommunication(format!(
                "invalid signature reply: {} bytes",
                reply.len()
            )));
        }
        let mut signature = reply[1..].to_vec();
        signature.push(reply[0]);
        Ok(signature)
    }
}

/// flags | major | minor | patch
fn parse_version(data: &[u8]) -> Result<AppVersion> {
    match data {
        [_flags, major, minor, patch, ..] => Ok(AppVersion {
            major: *major,
            minor: *minor,
            patch: *patch,
        }),
        _ => Err(HardwareError::DeviceCommunication(format!(
            "invalid app configuration reply: {} bytes",
            data.len()
        ))),
    }
}

/// 解析 pk_len | pk | addr_len | addr (ASCII hex)
fn parse_address_reply(data: &[u8]) -> Result<(PublicKey, Address)> {
    let invalid = || HardwareError::DeviceCommunication("invalid address reply".to_string());

    let key_len = *data.first().ok_or_else(invalid)? as usize;
    if key_len != UNCOMPRESSED_KEY_LEN {
        return Err(invalid());
    }
    let key_bytes = data.get(1..1 + key_len).ok_or_else(invalid)?;
    let public_key = PublicKey::from_slice(key_bytes)
        .map_err(|e| HardwareError::DeviceCommunication(format!("invalid public key: {}", e)))?;

    let addr_len = *data.get(1 + key_len).ok_or_else(invalid)? as usize;
    let addr_start = 2 + key_len;
    let addr_bytes = data.get(addr_start..addr_start + addr_len).ok_or_else(invalid)?;
    let addr_str = std::str::from_utf8(addr_bytes).map_err(|_| invalid())?;
    let address = Address::from_str(addr_str)
        .map_err(|e| HardwareError::DeviceCommunication(format!("invalid address: {}", e)))?;

    if address != Address::from_public_key(&public_key) {
        return Err(HardwareError::DeviceCommunication(
            "device address does not match its public key".to_string(),
        ));
    }
    Ok((public_key, address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::bus::DeviceIo;
    use crate::hardware::ledger::transport::tests::LoopbackIo;
    use parking_lot::Mutex;
    use secp256k1::{Secp256k1, SecretKey};
    use std::sync::Arc;

    const OK: [u8; 2] = [0x90, 0x00];

    fn version_reply(major: u8, minor: u8, patch: u8) -> Vec<u8> {
        vec![0x00, major, minor, patch, 0x90, 0x00]
    }

    fn address_reply(secret: [u8; 32]) -> (PublicKey, Vec<u8>) {
        let sk = SecretKey::from_slice(&secret).unwrap();
        let pk = PublicKey::from_secret_key(&Secp256k1::new(), &sk);
        let address = hex::encode(Address::from_public_key(&pk).as_bytes());

        let mut reply = vec![65];
        reply.extend_from_slice(&pk.serialize_uncompressed());
        reply.push(address.len() as u8);
        reply.extend_from_slice(address.as_bytes());
        reply.extend_from_slice(&OK);
        (pk, reply)
    }

    async fn open_with(replies: Vec<Vec<u8>>) -> LedgerEthereumDriver {
        let io: Box<dyn DeviceIo> = Box::new(LoopbackIo::new(replies));
        let mut driver = LedgerEthereumDriver::new(Duration::from_millis(10));
        driver.open(Arc::new(Mutex::new(io)), "").await.unwrap();
        driver
    }

    #[test]
    fn test_zero_read_timeout_is_clamped() {
        let driver = LedgerEthereumDriver::new(Duration::ZERO);
        assert_eq!(driver.read_timeout, MIN_READ_TIMEOUT);
    }

    #[tokio::test]
    async fn test_open_reads_version() {
        let driver = open_with(vec![version_reply(1, 10, 3)]).await;
        assert_eq!(driver.version(), Some(AppVersion { major: 1, minor: 10, patch: 3 }));
        assert_eq!(driver.status().text, "Ethereum app v1.10.3 online");
    }

    #[tokio::test]
    async fn test_open_offline_when_app_closed() {
        let mut driver = open_with(vec![vec![0x6D, 0x02]]).await;
        assert_eq!(driver.status().text, "Ethereum app offline");

        let result = driver.derive(&DerivationPath::ethereum_default()).await;
        assert!(matches!(result, Err(HardwareError::DeviceCommunication(_))));
    }

    #[tokio::test]
    async fn test_derive_parses_reply() {
        let (pk, reply) = address_reply([7u8; 32]);
        let mut driver = open_with(vec![version_reply(1, 10, 0), reply]).await;

        let (address, public_key) = driver.derive(&DerivationPath::ethereum_default()).await.unwrap();
        assert_eq!(public_key, pk);
        assert_eq!(address, Address::from_public_key(&pk));
    }

    #[tokio::test]
    async fn test_sign_reorders_signature() {
        let mut device_reply = vec![28u8];
        device_reply.extend_from_slice(&[0x11; 32]);
        device_reply.extend_from_slice(&[0x22; 32]);
        device_reply.extend_from_slice(&OK);

        let mut driver = open_with(vec![version_reply(1, 10, 0), device_reply]).await;
        let signature = driver
            .sign_typed_message(&DerivationPath::ethereum_default(), &[0xAA; 32], &[0xBB; 32])
            .await
            .unwrap();

        assert_eq!(signature.len(), 65);
        assert_eq!(&signature[..32], &[0x11; 32]);
        assert_eq!(&signature[32..64], &[0x22; 32]);
        assert_eq!(signature[64], 28);
    }

    #[tokio::test]
    async fn test_sign_requires_recent_app() {
        let mut driver = open_with(vec![version_reply(1, 4, 9)]).await;
        let result = driver
            .sign_typed_message(&DerivationPath::ethereum_default(), &[0; 32], &[0; 32])
            .await;
        assert!(matches!(result, Err(HardwareError::DeviceCommunication(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_records_failure() {
        // 空回复连状态字都没有
        let mut driver = open_with(vec![version_reply(1, 10, 0), vec![]]).await;
        assert!(driver.heartbeat().await.is_err());
        assert!(!driver.status().is_operational());
    }

    #[test]
    fn test_address_reply_mismatch() {
        let (_, mut reply) = address_reply([7u8; 32]);
        // 篡改address的第一个 hex 字符
        let addr_offset = 1 + 65 + 1;
        reply[addr_offset] = if reply[addr_offset] == b'0' { b'1' } else { b'0' };
        reply.truncate(reply.len() - 2);
        assert!(parse_address_reply(&reply).is_err());
    }
}
