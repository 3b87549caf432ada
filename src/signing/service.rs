//! 硬件签名服务
//!
//! 在 hub 中找到唯一一台设备，派生账户，请求设备签名，并在返回前用公钥恢复
//! validate签名。设备返回的签名不经validate绝不外泄。

use crate::core::config::TypedDataConfig;
use crate::core::errors::{HardwareError, Result};
use crate::core::types::DerivationPath;
use crate::hardware::hub::LedgerHub;
use crate::hardware::wallet::LedgerWallet;
use crate::signing::address::bech32_address;
use crate::signing::eip712::envelope_from_sign_doc;
use crate::signing::verify::verify_signature;
use tracing::{debug, info};

/// 唯一支持的签名模式
pub const SIGN_MODE_LEGACY_AMINO_JSON: u8 = 0;

/// 基于单台 Ledger 的签名服务
#[derive(Debug)]
pub struct LedgerSigner {
    wallet: LedgerWallet,
    typed_data: TypedDataConfig,
}

impl LedgerSigner {
    /// 发现并打开唯一连接的设备
    ///
    /// 没有设备返回 `NoDeviceFound`，多于一台返回 `MultipleDevicesFound`，不会自动选择。
    pub async fn discover(hub: &LedgerHub, typed_data: TypedDataConfig) -> Result<Self> {
        let mut wallets = hub.wallets().await;
        let wallet = match wallets.len() {
            0 => return Err(HardwareError::NoDeviceFound),
            1 => wallets.remove(0),
            n => return Err(HardwareError::MultipleDevicesFound(n)),
        };

        let signer = Self { wallet, typed_data };
        signer.ensure_open().await?;
        info!("🔐 使用硬件wallet: {}", signer.wallet.identity());
        Ok(signer)
    }

    pub fn wallet(&self) -> &LedgerWallet {
        &self.wallet
    }

    /// 65 字节未压缩公钥
    pub async fn public_key(&self, path: &DerivationPath) -> Result<[u8; 65]> {
        self.ensure_open().await?;
        let account = self.wallet.derive(path, true).await?;
        Ok(account.public_key.serialize_uncompressed())
    }

    /// 公钥与 bech32 address
    pub async fn address(&self, path: &DerivationPath, hrp: &str) -> Result<([u8; 65], String)> {
        self.ensure_open().await?;
        let account = self.wallet.derive(path, true).await?;
        let address = bech32_address(hrp, &account.address)?;
        Ok((account.public_key.serialize_uncompressed(), address))
    }

    /// 对 legacy amino JSON 文档签名，返回validate过的 r ‖ s ‖ v
    pub async fn sign(&self, path: &DerivationPath, sign_doc: &[u8], sign_mode: u8) -> Result<Vec<u8>> {
        if sign_mode != SIGN_MODE_LEGACY_AMINO_JSON {
            return Err(HardwareError::UnsupportedSignMode(sign_mode));
        }

        // 先解析文档，避免无效请求触碰设备
        let envelope = envelope_from_sign_doc(sign_doc, &self.typed_data)?;

        self.ensure_open().await?;
        let account = self.wallet.derive(path, true).await?;
        let signature = self
            .wallet
            .sign_typed_data(&account, &envelope.to_bytes())
            .await?;

        verify_signature(&account.public_key, &envelope, &signature)?;
        debug!("签名validate通过: {}", account.address);
        Ok(signature)
    }

    pub async fn close(&self) -> Result<()> {
        self.wallet.close().await
    }

    /// 心跳failed会关闭wallet，这里显式重新打开
    async fn ensure_open(&self) -> Result<()> {
        match self.wallet.open("").await {
            Ok(()) | Err(HardwareError::AlreadyOpen) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
