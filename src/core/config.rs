use crate::core::errors::{HardwareError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Ledger USB vendor id
pub const LEDGER_VENDOR_ID: u16 = 0x2c97;
/// Ledger HID usage page (macOS / Windows matching)
pub const LEDGER_USAGE_PAGE: u16 = 0xffa0;
/// Ledger HID interface number (Linux matching)
pub const LEDGER_INTERFACE_NUMBER: i32 = 0;

/// Known Ledger product ids, in plain, HID+U2F+WebUSB and HID+WebUSB flavours.
pub const LEDGER_PRODUCT_IDS: &[u16] = &[
    0x0000, // Ledger Blue
    0x0001, // Ledger Nano S
    0x0004, // Ledger Nano X
    0x0005, // Ledger Nano S Plus
    0x0006, // Ledger Nano FTS
    0x0015,
    0x1015,
    0x4015,
    0x5015,
    0x6015,
    0x0011,
    0x1011,
    0x4011,
    0x5011,
    0x6011,
];

/// Device hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// USB vendor id used for discovery
    #[serde(default = "HubConfig::default_vendor_id")]
    pub vendor_id: u16,

    /// USB product ids accepted during discovery
    #[serde(default = "HubConfig::default_product_ids")]
    pub product_ids: Vec<u16>,

    /// HID usage page matched on macOS / Windows
    #[serde(default = "HubConfig::default_usage_page")]
    pub usage_page: u16,

    /// HID interface number matched on Linux
    #[serde(default = "HubConfig::default_interface_number")]
    pub interface_number: i32,

    /// Minimum interval between two bus enumerations (milliseconds)
    #[serde(default = "HubConfig::default_refresh_cooldown_ms")]
    pub refresh_cooldown_ms: u64,

    /// hidapi on Linux opens the device while enumerating, which breaks a pending
    /// on-device confirmation. When set, enumeration is skipped while any
    /// confirmation is pending.
    #[serde(default = "HubConfig::default_enumeration_opens_device")]
    pub enumeration_opens_device: bool,
}

impl HubConfig {
    fn default_vendor_id() -> u16 { LEDGER_VENDOR_ID }
    fn default_product_ids() -> Vec<u16> { LEDGER_PRODUCT_IDS.to_vec() }
    fn default_usage_page() -> u16 { LEDGER_USAGE_PAGE }
    fn default_interface_number() -> i32 { LEDGER_INTERFACE_NUMBER }
    fn default_refresh_cooldown_ms() -> u64 { 500 }
    fn default_enumeration_opens_device() -> bool { cfg!(target_os = "linux") }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_millis(self.refresh_cooldown_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_ids: Self::default_product_ids(),
            usage_page: Self::default_usage_page(),
            interface_number: Self::default_interface_number(),
            refresh_cooldown_ms: Self::default_refresh_cooldown_ms(),
            enumeration_opens_device: Self::default_enumeration_opens_device(),
        }
    }
}

/// Per-wallet lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Heartbeat period of an open wallet (milliseconds)
    #[serde(default = "WalletConfig::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Timeout of a single HID read (milliseconds). Reads that wait on user
    /// confirmation are retried until the device answers.
    #[serde(default = "WalletConfig::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl WalletConfig {
    fn default_heartbeat_interval_ms() -> u64 { 1_000 }
    fn default_read_timeout_ms() -> u64 { 30_000 }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            read_timeout_ms: Self::default_read_timeout_ms(),
        }
    }
}

/// EIP-712 domain used when turning a legacy amino sign document into typed data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedDataConfig {
    #[serde(default = "TypedDataConfig::default_domain_name")]
    pub domain_name: String,

    #[serde(default = "TypedDataConfig::default_domain_version")]
    pub domain_version: String,

    #[serde(default = "TypedDataConfig::default_verifying_contract")]
    pub verifying_contract: String,

    #[serde(default = "TypedDataConfig::default_salt")]
    pub salt: String,

    /// Cosmos chain id -> EIP-712 numeric chain id
    #[serde(default = "TypedDataConfig::default_chain_ids")]
    pub chain_ids: HashMap<String, u64>,

    /// Numeric chain id used for chain ids missing from `chain_ids`
    #[serde(default = "TypedDataConfig::default_fallback_chain_id")]
    pub fallback_chain_id: u64,
}

impl TypedDataConfig {
    fn default_domain_name() -> String { "Injective Web3".to_string() }
    fn default_domain_version() -> String { "1.0.0".to_string() }
    fn default_verifying_contract() -> String {
        "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC".to_string()
    }
    fn default_salt() -> String { "0".to_string() }
    fn default_chain_ids() -> HashMap<String, u64> {
        let mut chain_ids = HashMap::with_capacity(1);
        chain_ids.insert("injective-1".to_string(), 1);
        chain_ids
    }
    fn default_fallback_chain_id() -> u64 { 11155111 }

    /// Resolve the EIP-712 chain id of a cosmos chain id
    pub fn eip712_chain_id(&self, chain_id: &str) -> u64 {
        self.chain_ids
            .get(chain_id)
            .copied()
            .unwrap_or(self.fallback_chain_id)
    }
}

impl Default for TypedDataConfig {
    fn default() -> Self {
        Self {
            domain_name: Self::default_domain_name(),
            domain_version: Self::default_domain_version(),
            verifying_contract: Self::default_verifying_contract(),
            salt: Self::default_salt(),
            chain_ids: Self::default_chain_ids(),
            fallback_chain_id: Self::default_fallback_chain_id(),
        }
    }
}

/// signer配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub typed_data: TypedDataConfig,
}

impl SignerConfig {
    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| HardwareError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围：心跳周期与 HID 读超时必须为正
    pub fn validate(&self) -> Result<()> {
        if self.wallet.heartbeat_interval_ms == 0 {
            return Err(HardwareError::Config(
                "wallet.heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }
        // hidapi 把 0 当作非阻塞读取
        if self.wallet.read_timeout_ms == 0 {
            return Err(HardwareError::Config(
                "wallet.read_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HardwareError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}
