// filepath: src/hardware/mock.rs
//! 进程内模拟设备
//!
//! [`MockBus`] 模拟 USB 总线（可插拔设备、枚举计数、枚举failed），[`MockDriver`]
//! 用由路径派生的真实 secp256k1 私钥签名。集成测试与 `hw_signer --simulate` 使用。

use crate::core::config::{LEDGER_INTERFACE_NUMBER, LEDGER_USAGE_PAGE, LEDGER_VENDOR_ID};
use crate::core::errors::{HardwareError, Result};
use crate::core::types::{Address, DerivationPath, DeviceIdentity};
use crate::hardware::bus::{DeviceBus, DeviceIo, SharedDevice};
use crate::hardware::driver::{Driver, DriverStatus};
use crate::signing::eip712::TypedDataEnvelope;
use async_trait::async_trait;
use parking_lot::Mutex;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use zeroize::Zeroizing;

/// Nano X
const MOCK_PRODUCT_ID: u16 = 0x0004;

/// 第 `index` 台模拟设备的 identity
pub fn mock_identity(index: usize) -> DeviceIdentity {
    DeviceIdentity {
        bus_path: format!("mock-{:02}", index),
        vendor_id: LEDGER_VENDOR_ID,
        product_id: MOCK_PRODUCT_ID,
        usage_page: LEDGER_USAGE_PAGE,
        interface_number: LEDGER_INTERFACE_NUMBER,
    }
}

/// 模拟 USB 总线
#[derive(Debug, Default)]
pub struct MockBus {
    devices: Mutex<Vec<DeviceIdentity>>,
    enumerations: AtomicUsize,
    fail_enumeration: AtomicBool,
    unsupported: bool,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预先插入 `count` 台设备
    pub fn with_devices(count: usize) -> Self {
        let bus = Self::new();
        bus.set_devices((0..count).map(mock_identity).collect());
        bus
    }

    /// 没有枚举能力的主机
    pub fn unsupported() -> Self {
        Self { unsupported: true, ..Self::default() }
    }

    pub fn identities(&self) -> Vec<DeviceIdentity> {
        self.devices.lock().clone()
    }

    pub fn set_devices(&self, devices: Vec<DeviceIdentity>) {
        *self.devices.lock() = devices;
    }

    pub fn plug(&self, identity: DeviceIdentity) {
        self.devices.lock().push(identity);
    }

    pub fn unplug(&self, bus_path: &str) {
        self.devices.lock().retain(|d| d.bus_path != bus_path);
    }

    /// 已执行的枚举次数
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }
}

impl DeviceBus for MockBus {
    fn supported(&self) -> bool {
        !self.unsupported
    }

    fn enumerate(&self, vendor_id: u16) -> Result<Vec<DeviceIdentity>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(HardwareError::DeviceCommunication("mock enumeration failed".to_string()));
        }
        Ok(self
            .devices
            .lock()
            .iter()
            .filter(|d| d.vendor_id == vendor_id)
            .cloned()
            .collect())
    }

    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn DeviceIo>> {
        if !self.devices.lock().contains(identity) {
            return Err(HardwareError::DeviceCommunication(format!(
                "device not connected: {}",
                identity
            )));
        }
        Ok(Box::new(MockIo))
    }
}

/// 丢弃写入、读取总是超时的句柄
struct MockIo;

impl DeviceIo for MockIo {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(data.len())
    }

    fn read_timeout(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Default)]
struct MockShared {
    seed: [u8; 32],
    device: Mutex<Option<SharedDevice>>,
    failure: Mutex<Option<String>>,
    derived: Mutex<Vec<DerivationPath>>,

    fail_open: AtomicBool,
    fail_heartbeat: AtomicBool,
    corrupt_signatures: AtomicBool,
    hold_signatures: AtomicBool,
    hold_derivations: AtomicBool,

    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    heartbeat_calls: AtomicUsize,
    sign_calls: AtomicUsize,

    /// 签名开始等待确认
    prompted: Notify,
    /// user按下确认
    confirmed: Notify,
}

/// 模拟 Ledger driver
///
/// 克隆共享同一份状态，测试可以在把 driver 交给wallet后继续控制和观察它。
#[derive(Clone, Default)]
pub struct MockDriver {
    shared: Arc<MockShared>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不同 seed 的设备派生出不同的账户
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            shared: Arc::new(MockShared { seed, ..MockShared::default() }),
        }
    }

    pub fn fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_heartbeat(&self, fail: bool) {
        self.shared.fail_heartbeat.store(fail, Ordering::SeqCst);
    }

    /// 返回被篡改的签名
    pub fn corrupt_signatures(&self, corrupt: bool) {
        self.shared.corrupt_signatures.store(corrupt, Ordering::SeqCst);
    }

    /// 签名请求一直挂起，直到 [`MockDriver::confirm`]
    pub fn hold_signatures(&self, hold: bool) {
        self.shared.hold_signatures.store(hold, Ordering::SeqCst);
    }

    /// 派生请求一直挂起，直到 [`MockDriver::confirm`]
    pub fn hold_derivations(&self, hold: bool) {
        self.shared.hold_derivations.store(hold, Ordering::SeqCst);
    }

    /// 等待下一个挂起的请求在设备上弹出
    pub async fn wait_for_prompt(&self) {
        self.shared.prompted.notified().await;
    }

    /// 模拟user确认挂起的请求
    pub fn confirm(&self) {
        self.shared.confirmed.notify_one();
    }

    pub fn open_calls(&self) -> usize {
        self.shared.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.shared.heartbeat_calls.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> usize {
        self.shared.sign_calls.load(Ordering::SeqCst)
    }

    /// driver 实际收到的派生路径
    pub fn derived_paths(&self) -> Vec<DerivationPath> {
        self.shared.derived.lock().clone()
    }

    /// 与设备内部一致的私钥：sha256(seed ‖ path)
    fn secret_key(&self, path: &DerivationPath) -> Result<SecretKey> {
        let mut hasher = Sha256::new();
        hasher.update(self.shared.seed);
        hasher.update(path.to_bytes());
        let material = Zeroizing::new(<[u8; 32]>::from(hasher.finalize()));

        SecretKey::from_slice(&material[..])
            .map_err(|e| HardwareError::DeviceCommunication(format!("mock key derivation: {}", e)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.device.lock().is_none() {
            return Err(HardwareError::DeviceCommunication("mock device not open".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn status(&self) -> DriverStatus {
        let failure = self.shared.failure.lock().clone();
        let text = if self.shared.device.lock().is_some() {
            "Ethereum app v1.10.0 (simulated)"
        } else {
            "Closed"
        };
        DriverStatus { text: text.to_string(), failure }
    }

    async fn open(&mut self, device: SharedDevice, _passphrase: &str) -> Result<()> {
        self.shared.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(HardwareError::DeviceCommunication("mock open failed".to_string()));
        }
        *self.shared.failure.lock() = None;
        *self.shared.device.lock() = Some(device);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.device.lock().take();
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        self.shared.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_heartbeat.load(Ordering::SeqCst) {
            let failure = "device unplugged".to_string();
            *self.shared.failure.lock() = Some(failure.clone());
            return Err(HardwareError::DeviceCommunication(failure));
        }
        self.ensure_open()
    }

    async fn derive(&mut self, path: &DerivationPath) -> Result<(Address, PublicKey)> {
        self.ensure_open()?;
        self.shared.derived.lock().push(path.clone());

        if self.shared.hold_derivations.load(Ordering::SeqCst) {
            self.shared.prompted.notify_one();
            self.shared.confirmed.notified().await;
        }

        let secret = self.secret_key(path)?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret);
        Ok((Address::from_public_key(&public_key), public_key))
    }

    async fn sign_typed_message(
        &mut self,
        path: &DerivationPath,
        message_hash: &[u8; 32],
        domain_hash: &[u8; 32],
    ) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.shared.sign_calls.fetch_add(1, Ordering::SeqCst);

        if self.shared.hold_signatures.load(Ordering::SeqCst) {
            self.shared.prompted.notify_one();
            self.shared.confirmed.notified().await;
        }

        let hash = TypedDataEnvelope::new(*domain_hash, *message_hash).signing_hash();
        let message = Message::from_slice(&hash)
            .map_err(|e| HardwareError::DeviceCommunication(e.to_string()))?;
        let secret = self.secret_key(path)?;
        let (recovery_id, compact) = Secp256k1::signing_only()
            .sign_ecdsa_recoverable(&message, &secret)
            .serialize_compact();

        let mut signature = compact.to_vec();
        signature.push(recovery_id.to_i32() as u8 + 27);

        if self.shared.corrupt_signatures.load(Ordering::SeqCst) {
            signature[10] ^= 0xff;
        }
        Ok(signature)
    }
}
