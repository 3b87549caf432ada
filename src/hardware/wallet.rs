//! 硬件wallet生命周期
//!
//! [`LedgerWallet`] 管理一台物理设备的 open / close 状态、心跳任务以及已固定的
//! 派生路径。内部使用两把锁：
//!
//! - **state 锁**（`RwLock<WalletState>`）：只用于簿记，持有时间很短
//! - **transport 锁**（`Mutex<Box<dyn Driver>>`）：设备 I/O，可能无限期等待user确认
//!
//! 所有可能等待user的设备 I/O 都只在持有 state 读锁的情况下fetch transport 锁，
//! 因此 `close` 拿到写锁时不可能有其他 transport 持有者。

use crate::core::errors::{HardwareError, Result};
use crate::core::types::{Account, Address, DerivationPath, DeviceIdentity};
use crate::hardware::bus::{DeviceBus, SharedDevice};
use crate::hardware::driver::{Driver, DriverStatus};
use crate::hardware::hub::PendingConfirmations;
use crate::signing::eip712::TypedDataEnvelope;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 心跳周期下限；`tokio::time::interval` 不接受零周期
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// 一台已发现的硬件wallet
///
/// 克隆得到的是同一个wallet的另一个句柄。
#[derive(Clone)]
pub struct LedgerWallet {
    inner: Arc<WalletInner>,
}

struct WalletInner {
    identity: DeviceIdentity,
    bus: Arc<dyn DeviceBus>,
    confirmations: Arc<PendingConfirmations>,
    heartbeat_interval: Duration,
    state: RwLock<WalletState>,
    transport: Mutex<Box<dyn Driver>>,
}

#[derive(Default)]
struct WalletState {
    /// `Some` 当且仅当wallet处于打开状态
    device: Option<SharedDevice>,
    /// address -> 派生路径，先写入者生效
    paths: HashMap<Address, DerivationPath>,
    heartbeat: Option<Heartbeat>,
}

/// 心跳任务句柄
struct Heartbeat {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// 通知任务退出并等待其确认
    async fn stop(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.handle).await {
            if e.is_panic() {
                warn!("💔 心跳任务 panic: {}", e);
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl LedgerWallet {
    /// 为枚举得到的设备创建一个已关闭的wallet
    ///
    /// `heartbeat_interval` 小于 [`MIN_HEARTBEAT_INTERVAL`] 时按下限处理。
    pub fn new(
        identity: DeviceIdentity,
        bus: Arc<dyn DeviceBus>,
        driver: Box<dyn Driver>,
        confirmations: Arc<PendingConfirmations>,
        heartbeat_interval: Duration,
    ) -> Self {
        if heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            warn!("⚠️ 心跳周期 {:?} 过小，使用 {:?}", heartbeat_interval, MIN_HEARTBEAT_INTERVAL);
        }
        let heartbeat_interval = heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);

        Self {
            inner: Arc::new(WalletInner {
                identity,
                bus,
                confirmations,
                heartbeat_interval,
                state: RwLock::new(WalletState::default()),
                transport: Mutex::new(driver),
            }),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    /// 打开设备、初始化 driver 并启动心跳
    pub async fn open(&self, passphrase: &str) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.device.is_some() {
            return Err(HardwareError::AlreadyOpen);
        }

        let io = self.inner.bus.open(&self.inner.identity)?;
        let device: SharedDevice = Arc::new(SyncMutex::new(io));

        // 写锁下不存在其他 transport 持有者
        self.inner
            .transport
            .lock()
            .await
            .open(device.clone(), passphrase)
            .await?;

        state.device = Some(device);
        state.paths.clear();
        state.heartbeat = Some(self.spawn_heartbeat());

        info!("🔓 wallet已打开: {}", self.inner.identity);
        Ok(())
    }

    /// 停止心跳、释放设备并清空已固定路径
    ///
    /// 会一直等待正在进行的设备操作（包括等待user确认的签名）结束。
    pub async fn close(&self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.device.is_none() {
            return Err(HardwareError::Closed);
        }

        if let Some(heartbeat) = state.heartbeat.take() {
            heartbeat.stop().await;
        }

        let device = state.device.take();
        state.paths.clear();

        let result = self.inner.transport.lock().await.close().await;
        drop(device);

        info!("🔒 wallet已关闭: {}", self.inner.identity);
        result
    }

    /// 派生账户；`pin` 为 true 时把路径固定到该address上供后续签名使用
    pub async fn derive(&self, path: &DerivationPath, pin: bool) -> Result<Account> {
        let path = path.hardened();

        let (address, public_key) = {
            let state = self.inner.state.read().await;
            if state.device.is_none() {
                return Err(HardwareError::Closed);
            }
            let mut driver = self.inner.transport.lock().await;
            driver.derive(&path).await?
        };

        if pin {
            let mut state = self.inner.state.write().await;
            if state.device.is_some() {
                state.paths.entry(address).or_insert(path);
            } else {
                debug!("wallet在派生期间被关闭，跳过路径固定: {}", address);
            }
        }

        Ok(Account::new(address, public_key))
    }

    /// 请求设备对 EIP-712 信封签名，返回未经validate的 r ‖ s ‖ v
    pub async fn sign_typed_data(&self, account: &Account, payload: &[u8]) -> Result<Vec<u8>> {
        let envelope = TypedDataEnvelope::parse(payload)?;

        let state = self.inner.state.read().await;
        if state.device.is_none() {
            return Err(HardwareError::Closed);
        }
        let path = state
            .paths
            .get(&account.address)
            .cloned()
            .ok_or(HardwareError::UnknownAccount(account.address))?;

        // 等待user确认期间禁止会打开设备的枚举
        let _pending = self.inner.confirmations.begin().await;

        info!("✍️ 请在设备上确认签名 ({})", account.address);
        let mut driver = self.inner.transport.lock().await;
        let signature = driver
            .sign_typed_message(&path, envelope.message_hash(), envelope.domain_separator())
            .await?;
        drop(driver);
        drop(state);

        Ok(signature)
    }

    /// 非阻塞状态query
    ///
    /// 关闭后仍保留 driver 最近一次的failed（例如心跳failed），hub 据此替换该wallet。
    pub fn status(&self) -> DriverStatus {
        let Ok(state) = self.inner.state.try_read() else {
            return DriverStatus::ok("Busy");
        };
        let Ok(driver) = self.inner.transport.try_lock() else {
            return DriverStatus::ok("Busy");
        };

        let status = driver.status();
        if state.device.is_none() {
            return DriverStatus { text: "Closed".to_string(), failure: status.failure };
        }
        status
    }

    /// wallet是否处于打开状态
    ///
    /// 非阻塞：state 锁被占用时返回 true，与 [`status`](Self::status) 报告 "Busy"
    /// 的情形一致。这包括 `close()` 正持有写锁的时候，因此 `close()` 返回前结果
    /// 可能仍为 true；需要确定结果时先等待 `close()` 完成。
    pub fn is_open(&self) -> bool {
        match self.inner.state.try_read() {
            Ok(state) => state.device.is_some(),
            Err(_) => true,
        }
    }

    /// 当前会话中已固定的账户路径，按address排序
    pub async fn accounts(&self) -> Vec<(Address, DerivationPath)> {
        let state = self.inner.state.read().await;
        let mut accounts: Vec<_> = state
            .paths
            .iter()
            .map(|(address, path)| (*address, path.clone()))
            .collect();
        accounts.sort_by(|a, b| a.0.cmp(&b.0));
        accounts
    }

    /// 该地址固定的派生路径
    pub async fn pinned_path(&self, address: &Address) -> Option<DerivationPath> {
        self.inner.state.read().await.paths.get(address).cloned()
    }

    fn spawn_heartbeat(&self) -> Heartbeat {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_loop(
            Arc::downgrade(&self.inner),
            cancel.clone(),
            self.inner.heartbeat_interval,
        ));
        Heartbeat { cancel, handle }
    }
}

impl fmt::Debug for LedgerWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerWallet")
            .field("identity", &self.inner.identity)
            .field("open", &self.is_open())
            .finish()
    }
}

/// 一次心跳探测的结果
enum Probe {
    Alive,
    /// 锁被占用或wallet已关闭，本轮跳过
    Skipped,
    Failed(HardwareError),
}

async fn heartbeat_loop(wallet: Weak<WalletInner>, cancel: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval 的第一个 tick 立即完成
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(inner) = wallet.upgrade() else {
            return;
        };

        match inner.probe().await {
            Probe::Alive | Probe::Skipped => {}
            Probe::Failed(err) => {
                warn!("💔 心跳failed，关闭wallet {}: {}", inner.identity, err);
                inner.close_after_failure(&cancel).await;
                return;
            }
        }
    }
}

impl WalletInner {
    async fn probe(&self) -> Probe {
        let Ok(state) = self.state.try_read() else {
            return Probe::Skipped;
        };
        if state.device.is_none() {
            return Probe::Skipped;
        }
        let Ok(mut driver) = self.transport.try_lock() else {
            return Probe::Skipped;
        };

        match driver.heartbeat().await {
            Ok(()) => Probe::Alive,
            Err(err) => Probe::Failed(err),
        }
    }

    /// 由心跳任务自身执行的关闭；不等待自己的 JoinHandle
    async fn close_after_failure(&self, cancel: &CancellationToken) {
        let mut state = tokio::select! {
            biased;
            // close() 已经持有写锁并在等待本任务退出
            _ = cancel.cancelled() => return,
            state = self.state.write() => state,
        };
        if cancel.is_cancelled() {
            return;
        }

        drop(state.heartbeat.take());
        let device = state.device.take();
        state.paths.clear();

        if let Err(e) = self.transport.lock().await.close().await {
            warn!("driver 关闭failed {}: {}", self.identity, e);
        }
        drop(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockBus, MockDriver};
    use crate::signing::eip712::EIP712_PREFIX;

    fn wallet_with(driver: MockDriver, heartbeat: Duration) -> (LedgerWallet, MockDriver) {
        let bus = Arc::new(MockBus::with_devices(1));
        let identity = bus.identities()[0].clone();
        let handle = driver.clone();
        let wallet = LedgerWallet::new(
            identity,
            bus,
            Box::new(driver),
            Arc::new(PendingConfirmations::default()),
            heartbeat,
        );
        (wallet, handle)
    }

    fn payload() -> Vec<u8> {
        let mut payload = EIP712_PREFIX.to_vec();
        payload.extend_from_slice(&[0xaa; 32]);
        payload.extend_from_slice(&[0xbb; 32]);
        payload
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let (wallet, _) = wallet_with(MockDriver::new(), Duration::from_secs(60));
        wallet.open("").await.unwrap();
        assert!(matches!(wallet.open("").await, Err(HardwareError::AlreadyOpen)));
        wallet.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_wallet_rejects_operations() {
        let (wallet, _) = wallet_with(MockDriver::new(), Duration::from_secs(60));
        let path = DerivationPath::ethereum_default();

        assert!(matches!(wallet.close().await, Err(HardwareError::Closed)));
        assert!(matches!(wallet.derive(&path, true).await, Err(HardwareError::Closed)));
        assert_eq!(wallet.status().text, "Closed");
    }

    #[tokio::test]
    async fn test_failed_driver_open_leaves_wallet_closed() {
        let driver = MockDriver::new();
        driver.fail_open(true);
        let (wallet, _) = wallet_with(driver, Duration::from_secs(60));

        assert!(wallet.open("").await.is_err());
        assert!(!wallet.is_open());
    }

    #[tokio::test]
    async fn test_derive_hardens_prefix() {
        let (wallet, driver) = wallet_with(MockDriver::new(), Duration::from_secs(60));
        wallet.open("").await.unwrap();

        let soft = DerivationPath::new(vec![44, 60, 0, 0, 0]);
        let account = wallet.derive(&soft, true).await.unwrap();

        assert_eq!(
            wallet.pinned_path(&account.address).await,
            Some(DerivationPath::ethereum_default())
        );
        assert_eq!(driver.derived_paths(), vec![DerivationPath::ethereum_default()]);
    }

    #[tokio::test]
    async fn test_pin_first_write_wins() {
        let (wallet, _) = wallet_with(MockDriver::new(), Duration::from_secs(60));
        wallet.open("").await.unwrap();

        let path = DerivationPath::ethereum_default();
        let account = wallet.derive(&path, true).await.unwrap();
        wallet.derive(&path, true).await.unwrap();

        assert_eq!(wallet.accounts().await, vec![(account.address, path)]);
    }

    #[tokio::test]
    async fn test_unpinned_account_is_unknown() {
        let (wallet, driver) = wallet_with(MockDriver::new(), Duration::from_secs(60));
        wallet.open("").await.unwrap();

        let account = wallet.derive(&DerivationPath::ethereum_default(), false).await.unwrap();
        let result = wallet.sign_typed_data(&account, &payload()).await;

        assert!(matches!(result, Err(HardwareError::UnknownAccount(_))));
        assert_eq!(driver.sign_calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_payload_rejected() {
        let (wallet, driver) = wallet_with(MockDriver::new(), Duration::from_secs(60));
        wallet.open("").await.unwrap();
        let account = wallet.derive(&DerivationPath::ethereum_default(), true).await.unwrap();

        let mut bad = payload();
        bad[1] = 0x00;
        assert!(matches!(
            wallet.sign_typed_data(&account, &bad).await,
            Err(HardwareError::UnsupportedPayload(_))
        ));
        assert!(matches!(
            wallet.sign_typed_data(&account, &payload()[..65]).await,
            Err(HardwareError::UnsupportedPayload(_))
        ));
        assert_eq!(driver.sign_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_clears_paths() {
        let (wallet, _) = wallet_with(MockDriver::new(), Duration::from_secs(60));
        wallet.open("").await.unwrap();
        wallet.derive(&DerivationPath::ethereum_default(), true).await.unwrap();

        wallet.close().await.unwrap();
        wallet.open("").await.unwrap();
        assert!(wallet.accounts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failure_closes_wallet() {
        let (wallet, driver) = wallet_with(MockDriver::new(), Duration::from_secs(1));
        wallet.open("").await.unwrap();
        wallet.derive(&DerivationPath::ethereum_default(), true).await.unwrap();

        driver.fail_heartbeat(true);
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert!(!wallet.is_open());
        assert!(!wallet.status().is_operational());
        assert!(wallet.accounts().await.is_empty());
        assert!(matches!(
            wallet.derive(&DerivationPath::ethereum_default(), false).await,
            Err(HardwareError::Closed)
        ));
        assert_eq!(driver.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_heartbeat_interval_is_clamped() {
        let (wallet, driver) = wallet_with(MockDriver::new(), Duration::ZERO);
        wallet.open("").await.unwrap();

        driver.fail_heartbeat(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!wallet.is_open());
        assert_eq!(driver.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_is_open_reports_true_while_state_locked() {
        let (wallet, _) = wallet_with(MockDriver::new(), Duration::from_secs(60));
        let _guard = wallet.inner.state.write().await;
        assert!(wallet.is_open());
        assert_eq!(wallet.status().text, "Busy");
    }
}
