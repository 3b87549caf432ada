//! 设备 hub
//!
//! 负责限速枚举 USB 总线、把枚举结果与已跟踪的wallet对账，并维护"等待user确认"
//! 计数器。在 Linux 上 hidapi 枚举会打开设备，从而打断设备上正在进行的确认，
//! 因此计数器非零时跳过枚举并直接返回缓存。

use crate::core::config::{HubConfig, SignerConfig, WalletConfig};
use crate::core::errors::{HardwareError, Result};
use crate::core::types::DeviceIdentity;
use crate::hardware::bus::DeviceBus;
use crate::hardware::driver::DriverFactory;
use crate::hardware::wallet::LedgerWallet;
use parking_lot::RwLock;
use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 等待user在设备上确认的操作计数
///
/// `comms` 锁同时串行化总线枚举：`begin` 会等待正在进行的枚举结束。
#[derive(Debug, Default)]
pub struct PendingConfirmations {
    comms: Mutex<()>,
    pending: AtomicUsize,
}

impl PendingConfirmations {
    /// 登记一个即将等待user确认的操作；guard 被 drop 时撤销
    pub async fn begin(&self) -> ConfirmationGuard<'_> {
        let _comms = self.comms.lock().await;
        self.pending.fetch_add(1, Ordering::SeqCst);
        ConfirmationGuard { pending: &self.pending }
    }

    pub fn count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// 见 [`PendingConfirmations::begin`]
#[must_use]
pub struct ConfirmationGuard<'a> {
    pending: &'a AtomicUsize,
}

impl Drop for ConfirmationGuard<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

struct HubState {
    /// 按 identity 排序且不重复
    wallets: Vec<LedgerWallet>,
    refreshed: Option<Instant>,
}

/// Ledger 设备 hub
pub struct LedgerHub {
    config: HubConfig,
    wallet_config: WalletConfig,
    bus: Arc<dyn DeviceBus>,
    driver_factory: DriverFactory,
    confirmations: Arc<PendingConfirmations>,
    state: RwLock<HubState>,
}

impl LedgerHub {
    /// 在给定总线上创建 hub；总线不可用时返回 `UnsupportedPlatform`
    pub fn new(
        config: HubConfig,
        wallet_config: WalletConfig,
        bus: Arc<dyn DeviceBus>,
        driver_factory: DriverFactory,
    ) -> Result<Self> {
        if !bus.supported() {
            return Err(HardwareError::UnsupportedPlatform(
                "USB HID enumeration is not available on this host".to_string(),
            ));
        }

        Ok(Self {
            config,
            wallet_config,
            bus,
            driver_factory,
            confirmations: Arc::new(PendingConfirmations::default()),
            state: RwLock::new(HubState {
                wallets: Vec::new(),
                refreshed: None,
            }),
        })
    }

    /// 使用 hidapi 总线与 Ledger Ethereum driver 创建 hub
    #[cfg(feature = "ledger")]
    pub fn native(config: &SignerConfig) -> Result<Self> {
        use crate::hardware::bus::HidBus;
        use crate::hardware::driver::Driver;
        use crate::hardware::ledger::LedgerEthereumDriver;

        let bus = Arc::new(HidBus::new()?);
        let read_timeout = config.wallet.read_timeout();
        let factory: DriverFactory = Arc::new(move || -> Box<dyn Driver> {
            Box::new(LedgerEthereumDriver::new(read_timeout))
        });

        Self::new(config.hub.clone(), config.wallet.clone(), bus, factory)
    }

    #[cfg(not(feature = "ledger"))]
    pub fn native(_config: &SignerConfig) -> Result<Self> {
        Err(HardwareError::UnsupportedPlatform(
            "built without the `ledger` feature, no USB HID support".to_string(),
        ))
    }

    /// 当前连接的wallet列表
    ///
    /// 距上次枚举超过冷却时间时才重新枚举，否则返回缓存快照。
    pub async fn wallets(&self) -> Vec<LedgerWallet> {
        self.refresh().await;
        self.state.read().wallets.clone()
    }

    /// 当前等待user确认的操作数
    pub fn pending_confirmations(&self) -> usize {
        self.confirmations.count()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn refresh_due(&self) -> bool {
        let cooldown = self.config.refresh_cooldown();
        self.state
            .read()
            .refreshed
            .map_or(true, |at| at.elapsed() > cooldown)
    }

    async fn refresh(&self) {
        if !self.refresh_due() {
            return;
        }

        let _comms = self.confirmations.comms.lock().await;
        // 等锁期间可能已经有人刷新过
        if !self.refresh_due() {
            return;
        }
        if self.config.enumeration_opens_device && self.confirmations.count() > 0 {
            debug!(
                "{} 个确认进行中，跳过设备枚举",
                self.confirmations.count()
            );
            return;
        }

        let mut candidates: Vec<DeviceIdentity> = match self.bus.enumerate(self.config.vendor_id) {
            Ok(devices) => devices.into_iter().filter(|d| self.is_candidate(d)).collect(),
            Err(e) => {
                warn!("设备枚举failed，保留缓存: {}", e);
                return;
            }
        };
        candidates.sort();
        candidates.dedup();

        let mut state = self.state.write();
        let tracked = std::mem::take(&mut state.wallets);
        state.wallets = reconcile(
            tracked,
            candidates,
            |wallet| wallet.identity(),
            |wallet| !wallet.status().is_operational(),
            |identity| self.new_wallet(identity),
        );
        state.refreshed = Some(Instant::now());
    }

    /// macOS / Windows 按 usage page 匹配，Linux 按 interface number 匹配
    fn is_candidate(&self, device: &DeviceIdentity) -> bool {
        device.vendor_id == self.config.vendor_id
            && self.config.product_ids.contains(&device.product_id)
            && (device.usage_page == self.config.usage_page
                || device.interface_number == self.config.interface_number)
    }

    fn new_wallet(&self, identity: DeviceIdentity) -> LedgerWallet {
        info!("🔌 发现 Ledger 设备: {}", identity);
        LedgerWallet::new(
            identity,
            self.bus.clone(),
            (self.driver_factory)(),
            self.confirmations.clone(),
            self.wallet_config.heartbeat_interval(),
        )
    }
}

/// 对账：把已跟踪列表与新的候选列表合并
///
/// 两个输入都必须按 key 排序，`candidates` 不得重复。结果按 key 排序：
/// - 排在候选之前的已跟踪项被丢弃
/// - key 相同且健康的已跟踪项原样保留，failed的被新建项取代
/// - 其余候选新建
pub fn reconcile<T, K, F, S, C>(
    tracked: Vec<T>,
    candidates: Vec<K>,
    key: F,
    failed: S,
    mut create: C,
) -> Vec<T>
where
    K: Ord + Display,
    F: Fn(&T) -> &K,
    S: Fn(&T) -> bool,
    C: FnMut(K) -> T,
{
    let mut tracked = tracked.into_iter().peekable();
    let mut merged = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        while let Some(dropped) = tracked.next_if(|t| key(t) < &candidate) {
            log_dropped(key(&dropped), failed(&dropped));
        }

        match tracked.next_if(|t| key(t) == &candidate) {
            Some(existing) if !failed(&existing) => merged.push(existing),
            Some(existing) => {
                warn!("🧹 替换failed的设备: {}", key(&existing));
                merged.push(create(candidate));
            }
            None => merged.push(create(candidate)),
        }
    }

    for dropped in tracked {
        log_dropped(key(&dropped), failed(&dropped));
    }

    merged
}

fn log_dropped(key: &impl Display, failed: bool) {
    if failed {
        warn!("🧹 清理failed的设备: {}", key);
    } else {
        info!("🔌 设备已断开: {}", key);
    }
}
