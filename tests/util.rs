// tests/util.rs
// Shared test helpers for integration tests

#![allow(dead_code)]

use hardware_signer::core::config::{HubConfig, WalletConfig};
use hardware_signer::hardware::driver::{Driver, DriverFactory};
use hardware_signer::hardware::mock::{MockBus, MockDriver};
use hardware_signer::hardware::LedgerHub;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A legacy amino JSON document accepted by the signer
pub const SIGN_DOC: &str = r#"{
    "account_number": "42",
    "chain_id": "injective-1",
    "fee": {"amount": [{"amount": "50000000000000", "denom": "inj"}], "gas": "150000"},
    "memo": "",
    "msgs": [{"type": "cosmos-sdk/MsgSend", "value": {"from_address": "inj1a", "to_address": "inj1b", "amount": [{"amount": "10", "denom": "inj"}]}}],
    "sequence": "7"
}"#;

/// Hub over a simulated bus, plus handles to every driver the hub created
pub struct Harness {
    pub bus: Arc<MockBus>,
    pub hub: LedgerHub,
    drivers: Arc<Mutex<Vec<MockDriver>>>,
}

impl Harness {
    /// Drivers in creation order
    pub fn drivers(&self) -> Vec<MockDriver> {
        self.drivers.lock().clone()
    }

    pub fn last_driver(&self) -> MockDriver {
        self.drivers.lock().last().cloned().expect("no driver created yet")
    }
}

/// Deterministic hub settings: enumeration always yields to pending confirmations
pub fn hub_config() -> HubConfig {
    HubConfig {
        enumeration_opens_device: true,
        ..HubConfig::default()
    }
}

pub fn harness(devices: usize) -> Harness {
    harness_with(devices, hub_config(), Duration::from_secs(1))
}

pub fn harness_with(devices: usize, config: HubConfig, heartbeat: Duration) -> Harness {
    let bus = Arc::new(MockBus::with_devices(devices));
    let drivers = Arc::new(Mutex::new(Vec::new()));

    let created = drivers.clone();
    let factory: DriverFactory = Arc::new(move || -> Box<dyn Driver> {
        let driver = MockDriver::new();
        created.lock().push(driver.clone());
        Box::new(driver)
    });

    let wallet_config = WalletConfig {
        heartbeat_interval_ms: heartbeat.as_millis() as u64,
        ..WalletConfig::default()
    };
    let hub = LedgerHub::new(config, wallet_config, bus.clone(), factory).expect("hub");

    Harness { bus, hub, drivers }
}

/// Let the hub cooldown elapse (tests run with paused time)
pub async fn past_cooldown() {
    tokio::time::advance(Duration::from_millis(501)).await;
}
