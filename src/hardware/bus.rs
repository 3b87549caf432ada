//! USB/HID 总线抽象
//!
//! [`DeviceBus`] 负责枚举与打开设备，[`DeviceIo`] 是打开后的原始读写句柄。
//! 启用 `ledger` feature 时提供基于 hidapi 的 [`HidBus`]。

use crate::core::errors::Result;
use crate::core::types::DeviceIdentity;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 已打开设备的原始读写
pub trait DeviceIo: Send {
    /// 写入一个 HID report，返回写入字节数
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// 读取一个 HID report；超时返回 `Ok(0)`
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// wallet与 driver 共享的设备句柄
pub type SharedDevice = Arc<Mutex<Box<dyn DeviceIo>>>;

/// 设备枚举能力
pub trait DeviceBus: Send + Sync {
    /// 当前主机是否具备可用的枚举能力
    fn supported(&self) -> bool {
        true
    }

    /// 枚举指定厂商的所有 HID 接口
    fn enumerate(&self, vendor_id: u16) -> Result<Vec<DeviceIdentity>>;

    /// 打开指定设备
    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn DeviceIo>>;
}

#[cfg(feature = "ledger")]
pub use hid::HidBus;

#[cfg(feature = "ledger")]
mod hid {
    use super::{DeviceBus, DeviceIo};
    use crate::core::errors::{HardwareError, Result};
    use crate::core::types::DeviceIdentity;
    use hidapi::{HidApi, HidDevice};
    use std::ffi::CString;
    use std::time::Duration;
    use tracing::debug;

    /// hidapi 总线
    ///
    /// 每次枚举都重新创建 `HidApi`，保证拿到最新的设备列表。
    pub struct HidBus;

    impl HidBus {
        pub fn new() -> Result<Self> {
            HidApi::new().map_err(|e| {
                HardwareError::UnsupportedPlatform(format!("HID API 初始化failed: {}", e))
            })?;
            Ok(Self)
        }

        fn api() -> Result<HidApi> {
            HidApi::new().map_err(|e| HardwareError::DeviceCommunication(e.to_string()))
        }
    }

    impl DeviceBus for HidBus {
        fn enumerate(&self, vendor_id: u16) -> Result<Vec<DeviceIdentity>> {
            let api = Self::api()?;
            let devices: Vec<DeviceIdentity> = api
                .device_list()
                .filter(|d| d.vendor_id() == vendor_id)
                .map(|d| DeviceIdentity {
                    bus_path: d.path().to_string_lossy().into_owned(),
                    vendor_id: d.vendor_id(),
                    product_id: d.product_id(),
                    usage_page: d.usage_page(),
                    interface_number: d.interface_number(),
                })
                .collect();

            debug!("HID 枚举到 {} 个接口 (vendor {:04x})", devices.len(), vendor_id);
            Ok(devices)
        }

        fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn DeviceIo>> {
            let api = Self::api()?;
            let path = CString::new(identity.bus_path.clone())
                .map_err(|e| HardwareError::DeviceCommunication(e.to_string()))?;
            let device = api.open_path(&path).map_err(|e| {
                HardwareError::DeviceCommunication(format!("打开设备failed: {}", e))
            })?;
            Ok(Box::new(HidIo { device }))
        }
    }

    struct HidIo {
        device: HidDevice,
    }

    impl DeviceIo for HidIo {
        fn write(&mut self, data: &[u8]) -> Result<usize> {
            self.device
                .write(data)
                .map_err(|e| HardwareError::DeviceCommunication(format!("发送数据failed: {}", e)))
        }

        fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
            self.device
                .read_timeout(buf, millis)
                .map_err(|e| HardwareError::DeviceCommunication(format!("接收数据failed: {}", e)))
        }
    }
}
