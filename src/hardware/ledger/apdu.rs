//! APDU (Application Protocol Data Unit) 命令处理
//!
//! Ledger Ethereum 应用使用的 APDU 子集

use crate::core::errors::{HardwareError, Result};
use tracing::debug;

/// 短 APDU 数据字段上限
pub const MAX_APDU_DATA: usize = 255;

/// APDU 命令类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduClass {
    /// Ethereum 应用 CLA
    Ethereum = 0xE0,
}

/// APDU 指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduInstruction {
    /// fetch address与公钥
    GetEthPublicAddress = 0x02,
    /// fetch应用配置（版本）
    GetAppConfiguration = 0x06,
    /// EIP-712 签名
    SignEthEip712 = 0x0C,
}

/// APDU 命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    /// 创建新的 APDU 命令；数据超过 255 字节时返回error
    pub fn new(cla: ApduClass, ins: ApduInstruction, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_APDU_DATA {
            return Err(HardwareError::UnsupportedPayload(format!(
                "APDU data too long: {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            cla: cla as u8,
            ins: ins as u8,
            p1,
            p2,
            data,
        })
    }

    /// 序列化为 CLA INS P1 P2 Lc DATA
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, self.data.len() as u8]);
        bytes.extend_from_slice(&self.data);

        debug!(
            "APDU 命令: CLA={:02X} INS={:02X} P1={:02X} P2={:02X} Len={}",
            self.cla,
            self.ins,
            self.p1,
            self.p2,
            self.data.len()
        );
        bytes
    }
}

/// APDU 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ApduResponse {
    /// from字节数组解析：DATA ‖ SW1 ‖ SW2
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(HardwareError::DeviceCommunication("APDU 响应太短".to_string()));
        }

        let len = bytes.len();
        let response = Self {
            data: bytes[..len - 2].to_vec(),
            sw1: bytes[len - 2],
            sw2: bytes[len - 1],
        };
        debug!(
            "APDU 响应: SW={:04X} DataLen={}",
            response.status_code(),
            response.data.len()
        );
        Ok(response)
    }

    pub fn is_success(&self) -> bool {
        self.status_code() == 0x9000
    }

    pub fn status_code(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    /// error描述
    pub fn error_description(&self) -> String {
        match self.status_code() {
            0x9000 => "success".to_string(),
            0x5515 => "设备已锁定".to_string(),
            0x6511 | 0x6D02 | 0x6E01 => "Ethereum 应用未打开".to_string(),
            0x6700 => "数据长度error".to_string(),
            0x6982 => "安全状态不满足".to_string(),
            0x6985 => "user在设备上拒绝".to_string(),
            0x6A80 => "数据字段error".to_string(),
            0x6B00 => "参数error".to_string(),
            0x6D00 => "指令不支持".to_string(),
            0x6E00 => "类不支持".to_string(),
            0x6F00 => "Unknown error".to_string(),
            code => format!("未知状态: {:04X}", code),
        }
    }

    /// success时返回数据，否则转换为 `DeviceCommunication`
    pub fn into_data(self) -> Result<Vec<u8>> {
        if self.is_success() {
            return Ok(self.data);
        }
        Err(HardwareError::DeviceCommunication(format!(
            "APDU failed: {:04X} - {}",
            self.status_code(),
            self.error_description()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_apdu_command_serialization() {
        let cmd = ApduCommand::new(
            ApduClass::Ethereum,
            ApduInstruction::GetEthPublicAddress,
            0x00,
            0x01,
            vec![0x01, 0x02, 0x03],
        )
        .unwrap();

        assert_eq!(cmd.to_bytes(), vec![0xE0, 0x02, 0x00, 0x01, 0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_empty_data_command() {
        let cmd = ApduCommand::new(
            ApduClass::Ethereum,
            ApduInstruction::GetAppConfiguration,
            0x00,
            0x00,
            vec![],
        )
        .unwrap();

        let bytes = cmd.to_bytes();
        assert_eq!(bytes.len(), 5); // CLA + INS + P1 + P2 + Lc(0)
        assert_eq!(bytes[4], 0x00);
    }

    #[test]
    fn test_command_too_long() {
        let result = ApduCommand::new(
            ApduClass::Ethereum,
            ApduInstruction::SignEthEip712,
            0x00,
            0x00,
            vec![0u8; MAX_APDU_DATA + 1],
        );
        assert!(matches!(result, Err(HardwareError::UnsupportedPayload(_))));
    }

    #[test]
    fn test_apdu_response_parsing() {
        let response = ApduResponse::from_bytes(&[0x01, 0x02, 0x03, 0x90, 0x00]).unwrap();

        assert!(response.is_success());
        assert_eq!(response.into_data().unwrap(), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_apdu_response_too_short() {
        assert!(ApduResponse::from_bytes(&[0x90]).is_err());
        assert!(ApduResponse::from_bytes(&[]).is_err());
    }

    #[test_case(0x69, 0x85, "user在设备上拒绝"; "rejected")]
    #[test_case(0x55, 0x15, "设备已锁定"; "locked")]
    #[test_case(0x6D, 0x02, "Ethereum 应用未打开"; "app closed")]
    #[test_case(0x6A, 0x80, "数据字段error"; "bad data")]
    fn test_error_status(sw1: u8, sw2: u8, description: &str) {
        let response = ApduResponse::from_bytes(&[sw1, sw2]).unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error_description(), description);
        assert!(matches!(
            response.into_data(),
            Err(HardwareError::DeviceCommunication(_))
        ));
    }

    #[test]
    fn test_unknown_error_description() {
        let response = ApduResponse::from_bytes(&[0xAB, 0xCD]).unwrap();
        assert_eq!(response.error_description(), "未知状态: ABCD");
    }
}
