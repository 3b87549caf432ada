//! Ledger HID 传输层
//!
//! 把一个 APDU 切成 64 字节 HID report 并重组设备回复。每个 report 的头部：
//!
//! ```text
//! channel (2) | tag 0x05 (1) | sequence (2) | [首包: 总长度 (2)] | data
//! ```
//!
//! 写入时在最前面加一个 report ID (0x00)，读取到的 report 不带 report ID。

use crate::core::errors::{HardwareError, Result};
use crate::hardware::bus::DeviceIo;
use std::time::Duration;
use tracing::{debug, warn};

/// HID 数据包大小
pub const HID_PACKET_SIZE: usize = 64;

/// APDU 传输通道
const CHANNEL: u16 = 0x0101;

/// HID 命令标签
const TAG_APDU: u8 = 0x05;

/// 首包头部：channel + tag + seq + length
const FIRST_HEADER_LEN: usize = 7;

/// 后续包头部：channel + tag + seq
const NEXT_HEADER_LEN: usize = 5;

/// 把 payload 切分为 HID report（不含 report ID）
pub fn wrap_frames(payload: &[u8]) -> Vec<[u8; HID_PACKET_SIZE]> {
    let mut frames = Vec::new();
    let mut offset = 0;
    let mut sequence = 0u16;

    loop {
        let mut frame = [0u8; HID_PACKET_SIZE];
        frame[0..2].copy_from_slice(&CHANNEL.to_be_bytes());
        frame[2] = TAG_APDU;
        frame[3..5].copy_from_slice(&sequence.to_be_bytes());

        let data_start = if sequence == 0 {
            frame[5..7].copy_from_slice(&(payload.len() as u16).to_be_bytes());
            FIRST_HEADER_LEN
        } else {
            NEXT_HEADER_LEN
        };

        let chunk = (HID_PACKET_SIZE - data_start).min(payload.len() - offset);
        frame[data_start..data_start + chunk].copy_from_slice(&payload[offset..offset + chunk]);
        offset += chunk;
        frames.push(frame);

        if offset >= payload.len() {
            return frames;
        }
        sequence = sequence.wrapping_add(1);
    }
}

/// 重组设备回复
#[derive(Debug, Default)]
pub struct FrameAssembler {
    sequence: u16,
    total_len: Option<usize>,
    data: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一个 report；回复完整时返回 payload
    ///
    /// 非 APDU 通道或标签的 report 会被忽略。
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        if frame.len() < FIRST_HEADER_LEN {
            return Err(HardwareError::DeviceCommunication(format!(
                "HID report too short: {} bytes",
                frame.len()
            )));
        }

        let channel = u16::from_be_bytes([frame[0], frame[1]]);
        if channel != CHANNEL || frame[2] != TAG_APDU {
            debug!("忽略非 APDU report: channel={:04X} tag={:02X}", channel, frame[2]);
            return Ok(None);
        }

        let sequence = u16::from_be_bytes([frame[3], frame[4]]);
        if sequence != self.sequence {
            return Err(HardwareError::DeviceCommunication(format!(
                "序列号不匹配: 期待 {}, 收到 {}",
                self.sequence, sequence
            )));
        }

        let body = match self.total_len {
            None => {
                self.total_len = Some(u16::from_be_bytes([frame[5], frame[6]]) as usize);
                &frame[FIRST_HEADER_LEN..]
            }
            Some(_) => &frame[NEXT_HEADER_LEN..],
        };
        self.data.extend_from_slice(body);
        self.sequence = self.sequence.wrapping_add(1);

        match self.total_len {
            Some(len) if self.data.len() >= len => {
                let mut data = std::mem::take(&mut self.data);
                data.truncate(len);
                Ok(Some(data))
            }
            _ => Ok(None),
        }
    }
}

/// 发送 APDU 并读取完整回复
///
/// `wait_for_user` 为 true 时读超时会继续等待（设备正在等user确认），否则超时即failed。
pub fn exchange(
    io: &mut dyn DeviceIo,
    apdu: &[u8],
    timeout: Duration,
    wait_for_user: bool,
) -> Result<Vec<u8>> {
    for frame in wrap_frames(apdu) {
        let mut report = Vec::with_capacity(HID_PACKET_SIZE + 1);
        report.push(0x00); // Report ID
        report.extend_from_slice(&frame);
        io.write(&report)?;
    }

    let mut assembler = FrameAssembler::new();
    let mut buf = [0u8; HID_PACKET_SIZE];
    loop {
        let read = io.read_timeout(&mut buf, timeout)?;
        if read == 0 {
            if wait_for_user {
                debug!("等待设备确认...");
                continue;
            }
            warn!("⚠️ 设备响应超时 ({:?})", timeout);
            return Err(HardwareError::DeviceCommunication("接收超时".to_string()));
        }

        if let Some(reply) = assembler.push(&buf[..read])? {
            return Ok(reply);
        }
    }
}
