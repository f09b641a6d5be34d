//! # Neopia Protocol
//!
//! Neosoco 串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 通道 ID 常量定义
//! - `frame`: 帧常量、校验和、帧同步扫描器
//! - `motoring`: 输出帧构建
//! - `sensory`: 传感帧解析（Basic / Gen04 / Gen0E 三种布局）
//! - `classify`: 有状态派生分类器（倾斜、电池、巡线）
//! - `handshake`: 握手请求与应答解析
//!
//! ## 字节序
//!
//! 多字节字段（加速度、光照）使用大端字节序（高位在前）。

pub mod classify;
pub mod frame;
pub mod handshake;
pub mod ids;
pub mod motoring;
pub mod sensory;

// 重新导出常用类型
pub use classify::*;
pub use frame::*;
pub use handshake::*;
pub use ids::*;
pub use motoring::*;
pub use sensory::*;

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid start marker: {found:02X?}")]
    InvalidMarker { found: [u8; 2] },

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid validity nibble: 0x{nibble:X}")]
    InvalidNibble { nibble: u8 },

    #[error("Invalid handshake response: {0}")]
    InvalidHandshake(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// 字节序转换工具函数
///
/// 大端字节序转 i16
pub fn bytes_to_i16_be(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

/// 大端字节序转 u16
pub fn bytes_to_u16_be(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// 有符号整数转单字节（补码，负数加 0x100）
pub fn to_wire_byte(value: i64) -> u8 {
    (value & 0xFF) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_i16_be() {
        assert_eq!(bytes_to_i16_be([0x12, 0x34]), 0x1234);
        assert_eq!(bytes_to_i16_be([0xFF, 0xFF]), -1);
        assert_eq!(bytes_to_i16_be([0x80, 0x00]), i16::MIN);
    }

    #[test]
    fn test_bytes_to_u16_be() {
        assert_eq!(bytes_to_u16_be([0xFF, 0xFE]), 0xFFFE);
    }

    #[test]
    fn test_to_wire_byte() {
        assert_eq!(to_wire_byte(0), 0x00);
        assert_eq!(to_wire_byte(255), 0xFF);
        // 负数按补码编码
        assert_eq!(to_wire_byte(-1), 0xFF);
        assert_eq!(to_wire_byte(-128), 0x80);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidLength {
            expected: 8,
            actual: 3,
        };
        assert_eq!(format!("{}", err), "Invalid frame length: expected 8, got 3");

        let err = ProtocolError::ChecksumMismatch {
            expected: 0x10,
            actual: 0x11,
        };
        assert!(format!("{}", err).contains("0x10"));
    }
}
