//! # Neopia Serial Adapter Layer
//!
//! 串口硬件抽象层，提供统一的字节流接口抽象。
//!
//! - [`SerialAdapter`]: 已打开的端口（带超时读取、写入、清空缓冲）
//! - [`SerialBackend`]: 端口枚举与打开
//! - [`SystemSerial`]: 基于 `serialport` 的系统后端（feature `system`）
//! - [`mock`]: 无硬件的模拟后端（feature `mock`）

use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "system")]
mod system;

#[cfg(feature = "system")]
pub use system::{SerialPortAdapter, SystemSerial};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// 默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// 默认读超时
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// 串口适配层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Port not found: {0}")]
    NotFound(String),
    #[error("Device Error: {0}")]
    Device(String),
    #[error("Port closed")]
    Closed,
}

impl SerialError {
    /// 是否为读超时（正常情况，调用方应继续循环）
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// 端口参数（固定 8N1）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// 端口类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    Usb {
        vid: u16,
        pid: u16,
        product: Option<String>,
    },
    Other,
}

/// 枚举到的端口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub kind: PortKind,
}

impl PortInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Other,
        }
    }
}

/// 已打开的串口
pub trait SerialAdapter: Send {
    /// 读取当前可用的字节
    ///
    /// 读超时内没有数据时返回 [`SerialError::Timeout`]。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError>;

    /// 写入全部字节
    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError>;

    /// 清空输入 / 输出缓冲
    fn clear(&mut self) -> Result<(), SerialError>;

    fn set_read_timeout(&mut self, _timeout: Duration) -> Result<(), SerialError> {
        Ok(())
    }

    /// 端口名
    fn name(&self) -> &str;

    /// 读取，超时视为 0 字节
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        match self.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.is_timeout() => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// 串口后端（端口枚举 + 打开）
pub trait SerialBackend: Send + Sync {
    fn available_ports(&self) -> Result<Vec<PortInfo>, SerialError>;

    fn open(&self, port: &str, settings: &PortSettings)
    -> Result<Box<dyn SerialAdapter>, SerialError>;
}
