//! 驱动层错误类型定义

use crate::model::{ChannelId, ValueKind};
use neopia_protocol::ProtocolError;
use neopia_serial::SerialError;
use thiserror::Error;

/// 通道写入错误
///
/// 写入失败时通道值保持不变。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Sensor / Event 通道不接受外部写入
    #[error("Channel {0} is read-only")]
    ReadOnly(ChannelId),

    /// 值类型与通道类型不符（文本写入数值通道或反之）
    #[error("Channel {id} expects {expected:?} values")]
    KindMismatch { id: ChannelId, expected: ValueKind },

    /// 固定长度通道的下标越界
    #[error("Index {index} out of range for channel {id} (len {len})")]
    IndexOutOfRange {
        id: ChannelId,
        index: usize,
        len: usize,
    },

    /// 未找到通道
    #[error("Unknown channel {0}")]
    UnknownChannel(ChannelId),
}

/// 远程链路错误
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 读超时（正常情况，调用方应继续循环）
    #[error("Read timeout")]
    Timeout,

    #[error("Connection closed")]
    Closed,
}

impl From<tungstenite::Error> for LinkError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                LinkError::Closed
            },
            tungstenite::Error::Io(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                LinkError::Timeout
            },
            other => LinkError::WebSocket(other.to_string()),
        }
    }
}

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口错误
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 通道写入错误
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// 远程链路错误
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// 同一实体内重复的通道 ID
    #[error("Duplicate channel {0}")]
    DuplicateChannel(ChannelId),

    /// 实体下标无效
    #[error("Unknown entity index {0}")]
    UnknownEntity(usize),

    /// 已释放
    #[error("Robot already disposed")]
    Disposed,
}
