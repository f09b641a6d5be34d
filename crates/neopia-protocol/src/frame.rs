//! 帧常量、校验和与帧同步
//!
//! 传感帧（设备 → 主机）以二进制 `AB CD` 开头，长度固定；
//! 输出帧（主机 → 设备）以 `CD AB` 开头，末尾附带 1 字节校验和。

use crate::ProtocolError;

/// 传感帧起始标记
pub const SENSORY_MARKER: [u8; 2] = [0xAB, 0xCD];

/// 输出帧起始标记
pub const MOTORING_MARKER: [u8; 2] = [0xCD, 0xAB];

/// 输出帧起始标记（十六进制文本形式）
pub const MOTORING_MARKER_HEX: &str = "CDAB";

/// 计算校验和：所有载荷字节之和的低 8 位（不含起始标记）
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// 校验载荷与校验和字节是否匹配
pub fn verify_checksum(payload: &[u8], expected: u8) -> Result<(), ProtocolError> {
    let actual = checksum(payload);
    if actual == expected {
        Ok(())
    } else {
        Err(ProtocolError::ChecksumMismatch { expected, actual })
    }
}

/// 帧同步扫描器
///
/// 在字节流中搜索起始标记，丢弃标记之前的任何残缺数据，
/// 累积到固定帧长度后输出一帧。同步只依赖标记搜索，不依赖长度记账。
///
/// # Example
///
/// ```
/// use neopia_protocol::FrameScanner;
///
/// let mut scanner = FrameScanner::new(4);
/// scanner.push(&[0x01, 0x02, 0xAB, 0xCD, 0x10]);
/// assert!(scanner.next_frame().is_none());
/// scanner.push(&[0x20]);
/// assert_eq!(scanner.next_frame().unwrap(), vec![0xAB, 0xCD, 0x10, 0x20]);
/// ```
#[derive(Debug, Clone)]
pub struct FrameScanner {
    buf: Vec<u8>,
    frame_len: usize,
}

impl FrameScanner {
    /// 创建扫描器
    ///
    /// `frame_len` 包含 2 字节起始标记。
    pub fn new(frame_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(frame_len * 4),
            frame_len: frame_len.max(SENSORY_MARKER.len()),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// 切换帧长度（握手后学到型号时使用），同时清空缓冲
    pub fn set_frame_len(&mut self, frame_len: usize) {
        self.frame_len = frame_len.max(SENSORY_MARKER.len());
        self.buf.clear();
    }

    /// 追加接收到的字节
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 当前缓冲的字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// 提取下一帧（如果缓冲中已有完整帧）
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        match find_marker(&self.buf) {
            Some(start) => {
                if start > 0 {
                    self.buf.drain(..start);
                }
            },
            None => {
                // 保留可能是半个标记的最后一个字节
                let keep = matches!(self.buf.last(), Some(&b) if b == SENSORY_MARKER[0]);
                let drop_to = if keep { self.buf.len() - 1 } else { self.buf.len() };
                self.buf.drain(..drop_to);
                return None;
            },
        }

        if self.buf.len() < self.frame_len {
            return None;
        }
        Some(self.buf.drain(..self.frame_len).collect())
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(SENSORY_MARKER.len()).position(|w| w == SENSORY_MARKER)
}
