//! 输出帧（Motoring）构建
//!
//! 帧格式（11 字节）：
//!
//! ```text
//! CD AB | OUT1 OUT2 OUT3 MLA MRA BUZZER FND RSV | CHECKSUM
//! ```
//!
//! 校验和为 8 字节载荷之和的低 8 位。线上以二进制发送，
//! 日志与调试使用大写十六进制文本形式。

use crate::{MOTORING_MARKER, ProtocolError, checksum, to_wire_byte, verify_checksum};

/// 载荷长度
pub const MOTORING_PAYLOAD_LEN: usize = 8;

/// 整帧长度（标记 + 载荷 + 校验和）
pub const MOTORING_FRAME_LEN: usize = MOTORING_MARKER.len() + MOTORING_PAYLOAD_LEN + 1;

/// Neosoco 输出帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotoringPacket {
    /// OUT1 ~ OUT3
    pub outputs: [u8; 3],
    /// 左电机（MLA）
    pub left_motor: u8,
    /// 右电机（MRA）
    pub right_motor: u8,
    /// 蜂鸣器音符
    pub note: u8,
    /// 数码管（当前固件未使用，恒为 0）
    pub fnd: u8,
}

impl MotoringPacket {
    /// 从通道读取的整数值构建（超出 0..=255 的值按补码截断）
    pub fn from_values(outputs: [i64; 3], left_motor: i64, right_motor: i64, note: i64) -> Self {
        Self {
            outputs: outputs.map(to_wire_byte),
            left_motor: to_wire_byte(left_motor),
            right_motor: to_wire_byte(right_motor),
            note: to_wire_byte(note),
            fnd: 0,
        }
    }

    /// 载荷（不含标记与校验和）
    pub fn payload(&self) -> [u8; MOTORING_PAYLOAD_LEN] {
        [
            self.outputs[0],
            self.outputs[1],
            self.outputs[2],
            self.left_motor,
            self.right_motor,
            self.note,
            self.fnd,
            0x00, // 保留
        ]
    }

    /// 编码为二进制帧
    pub fn encode(&self) -> [u8; MOTORING_FRAME_LEN] {
        let payload = self.payload();
        let mut frame = [0u8; MOTORING_FRAME_LEN];
        frame[..2].copy_from_slice(&MOTORING_MARKER);
        frame[2..2 + MOTORING_PAYLOAD_LEN].copy_from_slice(&payload);
        frame[MOTORING_FRAME_LEN - 1] = checksum(&payload);
        frame
    }

    /// 编码为大写十六进制文本（`"CDAB..."`）
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.encode())
    }

    /// 解析二进制帧（校验标记、长度与校验和）
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() != MOTORING_FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: MOTORING_FRAME_LEN,
                actual: frame.len(),
            });
        }
        if frame[..2] != MOTORING_MARKER {
            return Err(ProtocolError::InvalidMarker {
                found: [frame[0], frame[1]],
            });
        }
        let payload = &frame[2..2 + MOTORING_PAYLOAD_LEN];
        verify_checksum(payload, frame[MOTORING_FRAME_LEN - 1])?;
        Ok(Self {
            outputs: [payload[0], payload[1], payload[2]],
            left_motor: payload[3],
            right_motor: payload[4],
            note: payload[5],
            fnd: payload[6],
        })
    }

    /// 解析十六进制文本帧
    pub fn from_hex(text: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(text).map_err(|e| ProtocolError::ParseError(e.to_string()))?;
        Self::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let packet = MotoringPacket::from_values([1, 2, 3], 10, 20, 30);
        let frame = packet.encode();
        assert_eq!(frame[..2], [0xCD, 0xAB]);
        assert_eq!(frame[2..10], [1, 2, 3, 10, 20, 30, 0, 0]);
        assert_eq!(frame[10], 66);
    }

    #[test]
    fn test_to_hex_is_uppercase() {
        let packet = MotoringPacket {
            outputs: [0xAB, 0, 0],
            ..Default::default()
        };
        assert_eq!(packet.to_hex(), "CDABAB00000000000000AB");
    }

    #[test]
    fn test_negative_values_wrap() {
        let packet = MotoringPacket::from_values([-1, 0, 0], -2, 0, 0);
        assert_eq!(packet.outputs[0], 0xFF);
        assert_eq!(packet.left_motor, 0xFE);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let packet = MotoringPacket::from_values([5, 6, 7], 8, 9, 10);
        let mut frame = packet.encode();
        assert_eq!(MotoringPacket::decode(&frame).unwrap(), packet);

        frame[4] ^= 0x01;
        assert!(matches!(
            MotoringPacket::decode(&frame),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_marker_and_length() {
        let mut frame = MotoringPacket::default().encode();
        frame[0] = 0xAB;
        assert!(matches!(
            MotoringPacket::decode(&frame),
            Err(ProtocolError::InvalidMarker { .. })
        ));
        assert!(matches!(
            MotoringPacket::decode(&frame[..5]),
            Err(ProtocolError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_from_hex() {
        let packet = MotoringPacket::from_values([1, 0, 0], 0, 0, 60);
        assert_eq!(MotoringPacket::from_hex(&packet.to_hex()).unwrap(), packet);
        assert!(MotoringPacket::from_hex("zz").is_err());
    }
}
