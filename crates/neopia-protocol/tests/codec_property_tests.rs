//! 编解码属性测试
//!
//! 使用 proptest 验证校验和与帧同步的性质。

use neopia_protocol::{FrameScanner, MotoringPacket, ProtocolError, Tilt, checksum};
use proptest::prelude::*;

proptest! {
    /// 校验和字节等于载荷字节之和 mod 256
    #[test]
    fn motoring_checksum_is_payload_sum(
        outputs in any::<[u8; 3]>(),
        left in any::<u8>(),
        right in any::<u8>(),
        note in 0u8..=72,
    ) {
        let packet = MotoringPacket { outputs, left_motor: left, right_motor: right, note, fnd: 0 };
        let frame = packet.encode();
        let sum: u32 = packet.payload().iter().map(|b| u32::from(*b)).sum();
        prop_assert_eq!(u32::from(frame[frame.len() - 1]), sum % 256);
        prop_assert_eq!(MotoringPacket::decode(&frame).unwrap(), packet);
    }

    /// 篡改任意一个载荷字节都会导致校验失败
    #[test]
    fn single_byte_corruption_detected(
        outputs in any::<[u8; 3]>(),
        note in any::<u8>(),
        index in 2usize..10,
        flip in 1u8..=255,
    ) {
        let packet = MotoringPacket { outputs, note, ..Default::default() };
        let mut frame = packet.encode();
        frame[index] = frame[index].wrapping_add(flip);
        let result = MotoringPacket::decode(&frame);
        prop_assert!(
            matches!(result, Err(ProtocolError::ChecksumMismatch { .. })),
            "corrupted frame accepted"
        );
    }

    /// 帧前插入任意不含标记的垃圾后仍能同步到完整帧
    #[test]
    fn scanner_resyncs_after_garbage(
        garbage in proptest::collection::vec(0u8..0xAB, 0..32),
        payload in any::<[u8; 6]>(),
    ) {
        let mut frame = vec![0xAB, 0xCD];
        frame.extend_from_slice(&payload);
        let mut scanner = FrameScanner::new(8);
        scanner.push(&garbage);
        scanner.push(&frame);
        prop_assert_eq!(scanner.next_frame(), Some(frame));
    }

    /// 倾斜分类总能映射回合法的原始值
    #[test]
    fn tilt_classification_is_total(x in any::<i16>(), y in any::<i16>(), z in any::<i16>()) {
        let tilt = Tilt::classify([x, y, z]);
        prop_assert_eq!(Tilt::try_from(tilt.as_i8()).unwrap(), tilt);
    }
}

#[test]
fn checksum_of_empty_payload_is_zero() {
    assert_eq!(checksum(&[]), 0);
}
