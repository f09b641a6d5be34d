//! 传感帧解析
//!
//! 三种布局由握手时学到的型号码选择：
//!
//! | 布局 | 帧长 | 内容 |
//! |------|------|------|
//! | `Basic` | 8 | `AB CD IN1 IN2 IN3 REMOTE BATTERY CHECKSUM` |
//! | `Gen04` | 22 | `AB CD` + 20 字节记录（旧控制器） |
//! | `Gen0E` | 22 | `AB CD` + 20 字节记录（新控制器） |
//!
//! 扩展记录的第一个（Gen0E）或第三个（Gen04）字节高 4 位必须为 1。

use crate::{
    BatteryLevel, ChangeFilter, LineTracerDebouncer, ProtocolError, SENSORY_MARKER, Tilt,
    bytes_to_i16_be, bytes_to_u16_be, verify_checksum,
};
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Basic 帧长度
pub const BASIC_FRAME_LEN: usize = 8;

/// 扩展记录长度（不含起始标记）
pub const EXTENDED_RECORD_LEN: usize = 20;

/// 扩展帧长度
pub const EXTENDED_FRAME_LEN: usize = SENSORY_MARKER.len() + EXTENDED_RECORD_LEN;

/// 控制器型号码（握手应答 field[2]）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ModelCode {
    /// 旧控制器
    Gen04 = 0x04,
    /// 新控制器
    Gen0E = 0x0E,
}

/// 传感帧布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensoryLayout {
    #[default]
    Basic,
    Extended(ModelCode),
}

impl SensoryLayout {
    /// 帧长度（含起始标记）
    pub fn frame_len(&self) -> usize {
        match self {
            Self::Basic => BASIC_FRAME_LEN,
            Self::Extended(_) => EXTENDED_FRAME_LEN,
        }
    }
}

fn check_frame(frame: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if frame.len() != expected {
        return Err(ProtocolError::InvalidLength {
            expected,
            actual: frame.len(),
        });
    }
    if frame[..2] != SENSORY_MARKER {
        return Err(ProtocolError::InvalidMarker {
            found: [frame[0], frame[1]],
        });
    }
    Ok(())
}

// ============================================================================
// Basic 布局
// ============================================================================

/// Basic 传感帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicSensory {
    pub inputs: [u8; 3],
    /// 遥控器按键
    pub remote: u8,
    /// 电池原始值
    pub battery: u8,
}

impl TryFrom<&[u8]> for BasicSensory {
    type Error = ProtocolError;

    fn try_from(frame: &[u8]) -> Result<Self, Self::Error> {
        check_frame(frame, BASIC_FRAME_LEN)?;
        verify_checksum(&frame[2..7], frame[7])?;
        Ok(Self {
            inputs: [frame[2], frame[3], frame[4]],
            remote: frame[5],
            battery: frame[6],
        })
    }
}

impl BasicSensory {
    /// 构建帧（用于测试与模拟设备）
    pub fn encode(&self) -> [u8; BASIC_FRAME_LEN] {
        let mut frame = [0u8; BASIC_FRAME_LEN];
        frame[..2].copy_from_slice(&SENSORY_MARKER);
        frame[2..5].copy_from_slice(&self.inputs);
        frame[5] = self.remote;
        frame[6] = self.battery;
        frame[7] = crate::checksum(&frame[2..7]);
        frame
    }
}

// ============================================================================
// 扩展布局
// ============================================================================

/// Gen0E 状态字节（记录第 19 字节）
///
/// - Bit 0: 温度标志（0：光照有效 1：温度有效）
/// - Bit 1-2: 电池状态
/// - Bit 3-5: 保留
/// - Bit 6-7: 巡线状态
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct Gen0eStatus {
    pub temperature_flag: bool, // Bit 0
    pub battery: u2,            // Bit 1-2
    pub reserved: u3,           // Bit 3-5: 保留
    pub line_tracer: u2,        // Bit 6-7
}

/// 光照 / 温度复用字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ambient {
    Light(u16),
    Temperature(i16),
}

/// 扩展传感记录（无状态解析结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedSensory {
    pub model: ModelCode,
    /// 信号强度（dBm，负值）
    pub signal_strength: i16,
    /// 左 / 右接近传感器
    pub proximity: [u8; 2],
    /// 左 / 右地面传感器
    pub floor: [u8; 2],
    /// X / Y / Z
    pub acceleration: [i16; 3],
    pub ambient: Ambient,
    /// 数字输入 A / B
    pub inputs: [u8; 2],
    /// 巡线原始值（Gen0E: 2 位；Gen04: 整字节）
    pub line_tracer: u8,
    /// 电池等级（Gen04 仅在温度帧中携带）
    pub battery: Option<BatteryLevel>,
}

fn temperature(raw: u8, base: f64) -> i16 {
    ((raw as i8) as f64 / 2.0 + base).round() as i16
}

impl ExtendedSensory {
    /// 解析 20 字节记录
    pub fn decode(model: ModelCode, r: &[u8]) -> Result<Self, ProtocolError> {
        if r.len() != EXTENDED_RECORD_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: EXTENDED_RECORD_LEN,
                actual: r.len(),
            });
        }
        match model {
            ModelCode::Gen0E => Self::decode_gen0e(r),
            ModelCode::Gen04 => Self::decode_gen04(r),
        }
    }

    /// 解析完整帧（含起始标记）
    pub fn from_frame(model: ModelCode, frame: &[u8]) -> Result<Self, ProtocolError> {
        check_frame(frame, EXTENDED_FRAME_LEN)?;
        Self::decode(model, &frame[SENSORY_MARKER.len()..])
    }

    fn decode_gen0e(r: &[u8]) -> Result<Self, ProtocolError> {
        let nibble = r[0] >> 4;
        if nibble != 1 {
            return Err(ProtocolError::InvalidNibble { nibble });
        }
        let status = Gen0eStatus::from(u8::new(r[19]));
        let ambient = if status.temperature_flag() {
            Ambient::Temperature(temperature(r[5], 23.0))
        } else {
            Ambient::Light(bytes_to_u16_be([r[5], r[6]]))
        };
        Ok(Self {
            model: ModelCode::Gen0E,
            signal_strength: i16::from(r[18]) - 256,
            proximity: [r[3], r[4]],
            floor: [r[7], r[8]],
            acceleration: [
                bytes_to_i16_be([r[9], r[10]]),
                bytes_to_i16_be([r[11], r[12]]),
                bytes_to_i16_be([r[13], r[14]]),
            ],
            ambient,
            inputs: [r[15], r[16]],
            line_tracer: status.line_tracer().value(),
            battery: Some(BatteryLevel::from_status_bits(status.battery().value())),
        })
    }

    fn decode_gen04(r: &[u8]) -> Result<Self, ProtocolError> {
        let nibble = r[2] >> 4;
        if nibble != 1 {
            return Err(ProtocolError::InvalidNibble { nibble });
        }
        let (ambient, battery) = if r[14] == 0 {
            (Ambient::Light(bytes_to_u16_be([r[15], r[16]])), None)
        } else {
            (
                Ambient::Temperature(temperature(r[15], 24.0)),
                Some(BatteryLevel::from_voltage_raw(r[16])),
            )
        };
        Ok(Self {
            model: ModelCode::Gen04,
            signal_strength: i16::from(r[3]) - 256,
            proximity: [r[4], r[5]],
            floor: [r[6], r[7]],
            acceleration: [
                bytes_to_i16_be([r[8], r[9]]),
                bytes_to_i16_be([r[10], r[11]]),
                bytes_to_i16_be([r[12], r[13]]),
            ],
            ambient,
            inputs: [r[17], r[18]],
            line_tracer: r[19],
            battery,
        })
    }
}

// ============================================================================
// 有状态解码器
// ============================================================================

/// 一帧扩展数据解码后需要写入通道的值
///
/// 分类器字段为 `Some((value, fired))` 时表示需要写入，`fired` 为 false
/// 表示复位后的首个样本。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedUpdate {
    pub reading: ExtendedSensory,
    /// 最近一次有效的光照（跨帧保持）
    pub light: u16,
    /// 最近一次有效的温度（跨帧保持）
    pub temperature: i16,
    pub tilt: Option<(Tilt, bool)>,
    pub battery: Option<(BatteryLevel, bool)>,
    pub line_tracer: Option<u8>,
}

/// 扩展布局的有状态解码器
///
/// 持有倾斜、电池、巡线三个分类器以及跨帧保持的光照 / 温度。
/// 无效帧在任何状态修改之前被拒绝。
#[derive(Debug, Clone, Default)]
pub struct ExtendedDecoder {
    light: u16,
    temperature: i16,
    tilt: ChangeFilter<Tilt>,
    battery: ChangeFilter<BatteryLevel>,
    line_tracer: LineTracerDebouncer,
}

impl ExtendedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 巡线模式被写入时进入 Arming
    pub fn arm_line_tracer(&mut self) {
        self.line_tracer.arm();
    }

    pub fn line_tracer(&self) -> &LineTracerDebouncer {
        &self.line_tracer
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 解码一条 20 字节记录
    pub fn decode(&mut self, model: ModelCode, record: &[u8]) -> Result<ExtendedUpdate, ProtocolError> {
        let reading = ExtendedSensory::decode(model, record)?;

        match reading.ambient {
            Ambient::Light(light) => self.light = light,
            Ambient::Temperature(t) => self.temperature = t,
        }
        let tilt_value = Tilt::classify(reading.acceleration);
        let tilt = self.tilt.update(tilt_value).map(|fired| (tilt_value, fired));
        let battery = reading
            .battery
            .and_then(|level| self.battery.update(level).map(|fired| (level, fired)));
        let line_tracer = match model {
            ModelCode::Gen0E => self.line_tracer.step_gen0e(reading.line_tracer),
            ModelCode::Gen04 => self.line_tracer.step_gen04(reading.line_tracer),
        };

        Ok(ExtendedUpdate {
            reading,
            light: self.light,
            temperature: self.temperature,
            tilt,
            battery,
            line_tracer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen0e_record() -> [u8; EXTENDED_RECORD_LEN] {
        let mut r = [0u8; EXTENDED_RECORD_LEN];
        r[0] = 0x10;
        r[3] = 11; // 左接近
        r[4] = 12; // 右接近
        r[5] = 0x01;
        r[6] = 0x02; // 光照 0x0102
        r[7] = 21;
        r[8] = 22;
        r[13] = 0xC0; // acc_z = -16384
        r[15] = 1;
        r[16] = 2;
        r[18] = 0xC4; // -60 dBm
        r
    }

    #[test]
    fn test_basic_decode() {
        let frame = [0xAB, 0xCD, 1, 2, 3, 4, 5, 15];
        let s = BasicSensory::try_from(&frame[..]).unwrap();
        assert_eq!(s.inputs, [1, 2, 3]);
        assert_eq!(s.remote, 4);
        assert_eq!(s.battery, 5);
        assert_eq!(s.encode(), frame);
    }

    #[test]
    fn test_basic_decode_rejects_malformed() {
        let bad_sum = [0xAB, 0xCD, 1, 2, 3, 4, 5, 16];
        assert!(matches!(
            BasicSensory::try_from(&bad_sum[..]),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
        let bad_marker = [0xCD, 0xAB, 1, 2, 3, 4, 5, 15];
        assert!(matches!(
            BasicSensory::try_from(&bad_marker[..]),
            Err(ProtocolError::InvalidMarker { .. })
        ));
        assert!(BasicSensory::try_from(&bad_marker[..4]).is_err());
    }

    #[test]
    fn test_gen0e_decode() {
        let r = gen0e_record();
        let s = ExtendedSensory::decode(ModelCode::Gen0E, &r).unwrap();
        assert_eq!(s.proximity, [11, 12]);
        assert_eq!(s.floor, [21, 22]);
        assert_eq!(s.acceleration, [0, 0, -16384]);
        assert_eq!(s.ambient, Ambient::Light(0x0102));
        assert_eq!(s.inputs, [1, 2]);
        assert_eq!(s.signal_strength, -60);
        assert_eq!(s.battery, Some(BatteryLevel::Normal));
        assert_eq!(s.line_tracer, 0);
    }

    #[test]
    fn test_gen0e_status_bits() {
        let mut r = gen0e_record();
        // 温度标志 + 电池 1（低电量）+ 巡线 3
        r[19] = 0b1100_0011;
        r[5] = 0xF6; // -10 → -5 + 23 = 18
        let s = ExtendedSensory::decode(ModelCode::Gen0E, &r).unwrap();
        assert_eq!(s.ambient, Ambient::Temperature(18));
        assert_eq!(s.battery, Some(BatteryLevel::Low));
        assert_eq!(s.line_tracer, 3);
    }

    #[test]
    fn test_gen04_decode() {
        let mut r = [0u8; EXTENDED_RECORD_LEN];
        r[2] = 0x12;
        r[3] = 0xD8; // -40
        r[4] = 1;
        r[5] = 2;
        r[6] = 3;
        r[7] = 4;
        r[8] = 0x20; // acc_x = 8192 + 1
        r[9] = 0x01;
        r[14] = 1;
        r[15] = 3; // 1.5 + 24 = 25.5 → 26
        r[16] = 180; // 3.8V
        r[17] = 7;
        r[18] = 8;
        r[19] = 0x41;
        let s = ExtendedSensory::decode(ModelCode::Gen04, &r).unwrap();
        assert_eq!(s.signal_strength, -40);
        assert_eq!(s.proximity, [1, 2]);
        assert_eq!(s.floor, [3, 4]);
        assert_eq!(s.acceleration[0], 8193);
        assert_eq!(s.ambient, Ambient::Temperature(26));
        assert_eq!(s.battery, Some(BatteryLevel::Normal));
        assert_eq!(s.inputs, [7, 8]);
        assert_eq!(s.line_tracer, 0x41);

        // 光照帧不携带电池
        r[14] = 0;
        let s = ExtendedSensory::decode(ModelCode::Gen04, &r).unwrap();
        assert_eq!(s.ambient, Ambient::Light(u16::from_be_bytes([3, 180])));
        assert_eq!(s.battery, None);
    }

    #[test]
    fn test_invalid_nibble_rejected() {
        let mut r = gen0e_record();
        r[0] = 0x20;
        assert_eq!(
            ExtendedSensory::decode(ModelCode::Gen0E, &r),
            Err(ProtocolError::InvalidNibble { nibble: 2 })
        );
        // Gen04 检查第三个字节
        assert!(ExtendedSensory::decode(ModelCode::Gen04, &r).is_err());
    }

    #[test]
    fn test_from_frame() {
        let mut frame = vec![0xAB, 0xCD];
        frame.extend_from_slice(&gen0e_record());
        assert!(ExtendedSensory::from_frame(ModelCode::Gen0E, &frame).is_ok());
        assert!(ExtendedSensory::from_frame(ModelCode::Gen0E, &frame[..10]).is_err());
    }

    #[test]
    fn test_decoder_tilt_first_sample_suppressed() {
        let mut decoder = ExtendedDecoder::new();
        let r = gen0e_record(); // acc_z = -16384 → NotTilted
        let first = decoder.decode(ModelCode::Gen0E, &r).unwrap();
        assert_eq!(first.tilt, Some((Tilt::NotTilted, false)));
        assert_eq!(first.battery, Some((BatteryLevel::Normal, false)));

        let same = decoder.decode(ModelCode::Gen0E, &r).unwrap();
        assert_eq!(same.tilt, None);
        assert_eq!(same.battery, None);

        let mut flipped = r;
        flipped[13] = 0x40; // acc_z = 16384 → Flip
        let changed = decoder.decode(ModelCode::Gen0E, &flipped).unwrap();
        assert_eq!(changed.tilt, Some((Tilt::Flip, true)));
    }

    #[test]
    fn test_decoder_keeps_light_and_temperature() {
        let mut decoder = ExtendedDecoder::new();
        let mut r = gen0e_record();
        let update = decoder.decode(ModelCode::Gen0E, &r).unwrap();
        assert_eq!(update.light, 0x0102);
        assert_eq!(update.temperature, 0);

        r[19] = 0x01;
        r[5] = 4; // 2 + 23 = 25
        let update = decoder.decode(ModelCode::Gen0E, &r).unwrap();
        assert_eq!(update.light, 0x0102);
        assert_eq!(update.temperature, 25);
    }

    #[test]
    fn test_decoder_invalid_frame_does_not_mutate() {
        let mut decoder = ExtendedDecoder::new();
        let mut r = gen0e_record();
        r[0] = 0x00;
        assert!(decoder.decode(ModelCode::Gen0E, &r).is_err());
        r[0] = 0x10;
        // 首个有效样本仍被视为首个样本
        let update = decoder.decode(ModelCode::Gen0E, &r).unwrap();
        assert_eq!(update.tilt.map(|(_, fired)| fired), Some(false));
    }

    #[test]
    fn test_layout_frame_len() {
        assert_eq!(SensoryLayout::Basic.frame_len(), 8);
        assert_eq!(SensoryLayout::Extended(ModelCode::Gen04).frame_len(), 22);
        assert_eq!(ModelCode::try_from(0x0Eu8).unwrap(), ModelCode::Gen0E);
    }
}
