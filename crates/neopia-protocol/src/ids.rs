//! 通道 ID 常量定义
//!
//! 通道 ID 由所有者掩码（高 20 位）和本地索引（低 12 位）组成。
//! 同一机器人类型的所有通道共享同一个所有者掩码。

/// 所有者掩码位
pub const OWNER_MASK: u32 = 0xFFFF_F000;

/// 本地索引位
pub const LOCAL_INDEX_MASK: u32 = 0x0000_0FFF;

/// 原始 ID 规范化掩码（丢弃保留位 12-19）
pub const NORMALIZE_MASK: u32 = 0xFFF0_0FFF;

/// Neosoco 机器人类型标识
pub const NEOSOCO_TYPE_ID: &str = "kr.neobot.physical.neosoco";

/// Neosoco 所有者 ID
pub const NEOSOCO_UID: u32 = 0x0040_0000;

// ============================================================================
// Basic 布局通道（输出 / 输入 / 电机 / 蜂鸣器）
// ============================================================================

pub const ID_OUTPUT_1: u32 = 0x0040_0000;
pub const ID_OUTPUT_2: u32 = 0x0040_0001;
pub const ID_OUTPUT_3: u32 = 0x0040_0002;
pub const ID_INPUT_1: u32 = 0x0040_0003;
pub const ID_INPUT_2: u32 = 0x0040_0004;
pub const ID_INPUT_3: u32 = 0x0040_0005;
/// 遥控器按键
pub const ID_REMOTE_CTL: u32 = 0x0040_0006;
/// 电池原始值
pub const ID_BATTERY: u32 = 0x0040_0007;
pub const ID_LEFT_MOTOR: u32 = 0x0040_0008;
pub const ID_RIGHT_MOTOR: u32 = 0x0040_0009;
/// 音符（Command）
pub const ID_NOTE: u32 = 0x0040_000A;

// ============================================================================
// 扩展布局通道（Gen04 / Gen0E）
// ============================================================================

pub const ID_SIGNAL_STRENGTH: u32 = 0x0040_000B;
pub const ID_LEFT_PROXIMITY: u32 = 0x0040_000C;
pub const ID_RIGHT_PROXIMITY: u32 = 0x0040_000D;
pub const ID_LEFT_FLOOR: u32 = 0x0040_000E;
pub const ID_RIGHT_FLOOR: u32 = 0x0040_000F;
/// 三轴加速度（元数 3）
pub const ID_ACCELERATION: u32 = 0x0040_0010;
pub const ID_LIGHT: u32 = 0x0040_0011;
pub const ID_TEMPERATURE: u32 = 0x0040_0012;
pub const ID_INPUT_A: u32 = 0x0040_0013;
pub const ID_INPUT_B: u32 = 0x0040_0014;
/// 巡线状态（Event）
pub const ID_LINE_TRACER_STATE: u32 = 0x0040_0015;
/// 倾斜方向（Event）
pub const ID_TILT: u32 = 0x0040_0016;
/// 电池等级（Event）
pub const ID_BATTERY_STATE: u32 = 0x0040_0017;
/// 巡线模式（Command）
pub const ID_LINE_TRACER_MODE: u32 = 0x0040_0018;

/// 从原始 ID 提取所有者部分
pub const fn owner_of(id: u32) -> u32 {
    id & OWNER_MASK
}

/// 从原始 ID 提取本地索引
pub const fn local_index_of(id: u32) -> u32 {
    id & LOCAL_INDEX_MASK
}
