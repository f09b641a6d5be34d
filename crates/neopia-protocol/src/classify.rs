//! 有状态派生分类器
//!
//! - [`Tilt`]: 根据三轴加速度判定倾斜方向
//! - [`BatteryLevel`]: 根据状态位或电压原始值判定电池等级
//! - [`LineTracerDebouncer`]: 巡线状态去抖状态机
//! - [`ChangeFilter`]: 仅在值变化时上报，首个样本不触发事件
//!
//! 所有状态都属于绑定到单个实体的解码器实例，只在实体复位时清除。

use num_enum::{IntoPrimitive, TryFromPrimitive};

// ============================================================================
// 倾斜
// ============================================================================

/// 倾斜方向
///
/// 按固定优先级比较三轴加速度（16 位有符号刻度）：
/// 水平阈值 ±8192，竖直阈值 ±12288，交叉轴容差 4096 / 8192。
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i8)]
pub enum Tilt {
    /// 无法判定
    Unknown = 0,
    Forward = 1,
    Backward = -1,
    Left = 2,
    Right = -2,
    /// 翻转
    Flip = 3,
    /// 平放未倾斜
    NotTilted = -3,
}

impl Default for Tilt {
    fn default() -> Self {
        Self::Unknown
    }
}

const TILT_THRESHOLD: i32 = 8192;
const TILT_VERTICAL_THRESHOLD: i32 = 12288;
const TILT_CROSS_AXIS: i32 = 4096;

impl Tilt {
    /// 根据加速度分类
    pub fn classify(acceleration: [i16; 3]) -> Self {
        let [x, y, z] = acceleration.map(i32::from);
        let narrow = |v: i32| v > -TILT_CROSS_AXIS && v < TILT_CROSS_AXIS;
        let wide = |v: i32| v > -TILT_THRESHOLD && v < TILT_THRESHOLD;

        if z < TILT_THRESHOLD && x > TILT_THRESHOLD && narrow(y) {
            Self::Forward
        } else if z < TILT_THRESHOLD && x < -TILT_THRESHOLD && narrow(y) {
            Self::Backward
        } else if z < TILT_THRESHOLD && y > TILT_THRESHOLD && narrow(x) {
            Self::Left
        } else if z < TILT_THRESHOLD && y < -TILT_THRESHOLD && narrow(x) {
            Self::Right
        } else if z > TILT_VERTICAL_THRESHOLD && wide(x) && wide(y) {
            Self::Flip
        } else if z < -TILT_VERTICAL_THRESHOLD && narrow(x) && narrow(y) {
            Self::NotTilted
        } else {
            Self::Unknown
        }
    }

    pub fn as_i8(self) -> i8 {
        self.into()
    }
}

// ============================================================================
// 电池
// ============================================================================

/// 电池等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BatteryLevel {
    Empty = 0,
    Low = 1,
    Normal = 2,
}

impl Default for BatteryLevel {
    fn default() -> Self {
        Self::Normal
    }
}

impl BatteryLevel {
    /// 新布局（Gen0E）：2 位状态（0 正常，1 低电量，≥2 耗尽）
    pub fn from_status_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Normal,
            1 => Self::Low,
            _ => Self::Empty,
        }
    }

    /// 旧布局（Gen04）：电压 = (raw + 200) / 100 V
    ///
    /// < 3.6 V 耗尽，≤ 3.7 V 低电量，其余正常。
    pub fn from_voltage_raw(raw: u8) -> Self {
        let centivolts = u16::from(raw) + 200;
        if centivolts < 360 {
            Self::Empty
        } else if centivolts <= 370 {
            Self::Low
        } else {
            Self::Normal
        }
    }

    pub fn as_u8(self) -> u8 {
        self.into()
    }
}

/// 电压原始值换算为伏特
pub fn battery_voltage(raw: u8) -> f64 {
    (f64::from(raw) + 200.0) / 100.0
}

// ============================================================================
// 变化过滤
// ============================================================================

/// 变化过滤器
///
/// 仅在分类值变化时返回 `Some(fired)`；复位后的首个样本返回
/// `Some(false)`（更新值但不作为事件上报）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFilter<T> {
    last: Option<T>,
}

impl<T> Default for ChangeFilter<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: Copy + PartialEq> ChangeFilter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入新样本
    ///
    /// 返回 `None` 表示值未变化；`Some(fired)` 表示需要写入通道，
    /// `fired` 为 false 时表示首个样本。
    pub fn update(&mut self, value: T) -> Option<bool> {
        match self.last {
            Some(last) if last == value => None,
            Some(_) => {
                self.last = Some(value);
                Some(true)
            },
            None => {
                self.last = Some(value);
                Some(false)
            },
        }
    }

    pub fn has_sampled(&self) -> bool {
        self.last.is_some()
    }

    pub fn last(&self) -> Option<T> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ============================================================================
// 巡线去抖
// ============================================================================

/// 巡线去抖阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineTracerPhase {
    /// 空闲，忽略所有样本
    #[default]
    Idle,
    /// 已写入巡线模式，等待确认
    Arming,
    /// 已确认，变化的值会被上报
    Confirmed,
}

/// Gen0E 终止值（2 位样本）
const GEN0E_TERMINAL: u8 = 0x02;
/// Gen0E 终止值需要连续出现的次数（严格大于）
const GEN0E_REPEAT_THRESHOLD: u32 = 5;
/// Gen04 活动位与终止值
const GEN04_ACTIVE: u8 = 0x40;

/// 巡线状态去抖状态机
///
/// `Idle → Arming → Confirmed → Idle`。写入巡线模式时进入 `Arming`，
/// 到达终止模式后回到 `Idle`。
#[derive(Debug, Clone, Copy, Default)]
pub struct LineTracerDebouncer {
    phase: LineTracerPhase,
    state: u8,
    count: u32,
}

impl LineTracerDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> LineTracerPhase {
        self.phase
    }

    /// 进入 `Arming`（巡线模式被写入时调用）
    pub fn arm(&mut self) {
        self.phase = LineTracerPhase::Arming;
        self.count = 0;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Gen0E 样本（2 位值）
    ///
    /// 返回需要写入巡线状态通道的值（已左移 5 位）。
    pub fn step_gen0e(&mut self, value: u8) -> Option<u8> {
        if value & 0x02 == 0 {
            return None;
        }
        if self.phase == LineTracerPhase::Arming {
            if value == GEN0E_TERMINAL {
                self.count += 1;
                if self.count > GEN0E_REPEAT_THRESHOLD {
                    self.phase = LineTracerPhase::Confirmed;
                }
            } else {
                self.phase = LineTracerPhase::Confirmed;
            }
        }
        if self.phase == LineTracerPhase::Confirmed
            && (value != self.state || self.count > GEN0E_REPEAT_THRESHOLD)
        {
            self.state = value;
            if value == GEN0E_TERMINAL {
                self.phase = LineTracerPhase::Idle;
                self.count = 0;
            }
            return Some(value << 5);
        }
        None
    }

    /// Gen04 样本（原始字节）
    pub fn step_gen04(&mut self, raw: u8) -> Option<u8> {
        if raw & GEN04_ACTIVE == 0 {
            return None;
        }
        if self.phase == LineTracerPhase::Arming && raw != GEN04_ACTIVE {
            self.phase = LineTracerPhase::Confirmed;
        }
        if self.phase == LineTracerPhase::Confirmed && raw != self.state {
            self.state = raw;
            if raw == GEN04_ACTIVE {
                self.phase = LineTracerPhase::Idle;
            }
            return Some(raw);
        }
        None
    }
}
