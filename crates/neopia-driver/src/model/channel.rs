//! 通道（Channel）
//!
//! 通道是实体下的带类型值槽。外部写入经过角色、类型、下标检查并钳位到
//! `[min, max]`；传输层通过 `put*` 直接写入（不做检查）。
//!
//! 每个通道带三个瞬态标志：
//!
//! - `written`: 自上次输出快照以来被写入
//! - `fired`: 自上次锁存以来发生变化
//! - `event`: 上一周期锁存的 `fired`

use crate::error::WriteError;
use crate::model::{Value, ValueKind};
use neopia_protocol::{LOCAL_INDEX_MASK, NORMALIZE_MASK, OWNER_MASK};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::warn;

/// 通道 ID（构造时按 `0xFFF00FFF` 归一化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u32);

impl ChannelId {
    pub const fn new(raw: u32) -> Self {
        Self(raw & NORMALIZE_MASK)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// 所属实体的 uid
    pub const fn owner(self) -> u32 {
        self.0 & OWNER_MASK
    }

    pub const fn local_index(self) -> u32 {
        self.0 & LOCAL_INDEX_MASK
    }
}

impl From<u32> for ChannelId {
    fn from(raw: u32) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// 通道角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// 传感器：传输层写入，外部只读
    Sensor,
    /// 执行器：外部写入，随输出帧发送
    Effector,
    /// 事件：传输层写入，仅在变化时通知
    Event,
    /// 命令：外部写入，写入本身即信号
    Command,
}

impl Role {
    /// 属于传感分区（Sensor + Event）
    pub fn is_sensory(self) -> bool {
        matches!(self, Self::Sensor | Self::Event)
    }

    pub fn is_motoring(self) -> bool {
        !self.is_sensory()
    }

    /// 通知是否需要 `can_notify` 标志
    fn gated(self) -> bool {
        matches!(self, Self::Command | Self::Event)
    }
}

/// 通道长度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// 初始为空，写入时增长
    Growable,
}

/// 通道定义
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub id: ChannelId,
    pub name: String,
    pub role: Role,
    pub kind: ValueKind,
    pub arity: Arity,
    pub min: f64,
    pub max: f64,
    pub initial: Value,
}

impl ChannelSpec {
    /// 单值通道，无范围限制，初始值为类型缺省值
    pub fn new(id: u32, name: impl Into<String>, role: Role, kind: ValueKind) -> Self {
        Self {
            id: ChannelId::new(id),
            name: name.into(),
            role,
            kind,
            arity: Arity::Fixed(1),
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            initial: kind.default_value(),
        }
    }

    pub fn arity(mut self, arity: Arity) -> Self {
        self.arity = arity;
        self
    }

    /// 闭区间范围（顺序颠倒时自动交换）
    pub fn range(mut self, min: f64, max: f64) -> Self {
        if min <= max {
            self.min = min;
            self.max = max;
        } else {
            self.min = max;
            self.max = min;
        }
        self
    }

    pub fn initial(mut self, initial: impl Into<Value>) -> Self {
        self.initial = initial.into();
        self
    }

    fn initial_values(&self) -> SmallVec<[Value; 3]> {
        match self.arity {
            Arity::Fixed(n) => SmallVec::from_elem(self.initial.clone(), n),
            Arity::Growable => SmallVec::new(),
        }
    }
}

/// 通道变化监听器
///
/// 回调收到的是值的不可变快照，在通道锁外调用。
pub trait ChannelListener: Send + Sync {
    fn on_changed(&self, id: ChannelId, values: &[Value]);
}

impl<F> ChannelListener for F
where
    F: Fn(ChannelId, &[Value]) + Send + Sync,
{
    fn on_changed(&self, id: ChannelId, values: &[Value]) {
        self(id, values)
    }
}

#[derive(Debug)]
struct ChannelState {
    values: SmallVec<[Value; 3]>,
    written: bool,
    fired: bool,
    event: bool,
    can_notify: bool,
}

impl ChannelState {
    fn mark_written(&mut self) {
        self.fired = true;
        self.written = true;
        self.can_notify = true;
    }
}

/// 通道
pub struct Channel {
    spec: ChannelSpec,
    state: Mutex<ChannelState>,
    listeners: Mutex<Vec<Arc<dyn ChannelListener>>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.spec.id)
            .field("name", &self.spec.name)
            .field("values", &self.state.lock().values)
            .finish()
    }
}

impl Channel {
    pub fn new(spec: ChannelSpec) -> Self {
        let values = spec.initial_values();
        Self {
            spec,
            state: Mutex::new(ChannelState {
                values,
                written: false,
                fired: false,
                event: false,
                can_notify: false,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.spec.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn role(&self) -> Role {
        self.spec.role
    }

    pub fn kind(&self) -> ValueKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// 当前值个数
    pub fn len(&self) -> usize {
        self.state.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ============================================================
    // 读取
    // ============================================================

    /// 第一个值；为空时返回类型缺省值
    pub fn read(&self) -> Value {
        self.read_at(0)
    }

    /// 指定下标的值；越界时返回类型缺省值
    pub fn read_at(&self, index: usize) -> Value {
        self.state
            .lock()
            .values
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.spec.kind.default_value())
    }

    pub fn read_all(&self) -> Vec<Value> {
        self.state.lock().values.to_vec()
    }

    /// 复制 `min(out.len(), len)` 个值，返回复制的个数
    pub fn read_into(&self, out: &mut [Value]) -> usize {
        let state = self.state.lock();
        let n = out.len().min(state.values.len());
        out[..n].clone_from_slice(&state.values[..n]);
        n
    }

    // ============================================================
    // 外部写入（带检查）
    // ============================================================

    fn check_writable(&self) -> Result<(), WriteError> {
        if self.spec.role.is_sensory() {
            return Err(WriteError::ReadOnly(self.spec.id));
        }
        Ok(())
    }

    fn accepts(&self, value: &Value) -> bool {
        if self.spec.kind.is_numeric() {
            value.is_numeric()
        } else {
            !value.is_numeric()
        }
    }

    fn check_kind(&self, value: &Value) -> Result<(), WriteError> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(WriteError::KindMismatch {
                id: self.spec.id,
                expected: self.spec.kind,
            })
        }
    }

    /// 钳位并转换到通道类型（调用前已通过类型检查）
    fn coerce(&self, value: &Value) -> Value {
        let (min, max) = (self.spec.min, self.spec.max);
        match (self.spec.kind, value) {
            (ValueKind::Integer, Value::Integer(v)) => {
                let f = *v as f64;
                if f < min {
                    Value::Integer(min as i64)
                } else if f > max {
                    Value::Integer(max as i64)
                } else {
                    Value::Integer(*v)
                }
            },
            // `as` 向零截断
            (ValueKind::Integer, v) => Value::Integer(v.as_f64().clamp(min, max) as i64),
            (ValueKind::Float, v) => Value::Float(v.as_f64().clamp(min, max)),
            (ValueKind::Text, v) => v.clone(),
        }
    }

    /// 写入第一个值
    ///
    /// 空的可增长通道会先创建一个值槽。
    pub fn write(&self, value: impl Into<Value>) -> Result<(), WriteError> {
        self.write_at(0, value)
    }

    /// 写入指定下标
    ///
    /// 可增长通道越界时扩展（新槽填初始值）；固定长度通道越界返回错误。
    pub fn write_at(&self, index: usize, value: impl Into<Value>) -> Result<(), WriteError> {
        let value = value.into();
        self.check_writable()?;
        self.check_kind(&value)?;
        let coerced = self.coerce(&value);

        let mut state = self.state.lock();
        let len = state.values.len();
        if index >= len {
            match self.spec.arity {
                Arity::Growable => state.values.resize(index + 1, self.spec.initial.clone()),
                Arity::Fixed(_) => {
                    return Err(WriteError::IndexOutOfRange {
                        id: self.spec.id,
                        index,
                        len,
                    });
                },
            }
        }
        state.values[index] = coerced;
        state.mark_written();
        Ok(())
    }

    /// 批量写入，返回写入的元素个数
    ///
    /// 可增长通道先调整到 `values.len()`；固定长度通道写入 `min(len)` 个。
    /// 类型不符的元素被跳过，全部不符时返回 [`WriteError::KindMismatch`]。
    pub fn write_all(&self, values: &[Value]) -> Result<usize, WriteError> {
        self.check_writable()?;
        if values.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock();
        let n = match self.spec.arity {
            Arity::Growable => values.len(),
            Arity::Fixed(_) => state.values.len().min(values.len()),
        };
        if n == 0 {
            return Ok(0);
        }
        // 先检查类型，失败时不修改值
        if !values[..n].iter().any(|v| self.accepts(v)) {
            return Err(WriteError::KindMismatch {
                id: self.spec.id,
                expected: self.spec.kind,
            });
        }

        if self.spec.arity == Arity::Growable && state.values.len() != n {
            state.values = SmallVec::from_elem(self.spec.initial.clone(), n);
        }
        for (slot, value) in state.values.iter_mut().zip(values) {
            if self.accepts(value) {
                *slot = self.coerce(value);
            }
        }
        state.mark_written();
        Ok(n)
    }

    /// 仅设置写入标志（写入本身即信号的命令通道）
    pub fn touch(&self) {
        self.state.lock().mark_written();
    }

    // ============================================================
    // 传输层写入（不检查）
    // ============================================================

    pub fn put(&self, value: impl Into<Value>, fired: bool) {
        self.put_at(0, value, fired);
    }

    /// 写入指定下标；可增长通道自动扩展，固定长度通道越界时忽略该值
    pub fn put_at(&self, index: usize, value: impl Into<Value>, fired: bool) {
        let mut state = self.state.lock();
        if index >= state.values.len() {
            if self.spec.arity != Arity::Growable {
                return;
            }
            state.values.resize(index + 1, self.spec.initial.clone());
        }
        state.values[index] = value.into();
        state.fired = fired;
        state.can_notify = true;
    }

    pub fn put_all(&self, values: &[Value], fired: bool) {
        let mut state = self.state.lock();
        if self.spec.arity == Arity::Growable {
            state.values = values.iter().cloned().collect();
        } else {
            for (slot, value) in state.values.iter_mut().zip(values) {
                *slot = value.clone();
            }
        }
        state.fired = fired;
        state.can_notify = true;
    }

    /// 只设置标志不改值（无负载的事件）
    pub fn put_empty(&self, fired: bool) {
        let mut state = self.state.lock();
        state.fired = fired;
        state.can_notify = true;
    }

    // ============================================================
    // 标志与通知
    // ============================================================

    /// 锁存：`event = fired; fired = false`
    pub fn latch(&self) {
        let mut state = self.state.lock();
        state.event = state.fired;
        state.fired = false;
    }

    /// 上一周期是否发生变化
    pub fn has_event(&self) -> bool {
        self.state.lock().event
    }

    pub fn is_fired(&self) -> bool {
        self.state.lock().fired
    }

    pub fn is_written(&self) -> bool {
        self.state.lock().written
    }

    pub fn clear_written(&self) {
        self.state.lock().written = false;
    }

    /// 清空全部标志并恢复初始值
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.values = self.spec.initial_values();
        state.written = false;
        state.fired = false;
        state.event = false;
        state.can_notify = false;
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn clear_listeners(&self) {
        self.listeners.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// 通知监听器
    ///
    /// Command / Event 通道仅在 `can_notify` 时通知，其它通道总是通知。
    /// 无论是否通知，`can_notify` 都会被清除。
    pub fn notify_changed(&self) {
        let listeners = self.listeners.lock().clone();
        let snapshot = {
            let mut state = self.state.lock();
            let notify = !self.spec.role.gated() || state.can_notify;
            state.can_notify = false;
            if listeners.is_empty() || !notify {
                return;
            }
            state.values.to_vec()
        };

        for listener in &listeners {
            let result = catch_unwind(AssertUnwindSafe(|| {
                listener.on_changed(self.spec.id, &snapshot)
            }));
            if result.is_err() {
                warn!("Listener of {} panicked", self.spec.name);
            }
        }
    }
}
