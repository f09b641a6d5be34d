//! 条件求值器
//!
//! 调度线程每个周期执行一次 [`Evaluator::pass`]：
//!
//! - 新加入的观察者先进入队列，在下一次求值开始时并入活动集合
//! - 需要移除的观察者在本次求值结束后统一移除
//! - 谓词 panic 后被清除，该观察者永远不再匹配
//!
//! 回调不在调度线程中执行：求值器只通过 [`WatchSignal`] 通知伴随线程。

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// 谓词
pub type Predicate = Box<dyn FnMut() -> bool + Send>;

/// 观察模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// 谓词首次为真时满足并移除（`wait_until`）
    OneShot,
    /// 仅在 false → true 时触发（`when_do`）
    Edge,
    /// 谓词为真时每次都触发（`while_do`）
    Level,
}

#[derive(Debug, Default)]
struct SignalState {
    fires: u64,
    handled: u64,
    satisfied: bool,
    cancelled: bool,
}

/// 求值器与等待方 / 伴随线程之间的信号
#[derive(Debug, Default)]
pub struct WatchSignal {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl WatchSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn fire(&self) {
        self.state.lock().fires += 1;
        self.changed.notify_all();
    }

    fn satisfy(&self) {
        self.state.lock().satisfied = true;
        self.changed.notify_all();
    }

    /// 取消：等待方返回，伴随线程退出，求值器移除观察者
    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn is_satisfied(&self) -> bool {
        self.state.lock().satisfied
    }

    /// 已触发次数
    pub fn fires(&self) -> u64 {
        self.state.lock().fires
    }

    /// 还有未处理的触发
    fn is_busy(&self) -> bool {
        let state = self.state.lock();
        state.fires > state.handled
    }

    /// 等待满足或取消，返回是否满足
    ///
    /// `poll` 为单次等待上限，每次醒来都会检查 `abort`。
    pub fn wait_satisfied(&self, poll: Duration, mut abort: impl FnMut() -> bool) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.satisfied {
                return true;
            }
            if state.cancelled || abort() {
                return false;
            }
            self.changed.wait_for(&mut state, poll);
        }
    }

    /// 等待下一次未处理的触发；取消时返回 false
    fn wait_fire(&self, poll: Duration) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return false;
            }
            if state.fires > state.handled {
                return true;
            }
            self.changed.wait_for(&mut state, poll);
        }
    }

    /// 标记当前所有触发已处理（合并期间的多次触发）
    fn mark_handled(&self) {
        let mut state = self.state.lock();
        state.handled = state.fires;
    }
}

/// 伴随线程主体：每次触发执行一次回调
///
/// 回调 panic 后禁用（取消信号），观察者随后被求值器移除。
/// 两次回调之间至少间隔 `min_interval`。
pub fn companion_loop(
    signal: Arc<WatchSignal>,
    mut callback: Box<dyn FnMut() + Send>,
    min_interval: Duration,
) {
    let mut last_run: Option<Instant> = None;
    while signal.wait_fire(min_interval) {
        if let Some(last) = last_run {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                spin_sleep::sleep(min_interval - elapsed);
            }
        }
        last_run = Some(Instant::now());
        let result = catch_unwind(AssertUnwindSafe(|| callback()));
        signal.mark_handled();
        if result.is_err() {
            warn!("Watcher callback panicked; disabled");
            signal.cancel();
            break;
        }
    }
}

/// 观察者
pub struct Watcher {
    predicate: Option<Predicate>,
    mode: WatchMode,
    last: bool,
    removed: bool,
    signal: Arc<WatchSignal>,
}

impl Watcher {
    pub fn new(mode: WatchMode, predicate: Predicate, signal: Arc<WatchSignal>) -> Self {
        Self {
            predicate: Some(predicate),
            mode,
            last: false,
            removed: false,
            signal,
        }
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    pub fn signal(&self) -> &Arc<WatchSignal> {
        &self.signal
    }

    fn evaluate(&mut self) {
        if self.signal.is_cancelled() {
            self.removed = true;
            return;
        }
        // 上一次触发尚未处理完时不再求值
        if self.mode == WatchMode::Level && self.signal.is_busy() {
            return;
        }
        let Some(predicate) = self.predicate.as_mut() else {
            return;
        };
        let result = match catch_unwind(AssertUnwindSafe(|| predicate())) {
            Ok(result) => result,
            Err(_) => {
                warn!("Watcher predicate panicked; cleared");
                self.predicate = None;
                false
            },
        };

        match self.mode {
            WatchMode::OneShot => {
                if result {
                    self.signal.satisfy();
                    self.removed = true;
                }
            },
            WatchMode::Edge => {
                if result && !self.last {
                    self.signal.fire();
                }
            },
            WatchMode::Level => {
                if result {
                    self.signal.fire();
                }
            },
        }
        self.last = result;
    }
}

/// 条件求值器
pub struct Evaluator {
    added_tx: Sender<Watcher>,
    added_rx: Receiver<Watcher>,
    active: Vec<Watcher>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        let (added_tx, added_rx) = unbounded();
        Self {
            added_tx,
            added_rx,
            active: Vec::new(),
        }
    }

    /// 新观察者入口（可在任意线程使用）
    pub fn sender(&self) -> Sender<Watcher> {
        self.added_tx.clone()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// 执行一次求值
    pub fn pass(&mut self) {
        self.active.extend(self.added_rx.try_iter());
        for watcher in &mut self.active {
            watcher.evaluate();
        }
        self.active.retain(|w| !w.removed);
    }

    /// 取消所有观察者（包括尚未并入的）
    pub fn cancel_all(&mut self) {
        self.active.extend(self.added_rx.try_iter());
        for watcher in self.active.drain(..) {
            watcher.signal.cancel();
        }
    }
}
