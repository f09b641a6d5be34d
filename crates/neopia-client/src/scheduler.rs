//! 调度器
//!
//! 状态机：`Idle → Running → Shutdown`（终态）。
//!
//! 运行期间调度线程每个周期（默认 20ms）依次执行：
//!
//! 1. 合并排队的机器人注册 / 注销
//! 2. 锁存所有机器人的传感边沿
//! 3. 条件求值
//! 4. 用户周期回调（panic 后永久注销）
//! 5. 请求输出快照（清除 written 标志）
//! 6. 锁存输出边沿并通知输出监听器
//!
//! # 示例
//!
//! ```rust,no_run
//! use neopia_client::Scheduler;
//! use neopia_tools::SchedulerConfig;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! scheduler.start().unwrap();
//! scheduler.wait(100);
//! scheduler.shutdown();
//! ```

use crate::error::SchedulerError;
use crate::evaluator::{Evaluator, Predicate, WatchMode, WatchSignal, Watcher, companion_loop};
use crossbeam_channel::{Receiver, Sender, unbounded};
use neopia_driver::{DriverError, Readiness, Robot};
use neopia_tools::SchedulerConfig;
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SchedulerState {
    #[default]
    Idle = 0,
    Running = 1,
    Shutdown = 2,
}

impl SchedulerState {
    /// 无效值视为 Shutdown
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Shutdown,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 用户周期回调
pub type CycleCallback = Box<dyn FnMut() + Send>;

/// 用户周期回调槽
///
/// 每次 `set_callback` 递增 `generation`；回调执行期间被替换或清除时不再放回。
#[derive(Default)]
struct CallbackSlot {
    callback: Option<CycleCallback>,
    generation: u64,
}

enum Registration {
    Add(Arc<Robot>),
    Remove(Arc<Robot>),
}

struct Shared {
    config: SchedulerConfig,
    state: AtomicU8,
    registrations: Receiver<Registration>,
    robots: Mutex<Vec<Arc<Robot>>>,
    callback: Mutex<CallbackSlot>,
    readiness: Arc<Readiness>,
    cycles: AtomicU64,
    /// 关闭通知（`wait(-1)` 等待方）
    stopped: Mutex<bool>,
    stopped_changed: Condvar,
}

impl Shared {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_shutdown(&self) -> bool {
        self.state() == SchedulerState::Shutdown
    }

    fn apply_registrations(&self) {
        let mut robots = self.robots.lock();
        for registration in self.registrations.try_iter() {
            match registration {
                Registration::Add(robot) => {
                    if !robots.iter().any(|r| Arc::ptr_eq(r, &robot)) {
                        robots.push(robot);
                    }
                },
                Registration::Remove(robot) => robots.retain(|r| !Arc::ptr_eq(r, &robot)),
            }
        }
    }

    fn run_callback(&self) {
        let (mut callback, generation) = {
            let mut slot = self.callback.lock();
            let Some(callback) = slot.callback.take() else {
                return;
            };
            (callback, slot.generation)
        };
        match catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(()) => {
                let mut slot = self.callback.lock();
                if slot.generation == generation {
                    slot.callback = Some(callback);
                }
            },
            Err(_) => warn!("Cycle callback panicked; deregistered"),
        }
    }

    fn cycle(&self, evaluator: &mut Evaluator) {
        self.apply_registrations();
        let robots = self.robots.lock().clone();

        for robot in &robots {
            robot.latch_sensory();
        }
        evaluator.pass();
        self.run_callback();
        for robot in &robots {
            robot.request_motoring_data();
        }
        for robot in &robots {
            robot.latch_motoring();
        }
        for robot in &robots {
            robot.notify_motoring();
        }
        self.cycles.fetch_add(1, Ordering::AcqRel);
    }
}

fn run_loop(shared: Arc<Shared>, mut evaluator: Evaluator) {
    let cycle = shared.config.cycle();
    let mut next = Instant::now();
    while shared.state() == SchedulerState::Running {
        shared.cycle(&mut evaluator);

        next += cycle;
        let now = Instant::now();
        if next > now {
            spin_sleep::sleep(next - now);
        } else {
            // 落后时不追赶
            next = now;
        }
    }
    evaluator.cancel_all();
    debug!("Scheduler loop exited");
}

/// 调度器
pub struct Scheduler {
    shared: Arc<Shared>,
    registrations: Sender<Registration>,
    watchers: Sender<Watcher>,
    evaluator: Mutex<Option<Evaluator>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    companions: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let (registrations, registration_rx) = unbounded();
        let evaluator = Evaluator::new();
        let watchers = evaluator.sender();
        Arc::new(Self {
            shared: Arc::new(Shared {
                config,
                state: AtomicU8::new(SchedulerState::Idle.as_u8()),
                registrations: registration_rx,
                robots: Mutex::new(Vec::new()),
                callback: Mutex::new(CallbackSlot::default()),
                readiness: Arc::new(Readiness::new()),
                cycles: AtomicU64::new(0),
                stopped: Mutex::new(false),
                stopped_changed: Condvar::new(),
            }),
            registrations,
            watchers,
            evaluator: Mutex::new(Some(evaluator)),
            thread: Mutex::new(None),
            companions: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// 已完成的周期数
    pub fn cycle_count(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    /// 就绪计数器（传给机器人工厂）
    pub fn readiness(&self) -> Arc<Readiness> {
        self.shared.readiness.clone()
    }

    /// 当前已并入的机器人数
    pub fn robot_count(&self) -> usize {
        self.shared.robots.lock().len()
    }

    /// 启动调度线程（幂等）
    pub fn start(&self) -> Result<(), SchedulerError> {
        let transition = self.shared.state.compare_exchange(
            SchedulerState::Idle.as_u8(),
            SchedulerState::Running.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match transition {
            Ok(_) => {},
            Err(current) if SchedulerState::from_u8(current) == SchedulerState::Running => {
                return Ok(());
            },
            Err(_) => return Err(SchedulerError::Shutdown),
        }

        let Some(evaluator) = self.evaluator.lock().take() else {
            return Err(SchedulerError::Shutdown);
        };
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("neopia-scheduler".into())
            .spawn(move || run_loop(shared, evaluator))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
        *self.thread.lock() = Some(handle);
        info!("Scheduler started");
        Ok(())
    }

    // ============================================================
    // 注册
    // ============================================================

    /// 注册机器人（下一个周期开始时生效）
    ///
    /// 已释放的机器人返回 [`DriverError::Disposed`]。
    pub fn register(&self, robot: Arc<Robot>) -> Result<(), SchedulerError> {
        if self.shared.is_shutdown() {
            return Err(SchedulerError::Shutdown);
        }
        if !robot.neobots().is_empty() && robot.is_disposed() {
            return Err(DriverError::Disposed.into());
        }
        self.registrations
            .send(Registration::Add(robot))
            .map_err(|_| SchedulerError::Shutdown)?;
        self.start()
    }

    pub fn unregister(&self, robot: &Arc<Robot>) {
        let _ = self.registrations.send(Registration::Remove(robot.clone()));
    }

    /// 设置用户周期回调（`None` 清除）
    pub fn set_callback(&self, callback: Option<CycleCallback>) {
        let mut slot = self.shared.callback.lock();
        slot.callback = callback;
        slot.generation += 1;
    }

    // ============================================================
    // 等待
    // ============================================================

    /// 阻塞调用线程
    ///
    /// 正数等待对应毫秒；0 立即返回；负数一直等待到调度器关闭。
    pub fn wait(&self, milliseconds: i64) {
        match milliseconds {
            ms if ms > 0 => spin_sleep::sleep(Duration::from_millis(ms as u64)),
            0 => {},
            _ => {
                let mut stopped = self.shared.stopped.lock();
                while !*stopped {
                    self.shared.stopped_changed.wait(&mut stopped);
                }
            },
        }
    }

    /// 等待所有正在连接的机器人报告（连接成功或不可用）
    pub fn wait_until_ready(&self) -> Result<(), SchedulerError> {
        let poll = self.shared.config.poll();
        loop {
            if self.shared.readiness.wait_timeout(poll) {
                return Ok(());
            }
            if self.shared.is_shutdown() {
                return Err(SchedulerError::Shutdown);
            }
        }
    }

    /// 阻塞直到谓词在某个周期为真
    pub fn wait_until<F>(&self, predicate: F) -> Result<(), SchedulerError>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let signal = Arc::new(WatchSignal::new());
        self.add_watcher(WatchMode::OneShot, Box::new(predicate), signal.clone())?;
        let shared = &self.shared;
        if signal.wait_satisfied(shared.config.poll(), || shared.is_shutdown()) {
            Ok(())
        } else {
            Err(SchedulerError::Shutdown)
        }
    }

    /// 谓词每次由 false 变为 true 时执行回调
    pub fn when_do<F, C>(&self, predicate: F, callback: C) -> Result<(), SchedulerError>
    where
        F: FnMut() -> bool + Send + 'static,
        C: FnMut() + Send + 'static,
    {
        self.spawn_watcher(WatchMode::Edge, Box::new(predicate), Box::new(callback))
    }

    /// 谓词为真期间反复执行回调
    pub fn while_do<F, C>(&self, predicate: F, callback: C) -> Result<(), SchedulerError>
    where
        F: FnMut() -> bool + Send + 'static,
        C: FnMut() + Send + 'static,
    {
        self.spawn_watcher(WatchMode::Level, Box::new(predicate), Box::new(callback))
    }

    fn add_watcher(
        &self,
        mode: WatchMode,
        predicate: Predicate,
        signal: Arc<WatchSignal>,
    ) -> Result<(), SchedulerError> {
        self.start()?;
        self.watchers
            .send(Watcher::new(mode, predicate, signal.clone()))
            .map_err(|_| SchedulerError::Shutdown)?;
        // 关闭与发送竞争时调度线程可能已不再求值
        if self.shared.is_shutdown() {
            signal.cancel();
            return Err(SchedulerError::Shutdown);
        }
        Ok(())
    }

    fn spawn_watcher(
        &self,
        mode: WatchMode,
        predicate: Predicate,
        callback: Box<dyn FnMut() + Send>,
    ) -> Result<(), SchedulerError> {
        let signal = Arc::new(WatchSignal::new());
        let poll = self.shared.config.poll();
        let companion_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("neopia-watcher".into())
            .spawn(move || companion_loop(companion_signal, callback, poll))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
        self.companions.lock().push(handle);
        self.add_watcher(mode, predicate, signal)
    }

    /// 在独立线程中运行所有任务并等待全部结束
    pub fn parallel(&self, tasks: Vec<Box<dyn FnOnce() + Send>>) -> Result<(), SchedulerError> {
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let handle = thread::Builder::new()
                .spawn(task)
                .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
            handles.push(handle);
        }
        let panicked = handles
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();
        if panicked > 0 {
            warn!("{} parallel task(s) panicked", panicked);
            return Err(SchedulerError::TaskPanicked(panicked));
        }
        Ok(())
    }

    // ============================================================
    // 关闭
    // ============================================================

    /// 释放所有已注册（包括排队中）的机器人，调度器继续运行
    pub fn dispose_all(&self) {
        self.shared.apply_registrations();
        let robots: Vec<Arc<Robot>> = self.shared.robots.lock().drain(..).collect();
        for robot in robots {
            robot.dispose();
        }
    }

    /// 关闭调度器（幂等）：释放机器人、停止并等待所有线程
    pub fn shutdown(&self) {
        let previous = self
            .shared
            .state
            .swap(SchedulerState::Shutdown.as_u8(), Ordering::AcqRel);
        if SchedulerState::from_u8(previous) == SchedulerState::Shutdown {
            return;
        }
        self.dispose_all();

        {
            let mut stopped = self.shared.stopped.lock();
            *stopped = true;
            self.shared.stopped_changed.notify_all();
        }

        let current = thread::current().id();
        // 在调度线程或伴随线程内关闭时不能等待自身
        if let Some(handle) = self.thread.lock().take()
            && handle.thread().id() != current
            && handle.join().is_err()
        {
            warn!("Scheduler thread panicked");
        }
        // 从未启动时观察者仍在求值器队列中
        if let Some(mut evaluator) = self.evaluator.lock().take() {
            evaluator.cancel_all();
        }
        let companions: Vec<JoinHandle<()>> = self.companions.lock().drain(..).collect();
        for handle in companions {
            if handle.thread().id() != current && handle.join().is_err() {
                warn!("Watcher thread panicked");
            }
        }
        info!("Scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
