//! 客户端接口模块
//!
//! 本模块提供 Neopia 机器人的调度功能，包括：
//! - 固定周期调度循环（锁存边沿、求值、用户回调、输出快照）
//! - 条件观察者（`wait_until` / `when_do` / `while_do`）
//! - 就绪等待与并行任务
//!
//! # 使用场景
//!
//! 入口程序创建一个 [`Scheduler`]，通过 `Arc` 共享给各处代码。

mod error;
pub mod evaluator;
pub mod scheduler;

pub use error::SchedulerError;
pub use evaluator::{Evaluator, Predicate, WatchMode, WatchSignal, Watcher};
pub use scheduler::{CycleCallback, Scheduler, SchedulerState};
