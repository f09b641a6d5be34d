//! Neopia SDK - Neosoco 教育机器人 Rust SDK
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **串口层** (`serial`): 字节流端点抽象（系统串口 / Mock）
//! - **协议层** (`protocol`): 帧编解码、握手、派生分类器
//! - **驱动层** (`driver`): 通道模型、连接器、IO 线程、远程链路
//! - **调度层** (`client`): 固定周期调度与条件观察者
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use neopia_sdk::prelude::*;
//!
//! # fn main() -> Result<(), SchedulerError> {
//! neopia_sdk::init_logger();
//! let config = NeopiaConfig::default();
//! let scheduler = Scheduler::new(config.scheduler.clone());
//! let robot = neopia_sdk::serial_neosoco(&scheduler, 0, &config)?;
//! scheduler.wait_until_ready()?;
//!
//! robot.write(neosoco::LEFT_MOTOR, 20)?;
//! let r = robot.clone();
//! scheduler.wait_until(move || r.read(neosoco::INPUT_1).as_i64() > 100)?;
//! scheduler.shutdown();
//! # Ok(())
//! # }
//! ```

pub use neopia_client as client;
pub use neopia_driver as driver;
pub use neopia_protocol as protocol;
pub use neopia_serial as serial;
pub use neopia_tools as tools;

pub mod prelude;

use neopia_client::{Scheduler, SchedulerError};
use neopia_driver::neosoco::{self, NeosocoRobot};
use neopia_driver::{Linker, Robot};
use neopia_serial::SerialBackend;
use neopia_tools::NeopiaConfig;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// 初始化日志（幂等）
///
/// 使用 `RUST_LOG` 过滤，默认 `info`；`log` crate 的记录桥接到 `tracing`。
pub fn init_logger() {
    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 通过指定串口后端创建 Neosoco 并注册到调度器
pub fn serial_neosoco_with(
    scheduler: &Arc<Scheduler>,
    index: usize,
    config: &NeopiaConfig,
    backend: Arc<dyn SerialBackend>,
) -> Result<Arc<Robot>, SchedulerError> {
    let neobot = NeosocoRobot::serial(index, config, backend, Some(scheduler.readiness()))?;
    let robot = Arc::new(neosoco::robot(neobot));
    scheduler.register(robot.clone())?;
    Ok(robot)
}

/// 通过系统串口创建 Neosoco 并注册到调度器
#[cfg(feature = "system")]
pub fn serial_neosoco(
    scheduler: &Arc<Scheduler>,
    index: usize,
    config: &NeopiaConfig,
) -> Result<Arc<Robot>, SchedulerError> {
    serial_neosoco_with(scheduler, index, config, Arc::new(neopia_serial::SystemSerial::new()))
}

/// 通过远程链路创建 Neosoco 并注册到调度器
pub fn linked_neosoco(
    scheduler: &Arc<Scheduler>,
    index: usize,
    linker: &Arc<Linker>,
) -> Result<Arc<Robot>, SchedulerError> {
    let neobot = NeosocoRobot::linked(index, linker, Some(scheduler.readiness()))?;
    let robot = Arc::new(neosoco::robot(neobot));
    scheduler.register(robot.clone())?;
    Ok(robot)
}
