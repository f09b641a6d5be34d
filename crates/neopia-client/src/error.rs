//! 调度器错误类型

use neopia_driver::{DriverError, WriteError};
use thiserror::Error;

/// 调度器错误
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// 调度器已关闭
    #[error("Scheduler has been shut down")]
    Shutdown,

    /// 线程创建失败
    #[error("Failed to spawn thread: {0}")]
    Spawn(String),

    /// 并行任务中有任务 panic
    #[error("{0} parallel task(s) panicked")]
    TaskPanicked(usize),

    /// 通道写入错误
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// 驱动层错误
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}
