//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use neopia_sdk::prelude::*;
//! ```

// 调度层（推荐使用）
pub use crate::client::{Scheduler, SchedulerError, SchedulerState};

// 驱动层
pub use crate::driver::neosoco::{self, NeosocoRobot};
pub use crate::driver::{
    ChannelId, ChannelListener, ConnectionState, Linker, Neobot, Robot, Value, ValueKind,
    WriteError,
};

// 配置
pub use crate::tools::NeopiaConfig;

// 错误类型
pub use crate::driver::DriverError;
pub use crate::protocol::ProtocolError;
pub use crate::serial::SerialError;
