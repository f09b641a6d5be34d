//! 驱动层模块
//!
//! 本模块提供 Neosoco 机器人的设备驱动功能，包括：
//! - 类型化通道模型与实体树
//! - 串口连接器（端口发现、握手、断线检测）
//! - IO 线程（每收一帧回一帧）
//! - 远程链路（WebSocket，JSON 复用多个机器人）
//! - 就绪跟踪
//!
//! # 使用场景
//!
//! 大多数用户应该通过 `neopia-client` 的调度器使用本模块创建的 [`Robot`]。

pub mod connector;
mod error;
pub mod link;
pub mod model;
mod neobot;
pub mod neosoco;
pub mod pipeline;
mod readiness;

pub use connector::{
    AtomicConnectionState, ConnectionChecker, ConnectionState, NeosocoChecker, OpenResult,
    SerialConnector,
};
pub use error::{DriverError, LinkError, WriteError};
pub use link::{BusConnection, BusConnector, LinkEndpoint, Linker, RemoteState, WsConnector};
pub use model::*;
pub use neobot::{EntityRef, Neobot, Robot};
pub use neosoco::NeosocoRobot;
pub use pipeline::{FrameHandler, IoControl, PipelineConfig, io_loop};
pub use readiness::Readiness;
