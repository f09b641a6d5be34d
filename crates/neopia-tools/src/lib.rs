//! # Neopia Tools - 共享配置结构
//!
//! **依赖原则**: 不依赖 `neopia-driver` / `neopia-client`，只提供纯数据结构
//!
//! ## 包含模块
//!
//! - `config` - 连接器、远程链路、调度器配置（TOML 文件加载 / 保存）

pub mod config;

pub use config::{ConfigError, ConnectorConfig, LinkConfig, NeopiaConfig, SchedulerConfig};
