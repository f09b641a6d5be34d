//! 命令实现

mod config;
mod monitor;
mod scan;

pub use config::ConfigCommand;
pub use monitor::MonitorCommand;
pub use scan::ScanCommand;

use anyhow::{Context, Result};
use neopia_sdk::tools::NeopiaConfig;
use std::path::Path;

/// 加载配置文件；未指定时使用默认配置
pub fn load_config(path: Option<&Path>) -> Result<NeopiaConfig> {
    match path {
        Some(path) => NeopiaConfig::load_from_file(path)
            .with_context(|| format!("加载配置失败: {}", path.display())),
        None => Ok(NeopiaConfig::default()),
    }
}
