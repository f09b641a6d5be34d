//! # Neopia CLI
//!
//! Neosoco 机器人命令行工具。
//!
//! ```bash
//! # 枚举串口并握手
//! neopia-cli scan
//!
//! # 打印传感数据变化（Ctrl+C 退出）
//! neopia-cli monitor --port /dev/ttyUSB0
//!
//! # 通过远程链路监控
//! neopia-cli monitor --link ws://127.0.0.1:59418
//!
//! # 生成默认配置
//! neopia-cli config init neopia.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigCommand, MonitorCommand, ScanCommand};

/// Neopia CLI - Neosoco 机器人命令行工具
#[derive(Parser, Debug)]
#[command(name = "neopia-cli")]
#[command(about = "Command-line interface for Neosoco robots", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 枚举串口并尝试握手
    Scan {
        #[command(flatten)]
        args: ScanCommand,
    },

    /// 监控传感数据
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("neopia=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { args } => args.execute(),
        Commands::Monitor { args } => args.execute(),
        Commands::Config(cmd) => cmd.execute(),
    }
}
