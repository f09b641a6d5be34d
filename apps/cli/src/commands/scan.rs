//! 端口扫描命令

use anyhow::Result;
use clap::Args;
use neopia_sdk::driver::{NeosocoChecker, OpenResult, SerialConnector};
use neopia_sdk::protocol::SensoryLayout;
use neopia_sdk::serial::{PortKind, SerialBackend, SystemSerial};
use std::path::PathBuf;
use std::sync::Arc;

/// 扫描命令参数
#[derive(Args, Debug)]
pub struct ScanCommand {
    /// 配置文件
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 只列出端口，不握手
    #[arg(long)]
    pub list_only: bool,
}

impl ScanCommand {
    pub fn execute(&self) -> Result<()> {
        let config = super::load_config(self.config.as_deref())?;
        let backend: Arc<dyn SerialBackend> = Arc::new(SystemSerial::new());
        let ports = backend.available_ports()?;

        if ports.is_empty() {
            println!("未找到串口");
            return Ok(());
        }

        for port in ports {
            let kind = match &port.kind {
                PortKind::Usb { vid, pid, product } => format!(
                    "USB {:04X}:{:04X} {}",
                    vid,
                    pid,
                    product.as_deref().unwrap_or("")
                ),
                PortKind::Other => "-".to_string(),
            };
            if self.list_only {
                println!("{:<20} {}", port.name, kind);
                continue;
            }

            let mut connector = SerialConnector::new(
                format!("Scan[{}]", port.name),
                backend.clone(),
                Arc::new(NeosocoChecker),
                config.connector.clone(),
                SensoryLayout::Basic.frame_len(),
            );
            match connector.open(Some(&port.name)) {
                OpenResult::Found => println!(
                    "{:<20} {}  Neosoco {:?} {}",
                    port.name,
                    kind,
                    connector.model(),
                    connector.address().unwrap_or("")
                ),
                _ => println!("{:<20} {}  (no robot)", port.name, kind),
            }
            connector.close();
        }
        Ok(())
    }
}
