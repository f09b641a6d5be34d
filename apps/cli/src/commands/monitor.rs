//! 监控命令
//!
//! 注册一个 Neosoco，打印每次变化的传感通道，Ctrl+C 后关闭调度器。

use anyhow::{Result, bail};
use clap::Args;
use neopia_sdk::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

/// 监控命令参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 串口（覆盖配置）
    #[arg(short, long)]
    pub port: Option<String>,

    /// 远程链路地址，如 ws://127.0.0.1:59418
    #[arg(short, long, conflicts_with = "port")]
    pub link: Option<String>,

    /// 强制使用 Basic 传感布局（忽略握手型号码）
    #[arg(short, long)]
    pub basic: bool,

    /// 机器人序号
    #[arg(short, long, default_value_t = 0)]
    pub index: usize,

    /// 配置文件
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl MonitorCommand {
    pub fn execute(&self) -> Result<()> {
        let mut config = super::load_config(self.config.as_deref())?;
        if self.port.is_some() {
            config.connector.port = self.port.clone();
        }
        if self.basic {
            config.basic = true;
        }
        if let Some(url) = &self.link {
            config.link.url = url.clone();
        }
        config.validate()?;

        let scheduler = Scheduler::new(config.scheduler.clone());
        let mut linker = None;
        let robot = if self.link.is_some() {
            let l = Linker::start(config.link.clone());
            let robot = neopia_sdk::linked_neosoco(&scheduler, self.index, &l)?;
            linker = Some(l);
            robot
        } else {
            neopia_sdk::serial_neosoco(&scheduler, self.index, &config)?
        };

        let names: Vec<(ChannelId, String)> = robot
            .neobots()
            .first()
            .map(|neobot| {
                neobot
                    .tree()
                    .sensory_channels()
                    .map(|c| (c.id(), c.name().to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let listener: Arc<dyn ChannelListener> =
            Arc::new(move |id: ChannelId, values: &[Value]| {
                let name = names
                    .iter()
                    .find(|(cid, _)| *cid == id)
                    .map_or("?", |(_, name)| name.as_str());
                println!("{:<16} {:?}", name, values);
            });
        robot.add_listener(listener);

        let s = scheduler.clone();
        ctrlc::set_handler(move || s.shutdown())?;

        scheduler.wait_until_ready()?;
        let state = robot
            .neobots()
            .first()
            .map(|neobot| neobot.connection_state());
        if state == Some(ConnectionState::Disconnected) && self.link.is_none() {
            scheduler.shutdown();
            bail!("未找到 Neosoco");
        }
        println!("监控中，Ctrl+C 退出");
        scheduler.wait(-1);

        if let Some(linker) = linker {
            linker.stop();
        }
        Ok(())
    }
}
