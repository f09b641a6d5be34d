//! # 配置
//!
//! 所有配置结构都实现 `Default`，TOML 文件中缺省的字段使用默认值。
//!
//! ```toml
//! basic = false
//!
//! [connector]
//! port = "/dev/ttyUSB0"
//!
//! [link]
//! url = "ws://127.0.0.1:59418"
//!
//! [scheduler]
//! cycle_ms = 20
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 配置加载错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 串口连接器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// 指定端口；为空时枚举所有端口
    pub port: Option<String>,
    pub baud_rate: u32,
    /// 单次读超时（ms）
    pub read_timeout_ms: u64,
    /// 连续无有效帧超过此时长判定为连接丢失（ms）
    pub connection_timeout_ms: u64,
    /// 每个端口的握手重试次数
    pub handshake_retries: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout_ms: 100,
            connection_timeout_ms: 400,
            handshake_retries: 10,
        }
    }
}

impl ConnectorConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// 远程链路配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub url: String,
    /// 断线后重连等待（ms）
    pub reconnect_delay_ms: u64,
    /// 发送周期（ms）
    pub send_interval_ms: u64,
    /// 接收线程单次读超时（ms）
    pub read_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:59418".to_string(),
            reconnect_delay_ms: 500,
            send_interval_ms: 20,
            read_timeout_ms: 10,
        }
    }
}

impl LinkConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// 调度器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 主循环周期（ms）
    pub cycle_ms: u64,
    /// 阻塞等待 / 回调线程的轮询粒度（ms）
    pub poll_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_ms: 20,
            poll_ms: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

/// 顶层配置
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NeopiaConfig {
    /// 强制使用 Basic 传感布局
    ///
    /// 默认按握手返回的型号码选择 Gen04 / Gen0E 扩展布局。
    pub basic: bool,
    pub connector: ConnectorConfig,
    pub link: LinkConfig,
    pub scheduler: SchedulerConfig,
}

impl NeopiaConfig {
    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: NeopiaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.cycle_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.cycle_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.scheduler.poll_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.poll_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.connector.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "connector.baud_rate",
                reason: "must be greater than 0".to_string(),
            });
        }
        if !self.link.url.starts_with("ws://") && !self.link.url.starts_with("wss://") {
            return Err(ConfigError::Invalid {
                field: "link.url",
                reason: format!("not a websocket url: {}", self.link.url),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NeopiaConfig::default();
        assert_eq!(config.connector.baud_rate, 115_200);
        assert_eq!(config.connector.connection_timeout(), Duration::from_millis(400));
        assert_eq!(config.connector.handshake_retries, 10);
        assert_eq!(config.link.url, "ws://127.0.0.1:59418");
        assert_eq!(config.link.reconnect_delay(), Duration::from_millis(500));
        assert_eq!(config.scheduler.cycle(), Duration::from_millis(20));
        assert!(!config.basic);
    }

    #[test]
    fn test_partial_toml() {
        let config = NeopiaConfig::from_toml_str(
            r#"
basic = true

[connector]
port = "COM3"
"#,
        )
        .unwrap();
        assert!(config.basic);
        assert_eq!(config.connector.port.as_deref(), Some("COM3"));
        // 未指定字段使用默认值
        assert_eq!(config.connector.read_timeout_ms, 100);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = NeopiaConfig::from_toml_str("[scheduler]\ncycle_ms = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "scheduler.cycle_ms",
                ..
            }
        ));
        let err = NeopiaConfig::from_toml_str("[link]\nurl = \"http://x\"\n").unwrap_err();
        assert!(format!("{}", err).contains("link.url"));
        assert!(matches!(
            NeopiaConfig::from_toml_str("basic = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neopia.toml");
        let mut config = NeopiaConfig::default();
        config.connector.port = Some("/dev/ttyUSB0".to_string());
        config.link.send_interval_ms = 40;
        config.save_to_file(&path).unwrap();

        let loaded = NeopiaConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            NeopiaConfig::load_from_file("/nonexistent/neopia.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
