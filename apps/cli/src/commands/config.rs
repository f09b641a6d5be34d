//! 配置管理命令

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use neopia_sdk::tools::NeopiaConfig;
use std::path::PathBuf;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 写出默认配置
    Init {
        /// 目标文件
        path: PathBuf,

        /// 覆盖已存在的文件
        #[arg(short, long)]
        force: bool,
    },

    /// 检查并显示配置
    Show {
        /// 配置文件（为空时显示默认配置）
        path: Option<PathBuf>,
    },
}

impl ConfigCommand {
    pub fn execute(&self) -> Result<()> {
        match self {
            Self::Init { path, force } => {
                if path.exists() && !force {
                    bail!("{} 已存在（使用 --force 覆盖）", path.display());
                }
                NeopiaConfig::default()
                    .save_to_file(path)
                    .with_context(|| format!("写入配置失败: {}", path.display()))?;
                println!("✅ 已写入 {}", path.display());
                Ok(())
            },
            Self::Show { path } => {
                let config = super::load_config(path.as_deref())?;
                println!("{:#?}", config);
                Ok(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_show() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neopia.toml");
        ConfigCommand::Init {
            path: path.clone(),
            force: false,
        }
        .execute()
        .unwrap();
        assert_eq!(
            NeopiaConfig::load_from_file(&path).unwrap(),
            NeopiaConfig::default()
        );

        let again = ConfigCommand::Init {
            path: path.clone(),
            force: false,
        };
        assert!(again.execute().is_err());
        ConfigCommand::Show { path: Some(path) }.execute().unwrap();
    }
}
