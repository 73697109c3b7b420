use anyhow::{Context, Result};
use chrono::NaiveDate;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    engine::{EngineConfig, ExecutorConfig},
    observability::ObservabilityConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub executor: ExecutorConfig,
    pub observability: ObservabilityConfig,
    /// 启动时注册的任务定义
    pub definitions: Vec<DefinitionSeed>,
}

/// 配置文件中声明的任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionSeed {
    pub name: String,
    pub template: String,
    /// `ONCE` 或 `CRON`
    pub schedule_type: String,
    pub schedule_rule: String,
    #[serde(default)]
    pub schedule_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub schedule_end_date: Option<NaiveDate>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl DefinitionSeed {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("任务定义名称不能为空"));
        }
        if self.template.is_empty() {
            return Err(anyhow::anyhow!("任务定义 {} 未指定模板", self.name));
        }
        let schedule_type = self.schedule_type.to_ascii_uppercase();
        if schedule_type != "ONCE" && schedule_type != "CRON" {
            return Err(anyhow::anyhow!(
                "任务定义 {} 的调度类型无效: {}",
                self.name,
                self.schedule_type
            ));
        }
        if let (Some(start), Some(end)) = (self.schedule_start_date, self.schedule_end_date) {
            if start > end {
                return Err(anyhow::anyhow!(
                    "任务定义 {} 的生效窗口无效: {} > {}",
                    self.name,
                    start,
                    end
                ));
            }
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: TASKFLOW_, nested separator: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.engine.validate().context("引擎配置验证失败")?;
        self.executor.validate().context("执行池配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        for definition in &self.definitions {
            definition.validate().context("任务定义配置验证失败")?;
        }

        Ok(())
    }
}
