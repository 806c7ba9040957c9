//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::observability::ObservabilityConfig;

/// 上下文中缺失 `对象.字段` 时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// 对象存在但字段缺失时按空字符串处理（兼容上游数据缺口）
    #[default]
    DefaultEmpty,
    /// 字段缺失即视为未知变量
    Strict,
}

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 表示“不限制”的受众取值
    pub no_restriction_sentinel: String,
    pub missing_field_policy: MissingFieldPolicy,
    /// `Audience == 'X'` 递归引用的最大嵌套层数
    pub max_reference_depth: usize,
    /// 预览模式：所有组件均可见
    pub builder_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            no_restriction_sentinel: "--NONE--".to_string(),
            missing_field_policy: MissingFieldPolicy::DefaultEmpty,
            max_reference_depth: 16,
            builder_mode: false,
        }
    }
}

impl EngineConfig {
    /// 受众 ID 是否表示“对所有访客生效”
    pub fn is_unrestricted(&self, audience_id: Option<&str>) -> bool {
        match audience_id {
            None => true,
            Some(id) => id.is_empty() || id == self.no_restriction_sentinel,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（AUDIENCE_ 前缀，如 AUDIENCE_ENGINE__BUILDER_MODE -> engine.builder_mode）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("AUDIENCE_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), &env, service_name)
    }

    /// 从指定目录加载配置
    pub fn load_from(
        config_dir: &Path,
        environment: &str,
        service_name: &str,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", environment)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", environment))).required(false),
            )
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 环境变量覆盖（AUDIENCE_ENGINE__MAX_REFERENCE_DEPTH -> engine.max_reference_depth）
            .add_source(
                Environment::with_prefix("AUDIENCE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
