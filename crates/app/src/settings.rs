use config::{Config, ConfigError, Environment, File};
use kawase_core::config::AppConfig;
use std::path::Path;

/// 未显式指定配置文件时，在工作目录下查找的文件名（不含扩展名）。
pub const DEFAULT_CONFIG_NAME: &str = "kawase";

const ENV_PREFIX: &str = "KAWASE";

/// # Summary
/// 加载应用配置。
///
/// # Logic
/// 1. 以 `AppConfig` 的默认值为底。
/// 2. 叠加配置文件：显式路径必须存在；否则尝试可选的 `kawase.toml`。
/// 3. 叠加环境变量 `KAWASE__SECTION__KEY`。
///
/// # Arguments
/// * `path`: 显式指定的配置文件路径。
///
/// # Returns
/// 合并后的配置；文件缺失或字段类型错误返回 config::ConfigError。
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    load_with(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .ignore_empty(true)
}

fn load_with(path: Option<&Path>, env: Environment) -> Result<AppConfig, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    Config::builder()
        .add_source(file)
        .add_source(env)
        .build()?
        .try_deserialize()
}
