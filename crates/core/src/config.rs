use crate::market::state::SnapshotPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub positions: PositionsConfig,
    pub log: LogConfig,
}

/// # Summary
/// 推送通道配置。
///
/// # Invariants
/// - `api_base` 必须是 http/https/ws/wss 之一的绝对地址，REST 与推送通道共用该地址。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    // 后端基础地址，如 http://localhost:8001
    pub api_base: String,
    // 推送通道的固定路径
    pub path: String,
    // 断线重连的固定间隔（毫秒）
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionsConfig {
    // 持仓快照的轮询间隔（秒）
    pub refresh_interval_secs: u64,
    // 权威快照为空列表时的处理策略
    pub snapshot_policy: SnapshotPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    // 默认日志过滤级别，可被 RUST_LOG 覆盖
    pub level: String,
    // 若设置则额外按天滚动写入该目录
    pub dir: Option<String>,
}

/// # Summary
/// 配置校验错误。
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    // 基础地址的协议无法映射到 WebSocket 协议
    #[error("Unsupported scheme in api base: {0}")]
    UnsupportedScheme(String),
    // 基础地址格式不合法
    #[error("Invalid api base: {0}")]
    InvalidBase(String),
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8001".to_string(),
            path: "/ws/prices".to_string(),
            reconnect_delay_ms: 3_000,
        }
    }
}

impl Default for PositionsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 5,
            snapshot_policy: SnapshotPolicy::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

impl StreamConfig {
    /// # Summary
    /// 推导推送通道的实际 WebSocket 地址。
    ///
    /// # Logic
    /// 1. 拆分出协议头，http 映射为 ws，https 映射为 wss，ws/wss 原样保留。
    /// 2. 去掉基础地址末尾的斜杠。
    /// 3. 拼接固定路径（保证以斜杠开头）。
    ///
    /// # Returns
    /// 成功返回完整 URL，协议不支持或缺少主机部分时返回 ConfigError。
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        let base = self.api_base.trim();
        let (scheme, rest) = base
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidBase(base.to_string()))?;

        let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let host = rest.trim_end_matches('/');
        if host.is_empty() {
            return Err(ConfigError::InvalidBase(base.to_string()));
        }

        let path = self.path.trim_start_matches('/');
        Ok(format!("{}://{}/{}", ws_scheme, host, path))
    }

    /// 基础地址去掉末尾斜杠后的形式，供 REST 客户端拼接路由。
    pub fn http_base(&self) -> String {
        self.api_base.trim().trim_end_matches('/').to_string()
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl PositionsConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}
