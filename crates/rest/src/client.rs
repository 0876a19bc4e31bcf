use crate::error::RestError;
use kawase_core::common::Record;
use kawase_core::common::tls::ensure_crypto_provider;
use kawase_core::config::StreamConfig;
use kawase_core::market::state::StrategyHistory;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const POSITIONS_ROUTE: &str = "/api/trading/positions";
const SIGNAL_HISTORY_ROUTE: &str = "/api/trading/signals/history";

/// # Summary
/// 单个策略的历史信号分组，对应历史接口数组中的一项。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignalHistoryGroup {
    pub strategy: String,
    #[serde(default)]
    pub strategy_name: Option<String>,
    // 最新在前
    #[serde(default)]
    pub events: Vec<Record>,
}

/// # Summary
/// 后端交易接口客户端。
///
/// # Invariants
/// - 与推送通道共用 `api_base`，路由为固定路径。
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    // 去掉末尾斜杠的基础地址
    base: String,
}

impl BackendClient {
    /// # Summary
    /// 创建客户端。
    ///
    /// # Logic
    /// 1. 安装 rustls 加密后端（已安装则跳过）。
    /// 2. 配置 10 秒超时。
    ///
    /// # Arguments
    /// * `config`: 推送通道配置，仅使用其中的 `api_base`。
    ///
    /// # Returns
    /// 成功返回客户端；底层 HTTP 客户端构造失败返回 RestError::Network。
    pub fn new(config: &StreamConfig) -> Result<Self, RestError> {
        ensure_crypto_provider();
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RestError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base: config.http_base(),
        })
    }

    /// # Summary
    /// 拉取当前持仓快照。
    ///
    /// # Returns
    /// 持仓快照列表（每项至少包含 `symbol`），失败返回 RestError。
    pub async fn fetch_positions(&self) -> Result<Vec<Record>, RestError> {
        self.get_json(POSITIONS_ROUTE).await
    }

    /// # Summary
    /// 拉取按策略分组的历史信号。
    ///
    /// # Returns
    /// 分组列表，失败返回 RestError。
    pub async fn fetch_signal_history(&self) -> Result<Vec<SignalHistoryGroup>, RestError> {
        self.get_json(SIGNAL_HISTORY_ROUTE).await
    }

    async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<T, RestError> {
        let url = format!("{}{}", self.base, route);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RestError::Status(resp.status().as_u16()));
        }

        resp.json()
            .await
            .map_err(|e| RestError::Parse(e.to_string()))
    }
}

/// # Summary
/// 将历史接口的分组列表转换为策略历史表。
///
/// # Logic
/// 1. 策略键为 `strategy`；显示名取 `strategy_name`，为空时退回策略键。
/// 2. 每组事件截断到历史上限，保持最新在前。
/// 3. 重复的策略键以后出现者为准。
pub fn to_history_map(groups: Vec<SignalHistoryGroup>) -> BTreeMap<String, StrategyHistory> {
    groups
        .into_iter()
        .map(|group| {
            let label = group
                .strategy_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| group.strategy.clone());
            let history = StrategyHistory::new(label, group.events);
            (group.strategy, history)
        })
        .collect()
}
