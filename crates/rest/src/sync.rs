use crate::client::{BackendClient, to_history_map};
use crate::error::RestError;
use kawase_market::store::MarketStore;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// # Summary
/// 持仓快照轮询任务。
///
/// # Invariants
/// - 只持有行情状态的弱引用，状态被销毁后任务自行退出。
/// - 拉取失败时保留现有持仓表，等待下一轮。
/// - 句柄被丢弃时任务随之终止。
pub struct PositionRefresher {
    task: JoinHandle<()>,
}

impl PositionRefresher {
    /// # Summary
    /// 启动轮询任务。
    ///
    /// # Logic
    /// 1. 立即拉取一次，此后按固定间隔拉取。
    /// 2. 成功则以快照整体替换持仓表。
    /// 3. 上一轮耗时超过间隔时顺延，不补发。
    ///
    /// # Arguments
    /// * `client`: 后端客户端。
    /// * `store`: 行情状态。
    /// * `every`: 轮询间隔。
    pub fn spawn(client: BackendClient, store: &Arc<MarketStore>, every: Duration) -> Self {
        let store = Arc::downgrade(store);
        let task = tokio::spawn(refresh_loop(client, store, every));
        info!("Position refresher started (every {:?})", every);
        Self { task }
    }

    pub fn stop(self) {
        self.task.abort();
        info!("Position refresher stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PositionRefresher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn refresh_loop(client: BackendClient, store: Weak<MarketStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let result = client.fetch_positions().await;

        let Some(store) = store.upgrade() else {
            debug!("Market store dropped; position refresher exiting");
            return;
        };
        match result {
            Ok(snapshots) => {
                debug!("Fetched {} position snapshots", snapshots.len());
                store.set_open_positions(snapshots);
            }
            Err(e) => warn!("Position refresh failed, keeping previous map: {}", e),
        }
    }
}

/// # Summary
/// 启动时一次性回填策略历史。
///
/// # Logic
/// 1. 拉取按策略分组的历史信号。
/// 2. 转换为策略历史表后整体写入状态。
///
/// # Returns
/// 成功返回回填的策略数；失败返回 RestError，状态保持不变。
pub async fn seed_strategy_history(
    client: &BackendClient,
    store: &MarketStore,
) -> Result<usize, RestError> {
    let groups = client.fetch_signal_history().await?;
    let history = to_history_map(groups);
    let count = history.len();
    store.set_strategy_history(history);
    info!("Seeded signal history for {} strategies", count);
    Ok(count)
}

/// # Summary
/// 回填策略历史后再发起推送连接。
///
/// # Logic
/// 1. 等待历史回填完成；失败只记录告警。
/// 2. 回填指令先于建连指令进入信箱，实时信号只会叠加在已回填的历史之上。
pub async fn seed_and_connect(client: &BackendClient, store: &MarketStore) {
    if let Err(e) = seed_strategy_history(client, store).await {
        warn!("Signal history seeding failed: {}", e);
    }
    store.connect();
}
