mod settings;
mod telemetry;

use futures::StreamExt;
use kawase_core::market::port::ConnectionStatus;
use kawase_core::market::state::MarketState;
use kawase_market::store::{MarketStore, StateStream};
use kawase_market::ws::TungsteniteTransport;
use kawase_rest::client::BackendClient;
use kawase_rest::sync::{PositionRefresher, seed_and_connect};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// # Summary
/// 应用启动入口，负责装配各组件并管理其生命周期。
///
/// # Logic
/// 1. 加载配置（第一个命令行参数可指定配置文件）并初始化日志。
/// 2. 实例化推送传输层与行情状态。
/// 3. 先回填策略历史（失败不致命）再发起连接，随后启动持仓轮询。
/// 4. 持续输出状态摘要，直到收到退出信号。
/// 5. 停止轮询并销毁行情状态。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = settings::load(path.as_deref())?;
    let _log_guard = telemetry::init_tracing(&config.log)?;
    info!("Kawase market sync starting...");

    // 2. 推送通道
    let transport = Arc::new(TungsteniteTransport::new());
    let store = MarketStore::new(&config, transport)?;

    // 3. REST 同步与建连
    let client = BackendClient::new(&config.stream)?;
    seed_and_connect(&client, &store).await;
    let refresher =
        PositionRefresher::spawn(client, &store, config.positions.refresh_interval());

    // 4. 状态摘要
    let reporter = tokio::spawn(report(store.updates(), store.watch_status()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");

    // 5. 清理
    refresher.stop();
    reporter.abort();
    store.dispose();
    Ok(())
}

async fn report(mut updates: StateStream, mut status: watch::Receiver<ConnectionStatus>) {
    loop {
        tokio::select! {
            Some(state) = updates.next() => log_summary(&state),
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(
                    "Connection {:?} (connected: {}, reconnect pending: {})",
                    current.phase, current.connected, current.reconnect_pending
                );
            }
            else => break,
        }
    }
}

fn log_summary(state: &MarketState) {
    let ticker = state
        .latest_ticker
        .as_ref()
        .and_then(|t| t.str_field("symbol"))
        .unwrap_or("-");
    info!(
        "Market state: ticker={} candles={} indicators={} signals={} position_events={} open_positions={} strategies={}",
        ticker,
        state.candles.len(),
        state.indicators.len(),
        state.signals.len(),
        state.position_events.len(),
        state.open_positions.len(),
        state.strategy_history.len()
    );
}
