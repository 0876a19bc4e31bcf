use crate::manager::{ConnectionManager, SocketEvent};
use futures::Stream;
use kawase_core::common::Record;
use kawase_core::config::{AppConfig, ConfigError};
use kawase_core::market::entity::Envelope;
use kawase_core::market::port::{ConnectionStatus, StreamTransport};
use kawase_core::market::state::{MarketState, SnapshotPolicy, StrategyHistory};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// # Summary
/// 状态快照流别名，使用动态分发的异步流。
pub type StateStream = Pin<Box<dyn Stream<Item = MarketState> + Send>>;

/// # Summary
/// 外部可调用的操作。
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Dispose,
    SetOpenPositions(Vec<Record>),
    SetStrategyHistory(BTreeMap<String, StrategyHistory>),
}

/// # Summary
/// 事件循环信箱中的全部事件类型。
///
/// # Invariants
/// - 所有事件在同一任务中按到达顺序逐个处理，处理过程中不会交错。
#[derive(Debug)]
pub(crate) enum LoopEvent {
    Command(Command),
    Socket { generation: u64, event: SocketEvent },
    ReconnectDue { token: u64 },
}

/// # Summary
/// 状态切片的唯一写入口。
///
/// # Invariants
/// - 每次调用在 watch 通道内部完成整次迁移，观察者只会看到迁移前或迁移后的完整状态。
/// - 状态未变化时不发出通知。
#[derive(Clone)]
pub(crate) struct StateSink {
    tx: Arc<watch::Sender<MarketState>>,
    policy: SnapshotPolicy,
}

impl StateSink {
    fn new(tx: watch::Sender<MarketState>, policy: SnapshotPolicy) -> Self {
        Self {
            tx: Arc::new(tx),
            policy,
        }
    }

    pub(crate) fn apply(&self, envelope: Envelope) -> bool {
        self.tx.send_if_modified(|state| state.apply(envelope))
    }

    fn replace_open_positions(&self, snapshots: Vec<Record>) -> bool {
        let policy = self.policy;
        self.tx
            .send_if_modified(|state| state.replace_open_positions(snapshots, policy))
    }

    fn replace_strategy_history(&self, history: BTreeMap<String, StrategyHistory>) -> bool {
        self.tx
            .send_if_modified(|state| state.replace_strategy_history(history))
    }
}

/// # Summary
/// 行情同步客户端的聚合根，对外可观测的全部状态与操作入口。
///
/// # Invariants
/// - 所有写操作只投递指令，由后台事件循环串行执行，调用方永远不会收到错误。
/// - 批量替换操作不触碰连接状态。
/// - 最后一个句柄被丢弃时自动销毁：断开连接并停止事件循环。
pub struct MarketStore {
    // 事件循环信箱
    mailbox: mpsc::UnboundedSender<LoopEvent>,
    // 状态切片订阅端
    state: watch::Receiver<MarketState>,
    // 连接状态订阅端
    status: watch::Receiver<ConnectionStatus>,
}

impl MarketStore {
    /// # Summary
    /// 创建聚合根并启动事件循环。
    ///
    /// # Logic
    /// 1. 由配置推导推送通道地址。
    /// 2. 创建信箱与两个 watch 通道（状态切片、连接状态）。
    /// 3. 构造连接状态机，将其与归约入口一并移交给后台事件循环。
    ///
    /// # Arguments
    /// * `config`: 应用配置。
    /// * `transport`: 传输层驱动。
    ///
    /// # Returns
    /// 成功返回共享句柄；推送地址无法推导时返回 ConfigError。
    pub fn new(
        config: &AppConfig,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Arc<Self>, ConfigError> {
        let url = config.stream.ws_url()?;
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(MarketState::default());
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let sink = StateSink::new(state_tx, config.positions.snapshot_policy);
        let manager = ConnectionManager::new(
            url,
            config.stream.reconnect_delay(),
            transport,
            mailbox.clone(),
            status_tx,
            sink.clone(),
        );
        tokio::spawn(run_event_loop(manager, sink, inbox));

        Ok(Arc::new(Self {
            mailbox,
            state: state_rx,
            status: status_rx,
        }))
    }

    /// 建立推送连接；已连接时为空操作。
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// 手动断开，暂停自动重连直到下一次 `connect`。
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// 断开连接并停止事件循环，此后所有操作被忽略。
    pub fn dispose(&self) {
        self.send(Command::Dispose);
    }

    /// # Summary
    /// 用权威快照整体替换持仓表。
    ///
    /// # Arguments
    /// * `snapshots`: 持仓快照列表，按 `symbol` 建索引。
    pub fn set_open_positions(&self, snapshots: Vec<Record>) {
        self.send(Command::SetOpenPositions(snapshots));
    }

    /// # Summary
    /// 整体替换策略历史表，用于在实时信号到达前回填历史。
    ///
    /// # Arguments
    /// * `history`: 策略键 -> 历史。
    pub fn set_strategy_history(&self, history: BTreeMap<String, StrategyHistory>) {
        self.send(Command::SetStrategyHistory(history));
    }

    /// 当前状态切片的完整副本。
    pub fn snapshot(&self) -> MarketState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<MarketState> {
        self.state.clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// # Summary
    /// 订阅状态变化流。
    ///
    /// # Logic
    /// 1. 先产出当前状态。
    /// 2. 之后每次原子迁移产出一次完整快照；观察者处理较慢时中间状态会被合并。
    ///
    /// # Returns
    /// 异步状态流，事件循环停止后结束。
    pub fn updates(&self) -> StateStream {
        let mut rx = self.state.clone();
        let stream = async_stream::stream! {
            let current = rx.borrow_and_update().clone();
            yield current;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        };
        Box::pin(stream)
    }

    fn send(&self, command: Command) {
        if self.mailbox.send(LoopEvent::Command(command)).is_err() {
            debug!("Market store disposed; command ignored");
        }
    }
}

impl Drop for MarketStore {
    fn drop(&mut self) {
        if self.mailbox.send(LoopEvent::Command(Command::Dispose)).is_err() {
            debug!("Market store event loop already stopped");
        }
    }
}

/// # Summary
/// 事件循环主体。
///
/// # Logic
/// 1. 逐个取出信箱中的事件并同步处理完毕。
/// 2. 收到 Dispose 后关闭连接并退出。
async fn run_event_loop(
    mut manager: ConnectionManager,
    sink: StateSink,
    mut inbox: mpsc::UnboundedReceiver<LoopEvent>,
) {
    info!("Market store event loop started");
    while let Some(event) = inbox.recv().await {
        match event {
            LoopEvent::Command(Command::Connect) => manager.connect(),
            LoopEvent::Command(Command::Disconnect) => manager.disconnect(),
            LoopEvent::Command(Command::Dispose) => {
                manager.shutdown();
                break;
            }
            LoopEvent::Command(Command::SetOpenPositions(snapshots)) => {
                let count = snapshots.len();
                if sink.replace_open_positions(snapshots) {
                    debug!("Open positions replaced from {} snapshots", count);
                }
            }
            LoopEvent::Command(Command::SetStrategyHistory(history)) => {
                let count = history.len();
                if sink.replace_strategy_history(history) {
                    debug!("Strategy history replaced ({} strategies)", count);
                }
            }
            LoopEvent::Socket { generation, event } => manager.on_socket_event(generation, event),
            LoopEvent::ReconnectDue { token } => manager.on_reconnect_due(token),
        }
    }
    info!("Market store event loop stopped");
}
