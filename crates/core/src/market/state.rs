use crate::common::Record;
use crate::market::entity::{Envelope, PositionEvent, PositionEventKind, SignalData};
use crate::market::history::{BoundedHistory, HISTORY_CAP};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// # Summary
/// 权威持仓快照为空列表时的处理策略。
///
/// # Invariants
/// - 非空快照在任何策略下都完全覆盖由事件推导出的持仓表。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    // 空列表即"当前无持仓"，清空持仓表
    #[default]
    Authoritative,
    // 空列表视为快照不可用，保留事件推导出的持仓表
    KeepDerivedWhenEmpty,
}

/// # Summary
/// 单个策略的信号历史。
///
/// # Invariants
/// - `events` 最新在前，长度不超过 `HISTORY_CAP`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyHistory {
    // 展示名称
    pub label: String,
    // 信号列表
    pub events: BoundedHistory<Record>,
}

impl StrategyHistory {
    /// 由最新在前的事件列表构造，超出上限的旧事件被丢弃。
    pub fn new(label: impl Into<String>, events: Vec<Record>) -> Self {
        Self {
            label: label.into(),
            events: BoundedHistory::from_newest_first(events, HISTORY_CAP),
        }
    }
}

/// # Summary
/// 行情同步客户端的全部状态切片。
///
/// # Invariants
/// - 只能通过 `apply` 及两个批量替换方法修改，每次调用即一次完整的状态迁移。
/// - `open_positions` 中的每个品种都对应一条尚未被平仓事件匹配的 OPEN，或来自权威快照。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketState {
    // 最新报价，整体替换
    pub latest_ticker: Option<Record>,
    // 周期 -> 最新 K 线
    pub candles: BTreeMap<String, Record>,
    // 周期 -> 最新指标集
    pub indicators: BTreeMap<String, Record>,
    // 信号日志
    pub signals: BoundedHistory<Record>,
    // 持仓事件日志
    pub position_events: BoundedHistory<Record>,
    // 品种 -> 最新开仓快照
    pub open_positions: BTreeMap<String, Record>,
    // 策略键 -> 信号历史
    pub strategy_history: BTreeMap<String, StrategyHistory>,
}

impl MarketState {
    /// # Summary
    /// 将一条报文归约进状态。
    ///
    /// # Logic
    /// 1. 按报文类型路由到唯一的归约分支。
    /// 2. 未识别类型不做任何修改。
    ///
    /// # Arguments
    /// * `envelope`: 已解码的报文。
    ///
    /// # Returns
    /// 状态是否发生变化；为 false 时调用方不应发出通知。
    pub fn apply(&mut self, envelope: Envelope) -> bool {
        match envelope {
            Envelope::Ticker(data) => {
                self.latest_ticker = Some(data);
            }
            Envelope::Candle(candle) => {
                self.candles.insert(candle.timeframe, candle.data);
            }
            Envelope::Indicator(indicator) => {
                self.indicators.insert(indicator.timeframe, indicator.data);
            }
            Envelope::Signal(signal) => self.apply_signal(signal),
            Envelope::Position(event) => self.apply_position(event),
            Envelope::Unrecognized { kind } => {
                debug!("Ignoring unrecognized envelope type {}", kind);
                return false;
            }
        }
        true
    }

    /// # Summary
    /// 信号归约。
    ///
    /// # Logic
    /// 1. 插入全局信号日志队首。
    /// 2. 定位（或创建）所属策略的历史，用本次报文携带的名称刷新展示名，并插入队首。
    fn apply_signal(&mut self, signal: SignalData) {
        let SignalData {
            strategy,
            label,
            data,
        } = signal;

        self.signals.push_front(data.clone());

        let history = self
            .strategy_history
            .entry(strategy)
            .or_insert_with(|| StrategyHistory::new(label.clone(), Vec::new()));
        history.label = label;
        history.events.push_front(data);
    }

    /// # Summary
    /// 持仓事件归约。
    ///
    /// # Logic
    /// 1. 插入持仓事件日志队首。
    /// 2. 品种为空时到此为止。
    /// 3. OPEN 写入持仓表；四种平仓类型移除该品种；其余类型不影响持仓表。
    fn apply_position(&mut self, event: PositionEvent) {
        let PositionEvent { symbol, kind, data } = event;
        self.position_events.push_front(data.clone());

        let Some(symbol) = symbol else {
            return;
        };

        if kind == PositionEventKind::Open {
            self.open_positions.insert(symbol, data);
        } else if kind.closes_position() {
            self.open_positions.remove(&symbol);
        }
    }

    /// # Summary
    /// 用权威快照整体替换持仓表。
    ///
    /// # Logic
    /// 1. 空列表且策略为 `KeepDerivedWhenEmpty` 时保持原状。
    /// 2. 以 `symbol` 为键重建持仓表，缺少字符串 symbol 的条目被跳过；重复品种以后出现者为准。
    /// 3. 旧表中不在快照内的品种全部丢弃。
    ///
    /// # Arguments
    /// * `snapshots`: 后端返回的持仓快照列表。
    /// * `policy`: 空列表处理策略。
    ///
    /// # Returns
    /// 持仓表是否发生变化。
    pub fn replace_open_positions(
        &mut self,
        snapshots: Vec<Record>,
        policy: SnapshotPolicy,
    ) -> bool {
        if snapshots.is_empty() && policy == SnapshotPolicy::KeepDerivedWhenEmpty {
            return false;
        }

        let mut rebuilt = BTreeMap::new();
        for snapshot in snapshots {
            match snapshot.str_field("symbol").map(str::to_string) {
                Some(symbol) => {
                    rebuilt.insert(symbol, snapshot);
                }
                None => debug!("Skipping position snapshot without symbol"),
            }
        }

        if rebuilt == self.open_positions {
            return false;
        }
        self.open_positions = rebuilt;
        true
    }

    /// # Summary
    /// 整体替换策略历史表，用于启动时的一次性回填。
    ///
    /// # Returns
    /// 历史表是否发生变化。
    pub fn replace_strategy_history(
        &mut self,
        history: BTreeMap<String, StrategyHistory>,
    ) -> bool {
        if history == self.strategy_history {
            return false;
        }
        self.strategy_history = history;
        true
    }
}
