use crate::common::Record;
use crate::market::error::DecodeError;
use serde_json::Value;

/// 缺少周期或策略标识时使用的占位键。
pub const UNKNOWN_KEY: &str = "unknown";

/// # Summary
/// 推送通道上的报文信封，按 `type` 判别的和类型。
///
/// # Invariants
/// - 五种已知类型的负载必定是 JSON 对象。
/// - 未知类型解码为 `Unrecognized`，由归约层忽略，保持前向兼容。
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Ticker(Record),
    Candle(TimeframedData),
    Indicator(TimeframedData),
    Signal(SignalData),
    Position(PositionEvent),
    Unrecognized { kind: String },
}

/// # Summary
/// 按周期归档的负载（K 线与指标共用）。
#[derive(Debug, Clone, PartialEq)]
pub struct TimeframedData {
    // 归档键：data.timeframe 为字符串时取其值，否则为 "unknown"
    pub timeframe: String,
    // 原始负载
    pub data: Record,
}

/// # Summary
/// 交易信号负载。
#[derive(Debug, Clone, PartialEq)]
pub struct SignalData {
    // 策略键：data.strategy，缺失时为 "unknown"
    pub strategy: String,
    // 展示名称：data.strategy_name，缺失时回退为策略键
    pub label: String,
    pub data: Record,
}

/// # Summary
/// 持仓生命周期事件。
#[derive(Debug, Clone, PartialEq)]
pub struct PositionEvent {
    // 非空的品种代码，空串或缺失时为 None
    pub symbol: Option<String>,
    pub kind: PositionEventKind,
    pub data: Record,
}

/// # Summary
/// 持仓事件类型，来自 data.type（大小写不敏感）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionEventKind {
    Open,
    TakeProfit,
    StopLoss,
    ManualClose,
    Reverse,
    // 其余取值，保留大写后的原文
    Other(String),
}

impl PositionEventKind {
    /// # Summary
    /// 解析事件类型字符串。
    ///
    /// # Logic
    /// 1. 统一转为大写。
    /// 2. 匹配已知的开仓与平仓类型，其余归入 Other。
    pub fn parse(raw: &str) -> Self {
        let upper = raw.to_uppercase();
        match upper.as_str() {
            "OPEN" => Self::Open,
            "TAKE_PROFIT" => Self::TakeProfit,
            "STOP_LOSS" => Self::StopLoss,
            "MANUAL_CLOSE" => Self::ManualClose,
            "REVERSE" => Self::Reverse,
            _ => Self::Other(upper),
        }
    }

    /// 该事件是否意味着持仓已了结。
    pub fn closes_position(&self) -> bool {
        matches!(
            self,
            Self::TakeProfit | Self::StopLoss | Self::ManualClose | Self::Reverse
        )
    }
}

impl Envelope {
    /// # Summary
    /// 从文本帧解码报文信封。
    ///
    /// # Logic
    /// 1. 解析 JSON，顶层不是对象（数组、标量等）时视为解码失败。
    /// 2. 读取 `type` 与 `data`，`data` 缺失按 null 处理。
    /// 3. `type` 缺失或不是字符串时视为解码失败。
    /// 4. 交由 `from_parts` 按类型构造强类型负载。
    ///
    /// # Arguments
    /// * `text`: 收到的原始文本。
    ///
    /// # Returns
    /// 成功返回 Envelope（未知类型为 `Unrecognized`），失败返回 DecodeError。
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
            return Err(DecodeError::NotAnEnvelope);
        };
        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(DecodeError::MissingType),
        };
        let data = fields.remove("data").unwrap_or(Value::Null);
        Self::from_parts(&kind, data)
    }

    /// # Summary
    /// 根据类型标签与负载构造信封。
    ///
    /// # Logic
    /// 1. 未知类型直接返回 `Unrecognized`，不检查负载。
    /// 2. 已知类型要求负载为 JSON 对象。
    /// 3. 提取归档所需的键（周期、策略、品种、事件类型），负载本身原样保留。
    pub fn from_parts(kind: &str, data: Value) -> Result<Self, DecodeError> {
        if !matches!(
            kind,
            "ticker" | "candle" | "indicator" | "signal" | "position"
        ) {
            return Ok(Self::Unrecognized {
                kind: kind.to_string(),
            });
        }

        let data = Record::try_from(data).map_err(|_| DecodeError::NotAnObject {
            kind: kind.to_string(),
        })?;

        let envelope = match kind {
            "ticker" => Self::Ticker(data),
            "candle" => Self::Candle(TimeframedData::new(data)),
            "indicator" => Self::Indicator(TimeframedData::new(data)),
            "signal" => Self::Signal(SignalData::new(data)),
            _ => Self::Position(PositionEvent::new(data)),
        };
        Ok(envelope)
    }

    /// 报文的类型标签，用于日志。
    pub fn kind(&self) -> &str {
        match self {
            Self::Ticker(_) => "ticker",
            Self::Candle(_) => "candle",
            Self::Indicator(_) => "indicator",
            Self::Signal(_) => "signal",
            Self::Position(_) => "position",
            Self::Unrecognized { kind } => kind.as_str(),
        }
    }
}

impl TimeframedData {
    fn new(data: Record) -> Self {
        let timeframe = data.str_field("timeframe").unwrap_or(UNKNOWN_KEY).to_string();
        Self { timeframe, data }
    }
}

impl SignalData {
    fn new(data: Record) -> Self {
        let strategy = data.str_field("strategy").unwrap_or(UNKNOWN_KEY).to_string();
        let label = data
            .str_field("strategy_name")
            .map(str::to_string)
            .unwrap_or_else(|| strategy.clone());
        Self {
            strategy,
            label,
            data,
        }
    }
}

impl PositionEvent {
    fn new(data: Record) -> Self {
        let symbol = data
            .str_field("symbol")
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let kind = PositionEventKind::parse(data.str_field("type").unwrap_or_default());
        Self { symbol, kind, data }
    }
}
