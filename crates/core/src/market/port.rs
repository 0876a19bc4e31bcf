use crate::market::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;

/// # Summary
/// 连接管理器的状态机阶段。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// # Summary
/// 对外可观测的连接状态。
///
/// # Invariants
/// - `connected` 为 true 当且仅当 `phase` 为 `Connected`。
/// - `reconnect_pending` 为 true 时一定处于 `Reconnecting`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub phase: ConnectionPhase,
    // 是否有尚未触发的重连定时器
    pub reconnect_pending: bool,
}

/// # Summary
/// 客户端主动关闭连接的原因，作为关闭帧的 reason 发送给对端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    // 新连接替换旧连接
    Reconnecting,
    // 用户手动断开
    ManualDisconnect,
    // 收到错误事件后强制关闭
    Error,
    // 客户端整体销毁
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Reconnecting => "reconnecting",
            CloseReason::ManualDisconnect => "manual disconnect",
            CloseReason::Error => "error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Summary
/// 从连接读取到的一帧数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// # Summary
/// 单条推送连接的行为契约。
///
/// # Invariants
/// - `next_frame` 返回 None 表示对端已关闭，之后不得再被调用。
/// - `close` 可在任意时刻调用且不得失败，重复调用为空操作。
#[async_trait]
pub trait StreamSocket: Send {
    /// # Summary
    /// 读取下一帧业务数据。
    ///
    /// # Logic
    /// 1. 透明处理 ping/pong 等控制帧。
    /// 2. 产出文本或二进制帧。
    ///
    /// # Returns
    /// 帧数据；错误返回 TransportError；连接关闭返回 None。
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    /// # Summary
    /// 以指定原因关闭连接。
    ///
    /// # Arguments
    /// * `reason`: 关闭原因。
    async fn close(&mut self, reason: CloseReason);
}

/// # Summary
/// 推送通道传输层接口（原始连接工厂）。
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// # Summary
    /// 建立一条新的推送连接。
    ///
    /// # Arguments
    /// * `url`: 完整的 WebSocket 地址。
    ///
    /// # Returns
    /// 成功返回已完成握手的连接。
    async fn open(&self, url: &str) -> Result<Box<dyn StreamSocket>, TransportError>;
}
