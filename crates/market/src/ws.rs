use async_trait::async_trait;
use futures::StreamExt;
use kawase_core::common::tls::ensure_crypto_provider;
use kawase_core::market::error::TransportError;
use kawase_core::market::port::{CloseReason, Frame, StreamSocket, StreamTransport};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// # Summary
/// 基于 tokio-tungstenite 的推送通道传输层实现。
///
/// # Invariants
/// - 构造时确保 rustls 加密后端已安装，wss 地址可直接使用。
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    // 建连（含握手）超时
    connect_timeout: Duration,
}

impl TungsteniteTransport {
    /// # Summary
    /// 创建传输层实例。
    ///
    /// # Logic
    /// 1. 安装 rustls 加密后端（已安装则跳过）。
    /// 2. 配置 10 秒建连超时。
    pub fn new() -> Self {
        ensure_crypto_provider();
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for TungsteniteTransport {
    /// # Summary
    /// 发起 WebSocket 握手。
    ///
    /// # Logic
    /// 1. 在超时限制内执行 connect_async。
    /// 2. 握手失败或超时映射为 TransportError::Connect。
    async fn open(&self, url: &str) -> Result<Box<dyn StreamSocket>, TransportError> {
        let (stream, response) =
            match tokio::time::timeout(self.connect_timeout, connect_async(url)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
                Err(_) => {
                    return Err(TransportError::Connect(format!(
                        "handshake timed out after {:?}",
                        self.connect_timeout
                    )));
                }
            };

        debug!("WebSocket handshake with {} returned {}", url, response.status());
        Ok(Box::new(TungsteniteSocket {
            stream,
            closed: false,
        }))
    }
}

/// 单条 WebSocket 连接。
struct TungsteniteSocket {
    stream: WsStream,
    // 任一方已发起关闭
    closed: bool,
}

#[async_trait]
impl StreamSocket for TungsteniteSocket {
    /// # Summary
    /// 读取下一帧业务数据。
    ///
    /// # Logic
    /// 1. ping/pong 由 tungstenite 自动应答，此处跳过。
    /// 2. 收到关闭帧或流结束视为对端关闭。
    /// 3. 在已关闭的连接上读写映射为 TransportError::Closed。
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        if self.closed {
            return None;
        }

        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    self.closed = true;
                    return Some(Err(TransportError::Closed));
                }
                Some(Err(e)) => return Some(Err(TransportError::Protocol(e.to_string()))),
                None => {
                    self.closed = true;
                    return None;
                }
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Message::Binary(bytes) => return Some(Ok(Frame::Binary(bytes.to_vec()))),
                Message::Close(frame) => {
                    debug!("Peer sent close frame: {:?}", frame);
                    self.closed = true;
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    /// # Summary
    /// 发送关闭帧。
    ///
    /// # Logic
    /// 1. 已关闭时为空操作。
    /// 2. 错误原因使用 1011，其余使用 1000；reason 文本即关闭原因。
    /// 3. 关闭握手失败只记录日志。
    async fn close(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;

        let code = match reason {
            CloseReason::Error => CloseCode::Error,
            _ => CloseCode::Normal,
        };
        let frame = CloseFrame {
            code,
            reason: reason.as_str().to_string().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("WebSocket close handshake failed: {}", e);
        }
    }
}
