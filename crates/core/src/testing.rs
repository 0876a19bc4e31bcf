//! 测试辅助：可脚本化的内存传输层。

use crate::market::error::TransportError;
use crate::market::port::{CloseReason, Frame, StreamSocket, StreamTransport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

enum Scripted {
    Frame(Frame),
    Error(TransportError),
    Close,
}

/// # Summary
/// 内存版 StreamTransport，记录每一次建连并允许测试脚本化对端行为。
///
/// # Invariants
/// - 每次成功的 `open` 产生一个新的 `MockSocketHandle`，按建连顺序保存。
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    sockets: Vec<MockSocketHandle>,
    urls: Vec<String>,
    pending_failures: usize,
}

/// # Summary
/// 测试侧持有的单条连接句柄，扮演服务端。
#[derive(Clone)]
pub struct MockSocketHandle {
    frames: mpsc::UnboundedSender<Scripted>,
    closed_by_client: Arc<Mutex<Option<CloseReason>>>,
    ended_by_server: Arc<AtomicBool>,
}

struct MockSocket {
    frames: mpsc::UnboundedReceiver<Scripted>,
    closed_by_client: Arc<Mutex<Option<CloseReason>>>,
    ended_by_server: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 令接下来的 `n` 次建连失败。
    pub fn fail_next_opens(&self, n: usize) {
        lock(&self.inner).pending_failures = n;
    }

    /// 建连尝试次数（含失败）。
    pub fn attempts(&self) -> usize {
        lock(&self.inner).urls.len()
    }

    /// 成功建立的连接数。
    pub fn open_count(&self) -> usize {
        lock(&self.inner).sockets.len()
    }

    /// 仍然存活（双方都未关闭）的连接数。
    pub fn live_count(&self) -> usize {
        lock(&self.inner)
            .sockets
            .iter()
            .filter(|s| s.is_live())
            .count()
    }

    pub fn socket(&self, index: usize) -> Option<MockSocketHandle> {
        lock(&self.inner).sockets.get(index).cloned()
    }

    pub fn last_socket(&self) -> Option<MockSocketHandle> {
        lock(&self.inner).sockets.last().cloned()
    }

    pub fn urls(&self) -> Vec<String> {
        lock(&self.inner).urls.clone()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn StreamSocket>, TransportError> {
        let mut state = lock(&self.inner);
        state.urls.push(url.to_string());
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(TransportError::Connect("scripted failure".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed_by_client = Arc::new(Mutex::new(None));
        let ended_by_server = Arc::new(AtomicBool::new(false));
        state.sockets.push(MockSocketHandle {
            frames: tx,
            closed_by_client: closed_by_client.clone(),
            ended_by_server: ended_by_server.clone(),
        });

        Ok(Box::new(MockSocket {
            frames: rx,
            closed_by_client,
            ended_by_server,
        }))
    }
}

impl MockSocketHandle {
    pub fn push_text(&self, text: impl Into<String>) {
        self.script(Scripted::Frame(Frame::Text(text.into())));
    }

    pub fn push_binary(&self, bytes: Vec<u8>) {
        self.script(Scripted::Frame(Frame::Binary(bytes)));
    }

    pub fn push_error(&self, message: &str) {
        self.script(Scripted::Error(TransportError::Protocol(message.to_string())));
    }

    /// 模拟服务端关闭连接。
    pub fn close_from_server(&self) {
        self.script(Scripted::Close);
    }

    /// 客户端关闭该连接时携带的原因。
    pub fn close_reason(&self) -> Option<CloseReason> {
        *lock(&self.closed_by_client)
    }

    pub fn is_live(&self) -> bool {
        self.close_reason().is_none() && !self.ended_by_server.load(Ordering::SeqCst)
    }

    fn script(&self, item: Scripted) {
        // 客户端已丢弃连接时脚本无人消费，直接忽略
        if self.frames.send(item).is_err() {
            tracing::debug!("mock socket already dropped by client");
        }
    }
}

#[async_trait]
impl StreamSocket for MockSocket {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        match self.frames.recv().await {
            Some(Scripted::Frame(frame)) => Some(Ok(frame)),
            Some(Scripted::Error(err)) => Some(Err(err)),
            Some(Scripted::Close) | None => {
                self.ended_by_server.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    async fn close(&mut self, reason: CloseReason) {
        let mut closed = lock(&self.closed_by_client);
        if closed.is_none() {
            *closed = Some(reason);
        }
    }
}
