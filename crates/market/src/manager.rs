use crate::store::{LoopEvent, StateSink};
use kawase_core::market::entity::Envelope;
use kawase_core::market::error::{DecodeError, TransportError};
use kawase_core::market::port::{
    CloseReason, ConnectionPhase, ConnectionStatus, Frame, StreamTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// # Summary
/// 单条连接上发生的事件，由连接泵投递回事件循环。
#[derive(Debug)]
pub(crate) enum SocketEvent {
    Opened,
    Frame(Frame),
    Closed,
    Error(TransportError),
}

/// # Summary
/// 当前活跃连接的句柄。
///
/// # Invariants
/// - 通过 `close` 发出关闭指令即视为解除处理器挂载：连接泵不再投递任何事件。
struct ActiveConnection {
    // 连接代数，用于识别过期事件
    generation: u64,
    // 向连接泵发送关闭指令
    close_tx: oneshot::Sender<CloseReason>,
}

impl ActiveConnection {
    fn close(self, reason: CloseReason) {
        if self.close_tx.send(reason).is_err() {
            debug!(
                "Connection {} pump already exited before close ({})",
                self.generation, reason
            );
        }
    }
}

/// 尚未触发的重连定时器。
struct ReconnectTimer {
    token: u64,
    task: JoinHandle<()>,
}

/// # Summary
/// 推送连接状态机。
///
/// # Invariants
/// - 由事件循环独占，所有方法同步执行完毕，不存在并发调用。
/// - 任意时刻至多一条活跃连接；来自旧代数连接的事件一律丢弃。
/// - 至多一个待触发的重连定时器。
pub struct ConnectionManager {
    // 推送通道地址
    url: String,
    // 固定重连间隔
    reconnect_delay: Duration,
    // 传输层驱动
    transport: Arc<dyn StreamTransport>,
    // 事件循环信箱，交给连接泵与定时器回投事件
    mailbox: mpsc::UnboundedSender<LoopEvent>,
    // 对外发布的连接状态
    status: watch::Sender<ConnectionStatus>,
    // 报文归约入口
    sink: StateSink,
    // 保持连接的意图，仅 connect/disconnect 修改
    stay_connected: bool,
    phase: ConnectionPhase,
    active: Option<ActiveConnection>,
    reconnect: Option<ReconnectTimer>,
    next_generation: u64,
    next_timer_token: u64,
}

impl ConnectionManager {
    /// # Summary
    /// 构造处于 `Disconnected` 阶段的状态机。
    ///
    /// # Arguments
    /// * `url`: 推送通道地址。
    /// * `reconnect_delay`: 重连间隔。
    /// * `transport`: 传输层驱动。
    /// * `mailbox`: 事件循环信箱发送端。
    /// * `status`: 连接状态发布端。
    /// * `sink`: 报文归约入口。
    pub(crate) fn new(
        url: String,
        reconnect_delay: Duration,
        transport: Arc<dyn StreamTransport>,
        mailbox: mpsc::UnboundedSender<LoopEvent>,
        status: watch::Sender<ConnectionStatus>,
        sink: StateSink,
    ) -> Self {
        Self {
            url,
            reconnect_delay,
            transport,
            mailbox,
            status,
            sink,
            stay_connected: false,
            phase: ConnectionPhase::Disconnected,
            active: None,
            reconnect: None,
            next_generation: 0,
            next_timer_token: 0,
        }
    }

    /// # Summary
    /// 建立（或重建）推送连接。
    ///
    /// # Logic
    /// 1. 已处于 `Connected` 时为空操作。
    /// 2. 记录保持连接的意图，取消待触发的重连定时器。
    /// 3. 若存在旧连接，先解除挂载再以 "reconnecting" 关闭，不产生任何状态变化。
    /// 4. 分配新代数并启动连接泵，进入 `Connecting`。
    pub(crate) fn connect(&mut self) {
        if self.phase == ConnectionPhase::Connected && self.active.is_some() {
            debug!("connect() ignored: already connected to {}", self.url);
            return;
        }

        self.stay_connected = true;
        self.cancel_reconnect();

        if let Some(stale) = self.active.take() {
            debug!("Replacing stale connection {}", stale.generation);
            stale.close(CloseReason::Reconnecting);
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let (close_tx, close_rx) = oneshot::channel();
        let pump = SocketPump {
            generation,
            url: self.url.clone(),
            transport: self.transport.clone(),
            mailbox: self.mailbox.clone(),
        };
        tokio::spawn(pump.run(close_rx));

        self.active = Some(ActiveConnection {
            generation,
            close_tx,
        });
        info!("Connecting to {} (connection {})", self.url, generation);
        self.transition(ConnectionPhase::Connecting);
    }

    /// # Summary
    /// 手动断开，并暂停自动重连直到下一次 `connect`。
    pub(crate) fn disconnect(&mut self) {
        info!("Manual disconnect from {}", self.url);
        self.teardown(CloseReason::ManualDisconnect);
    }

    /// 销毁前的最终断开。
    pub(crate) fn shutdown(&mut self) {
        info!("Shutting down connection manager for {}", self.url);
        self.teardown(CloseReason::Shutdown);
    }

    /// # Summary
    /// 处理连接泵投递的事件。
    ///
    /// # Logic
    /// 1. 代数与当前活跃连接不符的事件来自已解除挂载的连接，直接丢弃。
    /// 2. 按事件类型路由到对应处理器。
    ///
    /// # Arguments
    /// * `generation`: 事件所属连接代数。
    /// * `event`: 连接事件。
    pub(crate) fn on_socket_event(&mut self, generation: u64, event: SocketEvent) {
        let current = self.active.as_ref().map(|conn| conn.generation);
        if current != Some(generation) {
            debug!(
                "Dropping {:?} from detached connection {} (active: {:?})",
                event, generation, current
            );
            return;
        }

        match event {
            SocketEvent::Opened => self.on_open(),
            SocketEvent::Frame(frame) => self.on_frame(frame),
            SocketEvent::Closed => {
                info!("Connection {} closed by peer", generation);
                self.active = None;
                self.on_connection_lost();
            }
            SocketEvent::Error(err) => {
                warn!("Connection {} error: {}", generation, err);
                // 强制关闭，保证进入确定的重连流程
                if let Some(conn) = self.active.take() {
                    conn.close(CloseReason::Error);
                }
                self.on_connection_lost();
            }
        }
    }

    /// # Summary
    /// 重连定时器到期。
    ///
    /// # Logic
    /// 1. 令牌与当前定时器不符说明已被取消，忽略。
    /// 2. 意图仍为保持连接时重新执行 connect 流程。
    pub(crate) fn on_reconnect_due(&mut self, token: u64) {
        match &self.reconnect {
            Some(timer) if timer.token == token => {}
            _ => {
                debug!("Ignoring cancelled reconnect timer {}", token);
                return;
            }
        }
        self.reconnect = None;

        if self.stay_connected {
            info!("Reconnect timer fired, reconnecting to {}", self.url);
            self.connect();
        } else {
            self.publish_status();
        }
    }

    fn on_open(&mut self) {
        self.cancel_reconnect();
        info!("Connected to {}", self.url);
        self.transition(ConnectionPhase::Connected);
    }

    /// # Summary
    /// 解码并归约一帧数据。
    ///
    /// # Logic
    /// 1. 二进制帧按 UTF-8 解读，失败则丢弃。
    /// 2. 解码失败记录告警后丢弃，连接保持不变。
    /// 3. 成功则一次性归约进状态切片。
    fn on_frame(&mut self, frame: Frame) {
        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping malformed frame: {}", DecodeError::NotUtf8);
                    return;
                }
            },
        };

        match Envelope::decode(&text) {
            Ok(envelope) => {
                let kind = envelope.kind().to_string();
                if self.sink.apply(envelope) {
                    debug!("Applied {} envelope", kind);
                }
            }
            Err(err) => warn!("Dropping malformed envelope: {}", err),
        }
    }

    /// # Summary
    /// 连接关闭或出错后的统一处理。
    ///
    /// # Logic
    /// 1. 意图为断开时直接回到 `Disconnected`。
    /// 2. 否则标记未连接；若此前处于 `Connected`/`Connecting` 则安排重连（已有定时器时不重复安排）。
    /// 3. 进入 `Reconnecting`。
    fn on_connection_lost(&mut self) {
        if !self.stay_connected {
            self.transition(ConnectionPhase::Disconnected);
            return;
        }

        if matches!(
            self.phase,
            ConnectionPhase::Connected | ConnectionPhase::Connecting
        ) {
            self.schedule_reconnect();
        }
        self.transition(ConnectionPhase::Reconnecting);
    }

    fn teardown(&mut self, reason: CloseReason) {
        self.stay_connected = false;
        self.cancel_reconnect();
        if let Some(conn) = self.active.take() {
            conn.close(reason);
        }
        self.transition(ConnectionPhase::Disconnected);
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            return;
        }

        self.next_timer_token += 1;
        let token = self.next_timer_token;
        let delay = self.reconnect_delay;
        let mailbox = self.mailbox.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if mailbox.send(LoopEvent::ReconnectDue { token }).is_err() {
                debug!("Event loop stopped before reconnect timer {} fired", token);
            }
        });

        info!("Reconnecting to {} in {:?}", self.url, delay);
        self.reconnect = Some(ReconnectTimer { token, task });
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            debug!("Cancelling reconnect timer {}", timer.token);
            timer.task.abort();
        }
    }

    fn transition(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        self.publish_status();
    }

    /// 仅在状态实际变化时通知观察者。
    fn publish_status(&self) {
        let next = ConnectionStatus {
            connected: self.phase == ConnectionPhase::Connected,
            phase: self.phase,
            reconnect_pending: self.reconnect.is_some(),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// # Summary
/// 单条连接的后台读取任务。
///
/// # Invariants
/// - 只通过信箱与状态机交互，自身不持有任何共享状态。
/// - 收到关闭指令后以指定原因关闭连接并立即退出，此后不再投递事件。
struct SocketPump {
    generation: u64,
    url: String,
    transport: Arc<dyn StreamTransport>,
    mailbox: mpsc::UnboundedSender<LoopEvent>,
}

impl SocketPump {
    /// # Summary
    /// 建连并持续转发帧数据。
    ///
    /// # Logic
    /// 1. 建连期间若收到关闭指令，放弃建连直接退出。
    /// 2. 建连失败投递 Error；成功投递 Opened。
    /// 3. 循环读取帧：数据帧转发；对端关闭投递 Closed 后退出；读取出错投递 Error 并等待状态机的强制关闭指令。
    /// 4. 关闭指令优先于读取，保证解除挂载后不会再投递事件。
    async fn run(self, mut close_rx: oneshot::Receiver<CloseReason>) {
        let opened = tokio::select! {
            biased;
            _ = &mut close_rx => {
                debug!("Connection {} detached before open completed", self.generation);
                return;
            }
            result = self.transport.open(&self.url) => result,
        };

        let mut socket = match opened {
            Ok(socket) => socket,
            Err(err) => {
                self.emit(SocketEvent::Error(err));
                return;
            }
        };
        self.emit(SocketEvent::Opened);

        loop {
            tokio::select! {
                biased;
                reason = &mut close_rx => {
                    let reason = reason.unwrap_or(CloseReason::Shutdown);
                    socket.close(reason).await;
                    debug!("Connection {} closed locally ({})", self.generation, reason);
                    return;
                }
                frame = socket.next_frame() => match frame {
                    Some(Ok(frame)) => self.emit(SocketEvent::Frame(frame)),
                    Some(Err(err)) => {
                        self.emit(SocketEvent::Error(err));
                        let reason = (&mut close_rx).await.unwrap_or(CloseReason::Error);
                        socket.close(reason).await;
                        return;
                    }
                    None => {
                        self.emit(SocketEvent::Closed);
                        return;
                    }
                },
            }
        }
    }

    fn emit(&self, event: SocketEvent) {
        let event = LoopEvent::Socket {
            generation: self.generation,
            event,
        };
        if self.mailbox.send(event).is_err() {
            debug!("Event loop stopped; connection {} event dropped", self.generation);
        }
    }
}
