use thiserror::Error;

/// # Summary
/// 推送报文解码错误枚举。
///
/// # Invariants
/// - 解码失败只影响单条报文，调用方记录日志后丢弃，不得中断连接。
#[derive(Error, Debug)]
pub enum DecodeError {
    // 报文不是合法的 JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    // 顶层不是 JSON 对象
    #[error("Envelope is not a JSON object")]
    NotAnEnvelope,
    // 顶层缺少字符串类型的 type 字段
    #[error("Envelope has no string `type` field")]
    MissingType,
    // 已知类型的 data 不是 JSON 对象
    #[error("Envelope `{kind}` carries non-object data")]
    NotAnObject { kind: String },
    // 二进制帧无法按 UTF-8 解读
    #[error("Binary frame is not valid UTF-8")]
    NotUtf8,
}

/// # Summary
/// 传输层错误枚举，覆盖建连、协议及对端关闭等场景。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    // 建立连接失败（DNS、TCP、握手）
    #[error("Connect failed: {0}")]
    Connect(String),
    // 连接建立后的协议层错误
    #[error("Protocol error: {0}")]
    Protocol(String),
    // 连接已被关闭
    #[error("Connection closed")]
    Closed,
}
