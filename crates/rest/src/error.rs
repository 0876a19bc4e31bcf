use thiserror::Error;

/// # Summary
/// REST 接口调用错误。
#[derive(Error, Debug)]
pub enum RestError {
    // 连接失败、超时或客户端构造失败
    #[error("Network error: {0}")]
    Network(String),
    // 后端返回非 2xx 状态码
    #[error("Unexpected HTTP status: {0}")]
    Status(u16),
    // 响应体不是预期的 JSON 结构
    #[error("Parse error: {0}")]
    Parse(String),
}
