//! # `kawase-core` - 行情同步客户端的领域核心
//!
//! 定义推送通道的报文信封、各状态切片及其归约逻辑、传输层端口与全局配置。
//! 本 crate 不包含任何 I/O 实现，具体的连接管理与 WebSocket 驱动位于 `kawase-market`。

pub mod common;
pub mod config;
pub mod market;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
