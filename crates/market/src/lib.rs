//! # `kawase-market` - 实时行情同步
//!
//! 持有唯一的推送连接，将收到的报文归约进 `MarketState`，并实现手动连接/断开与固定间隔的自动重连。
//!
//! - [`store::MarketStore`]：对外的聚合句柄，所有操作都投递到同一个事件循环中串行执行。
//! - [`manager::ConnectionManager`]：连接状态机，由事件循环独占。
//! - [`ws::TungsteniteTransport`]：基于 tokio-tungstenite 的传输层实现。

pub mod manager;
pub mod store;
pub mod ws;
