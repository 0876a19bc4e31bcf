//! 后端 REST 接口客户端，以及把接口数据同步进行情状态的后台任务。

pub mod client;
pub mod error;
pub mod sync;
