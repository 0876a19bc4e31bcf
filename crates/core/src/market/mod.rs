pub mod entity;
pub mod error;
pub mod history;
pub mod port;
pub mod state;
