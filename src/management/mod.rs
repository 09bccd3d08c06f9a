//! # 管理API模块
//!
//! 可选的第二个监听端口，提供存活检查与运行信息

pub mod handlers;
pub mod response;
pub mod server;

pub use server::{AppState, ManagementServer, create_router};
