//! # API Relay
//!
//! 面向 AI 服务的 HTTP 反向代理核心库：按客户端限流、上游目标白名单、
//! 凭证注入、请求头清洗与请求体重新序列化。

pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod management;
pub mod proxy;
pub mod server_setup;

pub use config::AppConfig;
pub use error::{ProxyError, Result};
