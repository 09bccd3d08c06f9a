//! # 管理接口处理器

pub mod system;

pub use system::{get_system_info, health_handler, ping_handler};
