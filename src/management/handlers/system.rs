//! # 系统信息处理器

use crate::management::response;
use crate::management::server::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Serialize)]
struct SystemInfo {
    service: ServiceInfo,
    runtime: RuntimeInfo,
    proxy: ProxyInfo,
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct RuntimeInfo {
    started_at: String,
    uptime_seconds: u64,
    uptime: String,
}

#[derive(Serialize)]
struct ProxyInfo {
    listen: String,
    default_target: String,
    target_header: String,
    allow_list_mode: String,
    allowed_targets: Vec<String>,
    credentials: Vec<CredentialInfo>,
    rate_limit: RateLimitInfo,
}

/// 凭证规则概览，不包含密钥
#[derive(Serialize)]
struct CredentialInfo {
    host: String,
    header: String,
    configured: bool,
}

#[derive(Serialize)]
struct RateLimitInfo {
    window_secs: u64,
    max_requests: u32,
    tracked_clients: usize,
}

/// 存活检查
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ping_handler() -> &'static str {
    "pong"
}

/// 获取系统信息
pub async fn get_system_info(State(state): State<AppState>) -> axum::response::Response {
    let policy = &state.policy;
    let uptime_seconds = state.uptime().as_secs();

    let system_info = SystemInfo {
        service: ServiceInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        },
        runtime: RuntimeInfo {
            started_at: state.started_at.to_rfc3339(),
            uptime_seconds,
            uptime: format_uptime(uptime_seconds),
        },
        proxy: ProxyInfo {
            listen: state.config.server.bind_address(),
            default_target: policy.default_target.to_string(),
            target_header: policy.target_header.to_string(),
            allow_list_mode: policy.allow_list.mode.to_string(),
            allowed_targets: policy
                .allow_list
                .entries
                .iter()
                .map(ToString::to_string)
                .collect(),
            credentials: policy
                .credentials
                .iter()
                .map(|rule| CredentialInfo {
                    host: rule.host_pattern.clone(),
                    header: rule.descriptor.header_name.to_string(),
                    configured: rule.descriptor.is_configured(),
                })
                .collect(),
            rate_limit: RateLimitInfo {
                window_secs: policy.rate_limit.window.as_secs(),
                max_requests: policy.rate_limit.max_requests,
                tracked_clients: state.limiter.tracked_clients(),
            },
        },
    };

    response::success(system_info)
}

/// 格式化运行时间为可读字符串
fn format_uptime(uptime_seconds: u64) -> String {
    let days = uptime_seconds / 86_400;
    let hours = (uptime_seconds % 86_400) / 3_600;
    let minutes = (uptime_seconds % 3_600) / 60;
    let seconds = uptime_seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m {seconds}s")
    }
}
