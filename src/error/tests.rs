//! # 错误处理测试

use crate::error::{Context, ErrorCategory, ProxyError};
use axum::http::StatusCode;
use std::error::Error;

#[test]
fn test_config_error_creation() {
    let err = ProxyError::config("端口不能为0");
    assert!(matches!(err, ProxyError::Config { .. }));
    assert_eq!(err.to_string(), "配置错误: 端口不能为0");
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn test_config_error_with_source() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "文件不存在");
    let err = ProxyError::config_with_source("配置文件加载失败", io_err);

    assert!(err.to_string().contains("配置错误: 配置文件加载失败"));
    assert!(err.source().is_some());
}

#[test]
fn test_rejection_status_codes() {
    assert_eq!(
        ProxyError::forbidden_target("https://evil.example").status_code(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        ProxyError::rate_limit("too many").status_code(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        ProxyError::BodyTooLarge { limit: 10 }.status_code(),
        StatusCode::PAYLOAD_TOO_LARGE
    );
    assert_eq!(
        ProxyError::upstream_unreachable("refused").status_code(),
        StatusCode::BAD_GATEWAY
    );
}

#[test]
fn test_error_codes() {
    assert_eq!(ProxyError::forbidden_target("x").error_code(), "forbidden");
    assert_eq!(
        ProxyError::upstream_unreachable("x").error_code(),
        "upstream_unreachable"
    );
}

#[test]
fn test_context_preserves_status() {
    let result: Result<(), ProxyError> = Err(ProxyError::forbidden_target("https://x"));
    let err = result.context("解析目标失败").unwrap_err();

    assert!(matches!(err, ProxyError::Context { .. }));
    assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(err.error_code(), "forbidden");
    assert!(err.to_string().starts_with("解析目标失败"));
}

#[test]
fn test_category() {
    assert_eq!(
        ProxyError::rate_limit("x").category(),
        ErrorCategory::Client
    );
    assert_eq!(
        ProxyError::upstream_timeout("x", 30).category(),
        ErrorCategory::Server
    );
}

#[test]
fn test_auto_conversion_from_io_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "文件不存在");
    let proxy_err: ProxyError = io_err.into();

    assert!(matches!(proxy_err, ProxyError::Io { .. }));
    assert!(proxy_err.to_string().contains("IO错误: 文件操作失败"));
}

#[test]
fn test_auto_conversion_from_toml_error() {
    let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
    let proxy_err: ProxyError = toml_err.into();

    assert!(matches!(proxy_err, ProxyError::Config { .. }));
    assert!(proxy_err.to_string().contains("配置错误: TOML解析失败"));
}

#[test]
fn test_error_macro() {
    let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
    let err = crate::error!(ServerStart, "无法绑定代理端口", io_err);
    assert!(matches!(err, ProxyError::ServerStart { .. }));
    assert!(err.source().is_some());
    assert_eq!(err.error_code(), "server_start_error");
}
