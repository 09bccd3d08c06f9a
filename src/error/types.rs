//! # 错误类型定义

use axum::http::StatusCode;
use thiserror::Error;

/// 应用主要错误类型
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 目标上游不在允许列表内（或无法解析）
    #[error("目标上游被拒绝: {target}")]
    ForbiddenTarget { target: String },

    /// 速率限制错误
    #[error("速率限制: {message}")]
    RateLimitExceeded { message: String },

    /// 请求体超过配置上限
    #[error("请求体过大: 上限 {limit} 字节")]
    BodyTooLarge { limit: usize },

    /// 客户端请求无法处理
    #[error("请求无效: {message}")]
    BadRequest {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 上游不可达（连接失败、DNS 失败等）
    #[error("上游不可达: {message}")]
    UpstreamUnreachable {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 上游响应超时
    #[error("上游超时: {message}")]
    UpstreamTimeout {
        message: String,
        timeout_seconds: u64,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 网络通信错误
    #[error("网络错误: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// IO相关错误
    #[error("IO错误: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// 服务器启动错误
    #[error("服务器启动错误: {message}")]
    ServerStart {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 附带上下文的错误
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ProxyError>,
    },
}

impl ProxyError {
    /// 将错误转换为HTTP状态码
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ForbiddenTarget { .. } => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamUnreachable { .. } | Self::Network { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Context { source, .. } => source.status_code(),
            Self::Config { .. } | Self::Io { .. } | Self::ServerStart { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 对外暴露的错误代码
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config_error",
            Self::ForbiddenTarget { .. } => "forbidden",
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::BodyTooLarge { .. } => "payload_too_large",
            Self::BadRequest { .. } => "bad_request",
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::Network { .. } => "network_error",
            Self::Io { .. } => "io_error",
            Self::ServerStart { .. } => "server_start_error",
            Self::Internal { .. } => "internal_error",
            Self::Context { source, .. } => source.error_code(),
        }
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带源错误的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建目标拒绝错误
    pub fn forbidden_target<T: Into<String>>(target: T) -> Self {
        Self::ForbiddenTarget {
            target: target.into(),
        }
    }

    /// 创建速率限制错误
    pub fn rate_limit<T: Into<String>>(message: T) -> Self {
        Self::RateLimitExceeded {
            message: message.into(),
        }
    }

    /// 创建请求无效错误
    pub fn bad_request<T: Into<String>>(message: T) -> Self {
        Self::BadRequest {
            message: message.into(),
            source: None,
        }
    }


    /// 创建上游不可达错误
    pub fn upstream_unreachable<T: Into<String>>(message: T) -> Self {
        Self::UpstreamUnreachable {
            message: message.into(),
            source: None,
        }
    }

    pub fn upstream_unreachable_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::UpstreamUnreachable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建上游超时错误
    pub fn upstream_timeout<T: Into<String>>(message: T, timeout_seconds: u64) -> Self {
        Self::UpstreamTimeout {
            message: message.into(),
            timeout_seconds,
            source: None,
        }
    }

    pub fn upstream_timeout_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        timeout_seconds: u64,
        source: E,
    ) -> Self {
        Self::UpstreamTimeout {
            message: message.into(),
            timeout_seconds,
            source: Some(source.into()),
        }
    }

    /// 创建网络错误
    pub fn network<T: Into<String>>(message: T) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建服务器启动错误
    pub fn server_start_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::ServerStart {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

// 自动转换常见错误类型
impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: "文件操作失败".to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for ProxyError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(err: url::ParseError) -> Self {
        Self::config_with_source("URL解析失败", err)
    }
}

// Reqwest错误转换
impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::upstream_timeout_with_source("上游响应超时", 0, err)
        } else if err.is_connect() {
            Self::upstream_unreachable_with_source("无法连接上游", err)
        } else {
            Self::network_with_source("HTTP请求失败", err)
        }
    }
}
