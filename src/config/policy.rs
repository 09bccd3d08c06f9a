//! # 代理策略
//!
//! 启动时由 `AppConfig` 构建的只读策略，通过 `Arc` 在各组件之间共享。
//! 所有请求头名称、目标地址在这里完成解析，请求处理路径上不再做配置校验。

use super::app_config::{AllowListMode, AppConfig};
use crate::error::{ProxyError, Result};
use crate::proxy::target::TargetUrl;
use axum::http::HeaderName;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// 敏感值包装，`Debug` 与序列化输出均已脱敏
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 读取明文，仅在构造上游请求头时使用
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

/// 凭证描述：请求头名称、值前缀与密钥
#[derive(Debug, Clone)]
pub struct CredentialDescriptor {
    pub header_name: HeaderName,
    pub value_prefix: String,
    pub secret: Option<Secret>,
}

impl CredentialDescriptor {
    /// 密钥是否可用
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.secret.as_ref().is_some_and(|secret| !secret.is_empty())
    }
}

/// 主机模式到凭证的映射
#[derive(Debug, Clone)]
pub struct CredentialRule {
    /// 小写主机名，匹配自身及子域名
    pub host_pattern: String,
    pub descriptor: CredentialDescriptor,
}

impl CredentialRule {
    #[must_use]
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        host == self.host_pattern
            || host
                .strip_suffix(&self.host_pattern)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// 目标允许列表
#[derive(Debug, Clone)]
pub struct AllowList {
    pub mode: AllowListMode,
    pub entries: Vec<TargetUrl>,
}

impl AllowList {
    /// 目标是否落在任一允许前缀之下
    #[must_use]
    pub fn permits(&self, target: &TargetUrl) -> bool {
        self.entries.iter().any(|allowed| target.is_within(allowed))
    }
}

/// 请求体诊断策略
#[derive(Debug, Clone, Default)]
pub struct InspectionPolicy {
    pub hosts: Vec<String>,
    pub allowed_models: Vec<String>,
}

/// 速率限制参数
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_requests: u32,
    pub sweep_interval: Duration,
}

/// 进程级只读代理策略
#[derive(Debug, Clone)]
pub struct ProxyPolicy {
    pub default_target: TargetUrl,
    pub target_header: HeaderName,
    pub client_ip_header: Option<HeaderName>,
    pub allow_list: AllowList,
    pub credentials: Vec<CredentialRule>,
    pub inspection: InspectionPolicy,
    pub rate_limit: RateLimitPolicy,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
}

fn parse_header_name(field: &str, value: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(value.trim().to_ascii_lowercase().as_bytes()).map_err(|e| {
        ProxyError::config_with_source(format!("{field} is not a valid header name: {value}"), e)
    })
}

impl ProxyPolicy {
    /// 从已验证的配置构建策略
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate().map_err(ProxyError::config)?;

        let upstream = &config.upstream;
        let default_target = TargetUrl::parse(&upstream.default_target).map_err(|e| {
            ProxyError::config_with_source(
                format!("invalid default target: {}", upstream.default_target),
                e,
            )
        })?;

        let entries = upstream
            .allowed_targets
            .iter()
            .map(|raw| {
                TargetUrl::parse(raw).map_err(|e| {
                    ProxyError::config_with_source(format!("invalid allow-list entry: {raw}"), e)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let allow_list = AllowList {
            mode: upstream.allow_list_mode,
            entries,
        };

        if allow_list.mode == AllowListMode::Enforced && !allow_list.permits(&default_target) {
            return Err(ProxyError::config(format!(
                "default target {default_target} is not in the enforced allow-list"
            )));
        }

        let credentials = upstream
            .credentials
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                Ok(CredentialRule {
                    host_pattern: rule.host.trim().trim_end_matches('.').to_ascii_lowercase(),
                    descriptor: CredentialDescriptor {
                        header_name: parse_header_name(
                            &format!("upstream.credentials[{index}].header"),
                            &rule.header,
                        )?,
                        value_prefix: rule.prefix.clone(),
                        secret: rule.secret.clone().filter(|secret| !secret.is_empty()),
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let client_ip_header = if upstream.client_ip_header.trim().is_empty() {
            None
        } else {
            Some(parse_header_name(
                "upstream.client_ip_header",
                &upstream.client_ip_header,
            )?)
        };

        Ok(Self {
            default_target,
            target_header: parse_header_name("upstream.target_header", &upstream.target_header)?,
            client_ip_header,
            allow_list,
            credentials,
            inspection: InspectionPolicy {
                hosts: config
                    .inspection
                    .hosts
                    .iter()
                    .map(|host| host.trim().to_ascii_lowercase())
                    .filter(|host| !host.is_empty())
                    .collect(),
                allowed_models: config.inspection.allowed_models.clone(),
            },
            rate_limit: RateLimitPolicy {
                window: Duration::from_secs(config.rate_limit.window_secs),
                max_requests: config.rate_limit.max_requests,
                sweep_interval: Duration::from_secs(config.rate_limit.sweep_interval_secs),
            },
            upstream_timeout: Duration::from_secs(upstream.timeout_secs),
            max_body_bytes: upstream.max_body_bytes,
        })
    }

    /// 所有配置过的凭证请求头名称
    pub fn credential_header_names(&self) -> impl Iterator<Item = &HeaderName> {
        self.credentials.iter().map(|rule| &rule.descriptor.header_name)
    }
}
