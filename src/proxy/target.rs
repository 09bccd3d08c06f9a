//! # 目标上游解析
//!
//! `TargetUrl` 是规范化后的上游基础地址：只保留 scheme、host、端口与去掉末尾斜杠的路径。
//! 允许列表两侧都使用同一规范化结果做比较，避免斜杠不一致导致误拒。

use crate::config::{AllowListMode, ProxyPolicy};
use crate::ensure;
use crate::error::{ProxyError, Result};
use axum::http::HeaderMap;
use std::fmt;
use std::sync::Arc;
use url::{Host, Url};

/// 规范化的上游基础地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    scheme: String,
    host: String,
    port: u16,
    explicit_port: bool,
    base_path: String,
}

impl TargetUrl {
    /// 解析并规范化，缺少 scheme 时按 https 处理
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        ensure!(!trimmed.is_empty(), ProxyError::config("目标地址不能为空"));

        let url = if trimmed.contains("://") {
            Url::parse(trimmed)?
        } else {
            Url::parse(&format!("https://{trimmed}"))?
        };

        ensure!(
            matches!(url.scheme(), "http" | "https"),
            ProxyError::config(format!("不支持的目标协议: {}", url.scheme()))
        );
        ensure!(
            url.username().is_empty() && url.password().is_none(),
            ProxyError::config("目标地址不能包含用户信息")
        );

        let host = match url
            .host()
            .ok_or_else(|| ProxyError::config(format!("目标地址缺少 host: {trimmed}")))?
        {
            Host::Domain(domain) => domain.trim_end_matches('.').to_ascii_lowercase(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => format!("[{ip}]"),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyError::config(format!("目标地址缺少端口: {trimmed}")))?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
            explicit_port: url.port().is_some(),
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// 小写主机名（IPv6 带方括号）
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// 不含末尾斜杠的基础路径，根路径为空串
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// 是否位于允许前缀之下：scheme、host、端口完全一致，路径按段前缀匹配
    #[must_use]
    pub fn is_within(&self, allowed: &Self) -> bool {
        if self.scheme != allowed.scheme || self.host != allowed.host || self.port != allowed.port {
            return false;
        }
        allowed.base_path.is_empty()
            || self.base_path == allowed.base_path
            || self
                .base_path
                .strip_prefix(&allowed.base_path)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// 拼接出站地址：基础地址 + 入站路径 + 查询串
    #[must_use]
    pub fn join(&self, path: &str, query: Option<&str>) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{self}{path}?{query}"),
            None => format!("{self}{path}"),
        }
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if self.explicit_port {
            write!(f, ":{}", self.port)?;
        }
        f.write_str(&self.base_path)
    }
}

/// 目标来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    /// 来自覆盖请求头
    Override,
    /// 使用配置的默认目标
    Default,
}

/// 解析结果
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub url: TargetUrl,
    pub source: TargetSource,
    /// 是否命中允许列表（`Off` 模式下恒为 true）
    pub allow_listed: bool,
}

/// 目标解析器
#[derive(Debug, Clone)]
pub struct TargetResolver {
    policy: Arc<ProxyPolicy>,
}

impl TargetResolver {
    #[must_use]
    pub const fn new(policy: Arc<ProxyPolicy>) -> Self {
        Self { policy }
    }

    /// 覆盖头存在且非空时使用其值，否则使用默认目标；随后按允许列表模式检查
    pub fn resolve(&self, headers: &HeaderMap) -> Result<ResolvedTarget> {
        let override_value = match headers.get(&self.policy.target_header) {
            Some(value) => {
                let value = value.to_str().map_err(|_| {
                    ProxyError::forbidden_target(String::from_utf8_lossy(value.as_bytes()))
                })?;
                Some(value.trim()).filter(|v| !v.is_empty())
            }
            None => None,
        };

        let (url, source) = match override_value {
            Some(raw) => (
                TargetUrl::parse(raw).map_err(|_| ProxyError::forbidden_target(raw))?,
                TargetSource::Override,
            ),
            None => (self.policy.default_target.clone(), TargetSource::Default),
        };

        let allow_list = &self.policy.allow_list;
        let allow_listed = match allow_list.mode {
            AllowListMode::Off => true,
            AllowListMode::Advisory => allow_list.permits(&url),
            AllowListMode::Enforced => {
                ensure!(
                    allow_list.permits(&url),
                    ProxyError::forbidden_target(url.to_string())
                );
                true
            }
        };

        Ok(ResolvedTarget {
            url,
            source,
            allow_listed,
        })
    }
}
