//! # 请求头清理
//!
//! 出站前移除客户端转发链路信息、目标覆盖头、逐跳头以及客户端自带的凭证头。

use crate::config::ProxyPolicy;
use axum::http::{HeaderMap, HeaderName, header};

/// 客户端路由信息相关的请求头
const FORWARDING_HEADERS: [&str; 6] = [
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
    "forwarded",
    "via",
];

/// 逐跳请求头，不跨连接转发
fn hop_by_hop_headers() -> [HeaderName; 8] {
    [
        header::CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-connection"),
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ]
}

/// `Connection` 头中列出的附加逐跳头
fn connection_listed(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect()
}

/// 移除逐跳头（请求与响应通用）
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in connection_listed(headers) {
        headers.remove(name);
    }
    for name in hop_by_hop_headers() {
        headers.remove(name);
    }
}

/// 请求头清理器
#[derive(Debug, Clone)]
pub struct HeaderSanitizer {
    removed: Vec<HeaderName>,
}

impl HeaderSanitizer {
    #[must_use]
    pub fn new(policy: &ProxyPolicy) -> Self {
        let names = FORWARDING_HEADERS
            .iter()
            .copied()
            .map(HeaderName::from_static)
            // 上游 Content-Length 由请求体准备阶段重新计算
            .chain([header::HOST, header::CONTENT_LENGTH])
            .chain(std::iter::once(policy.target_header.clone()))
            .chain(policy.client_ip_header.iter().cloned())
            .chain(policy.credential_header_names().cloned());

        let mut removed: Vec<HeaderName> = Vec::new();
        for name in names {
            if !removed.contains(&name) {
                removed.push(name);
            }
        }

        Self { removed }
    }

    /// 返回清理后的请求头副本
    #[must_use]
    pub fn sanitize(&self, headers: &HeaderMap) -> HeaderMap {
        let mut sanitized = headers.clone();
        strip_hop_by_hop(&mut sanitized);
        for name in &self.removed {
            sanitized.remove(name);
        }
        sanitized
    }
}
