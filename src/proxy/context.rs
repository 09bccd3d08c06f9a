//! # 代理上下文模块
//!
//! 单个请求处理过程中的值类型：入站请求、路由决策、出站请求与处理阶段。
//! 这些值只属于一个请求，不跨请求共享。

use crate::proxy::body::{BodyEncoding, ParsedBody, PreparedBody};
use crate::proxy::credential::CredentialMatch;
use crate::proxy::target::ResolvedTarget;
use axum::http::{HeaderMap, HeaderName, Method};
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// 客户端标识缺失时使用的占位值
pub const UNKNOWN_CLIENT: &str = "unknown";

/// 请求处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    RateChecked,
    TargetResolved,
    Sanitized,
    CredentialInjected,
    BodyPrepared,
    Forwarded,
    ResponseRewritten,
    Sent,
    Rejected,
}

impl RequestStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::RateChecked => "rate_checked",
            Self::TargetResolved => "target_resolved",
            Self::Sanitized => "sanitized",
            Self::CredentialInjected => "credential_injected",
            Self::BodyPrepared => "body_prepared",
            Self::Forwarded => "forwarded",
            Self::ResponseRewritten => "response_rewritten",
            Self::Sent => "sent",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求上下文：请求 ID、开始时间与当前阶段
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub start_time: Instant,
    pub client: String,
    stages: Vec<RequestStage>,
    route: Option<RouteDecision>,
}

impl RequestContext {
    #[must_use]
    pub fn new(client: String) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            start_time: Instant::now(),
            client,
            stages: vec![RequestStage::Received],
            route: None,
        }
    }

    /// 进入下一阶段
    pub fn advance(&mut self, stage: RequestStage) {
        self.stages.push(stage);
    }

    #[must_use]
    pub fn stage(&self) -> RequestStage {
        self.stages.last().copied().unwrap_or(RequestStage::Received)
    }

    /// 已经过的阶段（按顺序）
    #[must_use]
    pub fn stages(&self) -> &[RequestStage] {
        &self.stages
    }

    /// 保存本次请求的路由决策，供请求结束时的汇总日志使用
    pub fn record_route(&mut self, route: RouteDecision) {
        self.route = Some(route);
    }

    #[must_use]
    pub const fn route(&self) -> Option<&RouteDecision> {
        self.route.as_ref()
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }
}

/// 入站请求（请求体已读取并解析）
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub client: String,
    pub encoding: BodyEncoding,
    pub parsed_body: ParsedBody,
    pub raw_body: Bytes,
}

/// 路由决策
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub target: ResolvedTarget,
    pub credential: CredentialMatch,
    /// 请求体诊断发现的可疑原因
    pub suspicious: Option<String>,
}

/// 出站请求
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: PreparedBody,
}

/// 解析客户端标识
///
/// 优先使用受信任的客户端 IP 头（取第一个逗号分隔项），其次是连接对端地址。
#[must_use]
pub fn client_identity(
    headers: &HeaderMap,
    trusted_header: Option<&HeaderName>,
    peer: Option<SocketAddr>,
) -> String {
    trusted_header
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
