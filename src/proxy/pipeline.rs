//! # 请求处理管道
//!
//! `ProxyDispatcher` 按固定顺序执行各阶段：
//! 限流 → 目标解析 → 请求头清理 → 凭证注入 → 请求体准备 → 转发 → 响应改写。
//! 任一阶段失败立即短路为拒绝响应，后续阶段不再执行。

use crate::config::ProxyPolicy;
use crate::error::{ErrorCategory, ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::proxy::body::{BodyEncoding, ParsedBody, PreparedBody};
use crate::proxy::context::{
    IncomingRequest, OutboundRequest, RequestContext, RequestStage, RouteDecision,
    client_identity,
};
use crate::proxy::credential::{CredentialInjector, CredentialMatch};
use crate::proxy::forwarder::UpstreamClient;
use crate::proxy::inspection::BodyInspector;
use crate::proxy::rate_limit::{RateLimitDecision, RateLimiter};
use crate::proxy::response::{ResponseRewriter, rejection_response};
use crate::proxy::sanitizer::HeaderSanitizer;
use crate::proxy::target::{ResolvedTarget, TargetResolver};
use crate::{ldebug, lerror, linfo, lwarn};
use axum::extract::{FromRequest, Request};
use axum::http::{StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// 代理请求调度器
#[derive(Debug, Clone)]
pub struct ProxyDispatcher {
    policy: Arc<ProxyPolicy>,
    limiter: Arc<RateLimiter>,
    resolver: TargetResolver,
    sanitizer: HeaderSanitizer,
    injector: CredentialInjector,
    inspector: BodyInspector,
    upstream: UpstreamClient,
}

impl ProxyDispatcher {
    #[must_use]
    pub fn new(
        policy: Arc<ProxyPolicy>,
        limiter: Arc<RateLimiter>,
        upstream: UpstreamClient,
    ) -> Self {
        Self {
            resolver: TargetResolver::new(Arc::clone(&policy)),
            sanitizer: HeaderSanitizer::new(&policy),
            injector: CredentialInjector::new(Arc::clone(&policy)),
            inspector: BodyInspector::new(Arc::clone(&policy)),
            policy,
            limiter,
            upstream,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &Arc<ProxyPolicy> {
        &self.policy
    }

    #[must_use]
    pub const fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// 处理一个入站请求，总是返回合法的 HTTP 响应
    pub async fn dispatch(&self, request: Request, peer: Option<SocketAddr>) -> Response {
        let client = client_identity(
            request.headers(),
            self.policy.client_ip_header.as_ref(),
            peer,
        );
        let mut ctx = RequestContext::new(client);
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        linfo!(
            &ctx.request_id,
            LogStage::RequestStart,
            LogComponent::Proxy,
            "request_received",
            "Request received",
            method = %method,
            path = %path,
            client = %ctx.client
        );

        let decision = self.check_rate(&mut ctx);
        let outcome = if decision.allowed {
            self.proxy(&mut ctx, request).await
        } else {
            Err(ProxyError::rate_limit(format!(
                "client {} exceeded {} requests per {}s",
                ctx.client,
                decision.limit,
                decision.window.as_secs()
            )))
        };

        let mut response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.log_rejection(&ctx, &err);
                ctx.advance(RequestStage::Rejected);
                rejection_response(&err)
            }
        };

        decision.apply_headers(response.headers_mut());
        ResponseRewriter::rewrite(response.headers_mut());
        if ctx.stage() != RequestStage::Rejected {
            ctx.advance(RequestStage::ResponseRewritten);
            ctx.advance(RequestStage::Sent);
        }

        let route = ctx.route();
        linfo!(
            &ctx.request_id,
            LogStage::Response,
            LogComponent::Proxy,
            "request_completed",
            "Request completed",
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            request_stage = %ctx.stage(),
            duration_ms = ctx.elapsed_ms(),
            client = %ctx.client,
            target = %route.map_or_else(String::new, |r| r.target.url.to_string()),
            credential = route.map_or("none", |r| r.credential.outcome()),
            credential_rule = route.and_then(|r| r.credential.rule_host()).unwrap_or("-"),
            suspicious = route.and_then(|r| r.suspicious.as_deref()).unwrap_or("-")
        );

        response
    }

    fn check_rate(&self, ctx: &mut RequestContext) -> RateLimitDecision {
        let decision = self.limiter.admit(&ctx.client, Instant::now());
        ctx.advance(RequestStage::RateChecked);

        if decision.allowed {
            ldebug!(
                &ctx.request_id,
                LogStage::RateLimit,
                LogComponent::RateLimiter,
                "admitted",
                "Request admitted",
                client = %ctx.client,
                remaining = decision.remaining
            );
        } else {
            lwarn!(
                &ctx.request_id,
                LogStage::RateLimit,
                LogComponent::RateLimiter,
                "denied",
                "Rate limit exceeded",
                client = %ctx.client,
                limit = decision.limit,
                reset_secs = decision.reset_secs()
            );
        }
        decision
    }

    async fn proxy(&self, ctx: &mut RequestContext, request: Request) -> Result<Response> {
        let target = self.resolve_target(ctx, &request)?;
        let incoming = self.read_request(ctx, request).await?;
        let (decision, outbound) = self.prepare(ctx, &incoming, target);
        ctx.record_route(decision);

        linfo!(
            &ctx.request_id,
            LogStage::UpstreamRequest,
            LogComponent::Upstream,
            "forward",
            "Forwarding request upstream",
            method = %outbound.method,
            url = %outbound.url
        );
        let upstream = self.upstream.send(outbound).await?;
        ctx.advance(RequestStage::Forwarded);

        ldebug!(
            &ctx.request_id,
            LogStage::Response,
            LogComponent::Upstream,
            "upstream_response",
            "Upstream responded",
            status = upstream.status().as_u16()
        );
        Ok(UpstreamClient::relay(upstream))
    }

    fn resolve_target(&self, ctx: &mut RequestContext, request: &Request) -> Result<ResolvedTarget> {
        let target = self.resolver.resolve(request.headers())?;
        ctx.advance(RequestStage::TargetResolved);

        if target.allow_listed {
            ldebug!(
                &ctx.request_id,
                LogStage::Routing,
                LogComponent::TargetResolver,
                "target_resolved",
                "Target resolved",
                target = %target.url,
                source = ?target.source
            );
        } else {
            lwarn!(
                &ctx.request_id,
                LogStage::Routing,
                LogComponent::TargetResolver,
                "target_not_allow_listed",
                "Target is outside the allow-list, forwarding in advisory mode",
                target = %target.url
            );
        }
        Ok(target)
    }

    /// 读取并解析请求体
    async fn read_request(&self, ctx: &RequestContext, request: Request) -> Result<IncomingRequest> {
        let declared_length = request
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let limit = u64::try_from(self.policy.max_body_bytes).unwrap_or(u64::MAX);
        if declared_length.is_some_and(|len| len > limit) {
            return Err(ProxyError::BodyTooLarge {
                limit: self.policy.max_body_bytes,
            });
        }

        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let query = request.uri().query().map(str::to_string);
        let headers = request.headers().clone();

        let raw_body = Bytes::from_request(request, &()).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ProxyError::BodyTooLarge {
                    limit: self.policy.max_body_bytes,
                }
            } else {
                ProxyError::bad_request(format!(
                    "failed to read request body: {}",
                    rejection.body_text()
                ))
            }
        })?;

        let encoding = BodyEncoding::from_content_type(headers.get(header::CONTENT_TYPE));
        let parsed_body = ParsedBody::parse(&raw_body, encoding);
        if parsed_body == ParsedBody::Unparsed && encoding != BodyEncoding::Other {
            ldebug!(
                &ctx.request_id,
                LogStage::RequestModify,
                LogComponent::Body,
                "malformed_body",
                "Body does not match its content type, forwarding raw bytes",
                encoding = ?encoding,
                bytes = raw_body.len()
            );
        }

        Ok(IncomingRequest {
            request_id: ctx.request_id.clone(),
            method,
            path,
            query,
            headers,
            client: ctx.client.clone(),
            encoding,
            parsed_body,
            raw_body,
        })
    }

    /// 构建出站请求：诊断 → 清理请求头 → 注入凭证 → 准备请求体
    pub fn prepare(
        &self,
        ctx: &mut RequestContext,
        incoming: &IncomingRequest,
        target: ResolvedTarget,
    ) -> (RouteDecision, OutboundRequest) {
        let report = self.inspector.inspect(incoming, &target.url);

        let mut headers = self.sanitizer.sanitize(&incoming.headers);
        ctx.advance(RequestStage::Sanitized);

        let credential = self.injector.credential_for(&target.url);
        match &credential {
            CredentialMatch::Injected(injected) => {
                CredentialInjector::inject(&mut headers, injected);
                ldebug!(
                    &ctx.request_id,
                    LogStage::RequestModify,
                    LogComponent::Credential,
                    "credential_injected",
                    "Upstream credential injected",
                    rule = %injected.rule_host,
                    header = %injected.header
                );
            }
            CredentialMatch::MissingSecret { rule_host } => {
                ldebug!(
                    &ctx.request_id,
                    LogStage::RequestModify,
                    LogComponent::Credential,
                    "credential_missing",
                    "No secret configured for matching rule, forwarding unauthenticated",
                    rule = %rule_host
                );
            }
            CredentialMatch::NoMatch => {}
        }
        ctx.advance(RequestStage::CredentialInjected);

        let body = PreparedBody::prepare(
            &incoming.parsed_body,
            incoming.raw_body.clone(),
            incoming.encoding,
        );
        if body.is_reencoded() {
            ldebug!(
                &ctx.request_id,
                LogStage::RequestModify,
                LogComponent::Body,
                "body_reencoded",
                "Request body re-encoded",
                original_bytes = incoming.raw_body.len(),
                content_length = body.content_length().unwrap_or_default()
            );
        }
        ctx.advance(RequestStage::BodyPrepared);

        let outbound = OutboundRequest {
            method: incoming.method.clone(),
            url: target
                .url
                .join(&incoming.path, incoming.query.as_deref()),
            headers,
            body,
        };
        let decision = RouteDecision {
            target,
            credential,
            suspicious: report.suspicion,
        };
        (decision, outbound)
    }

    fn log_rejection(&self, ctx: &RequestContext, err: &ProxyError) {
        match err.category() {
            ErrorCategory::Client => lwarn!(
                &ctx.request_id,
                LogStage::Error,
                LogComponent::Proxy,
                "request_rejected",
                "Request rejected",
                request_stage = %ctx.stage(),
                status = err.status_code().as_u16(),
                error = %err
            ),
            ErrorCategory::Server => lerror!(
                &ctx.request_id,
                LogStage::Error,
                LogComponent::Proxy,
                "request_failed",
                "Request failed",
                request_stage = %ctx.stage(),
                status = err.status_code().as_u16(),
                error = %err,
                default_target = %self.policy.default_target
            ),
        }
    }
}
