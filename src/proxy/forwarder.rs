//! # 上游转发
//!
//! 使用 `reqwest` 发送出站请求，并把上游响应以流的形式转回客户端。
//! 不做重试；客户端断开时处理 future 被丢弃，进行中的上游请求随之取消。

use crate::error::{ProxyError, Result};
use crate::proxy::context::OutboundRequest;
use crate::proxy::sanitizer::strip_hop_by_hop;
use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::Response;
use reqwest::Client;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// 上游 HTTP 客户端
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http_client: Client,
    timeout: Duration,
}

impl UpstreamClient {
    /// `timeout` 为两次读取之间的最长等待时间，流式响应不受总时长限制
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .read_timeout(timeout)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::config_with_source("创建上游 HTTP 客户端失败", e))?;

        Ok(Self {
            http_client,
            timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> ProxyError {
        if err.is_timeout() {
            ProxyError::upstream_timeout_with_source(
                "上游响应超时",
                self.timeout.as_secs(),
                err,
            )
        } else {
            ProxyError::from(err)
        }
    }

    /// 发送出站请求
    pub async fn send(&self, outbound: OutboundRequest) -> Result<reqwest::Response> {
        let OutboundRequest {
            method,
            url,
            mut headers,
            body,
        } = outbound;

        if let Some(length) = body.content_length() {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }

        let mut request = self.http_client.request(method, &url).headers(headers);
        if let Some(bytes) = body.into_bytes() {
            request = request.body(bytes);
        }

        match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(result) => result.map_err(|e| self.map_error(e)),
            Err(_) => Err(ProxyError::upstream_timeout(
                "等待上游响应头超时",
                self.timeout.as_secs(),
            )),
        }
    }

    /// 把上游响应转换为下游响应：状态码与响应体原样返回，去掉逐跳头
    #[must_use]
    pub fn relay(upstream: reqwest::Response) -> Response {
        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}
