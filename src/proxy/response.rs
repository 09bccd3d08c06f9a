//! # 响应处理
//!
//! CORS 头改写以及拒绝类错误到 HTTP 响应的转换。

use crate::error::ProxyError;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// 速率限制拒绝时的响应文本
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

/// 响应头改写器
pub struct ResponseRewriter;

impl ResponseRewriter {
    /// 无条件设置 `Access-Control-Allow-Origin: *`，覆盖上游的值
    pub fn rewrite(headers: &mut HeaderMap) {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
    }
}

/// 将拒绝类错误转换为响应
#[must_use]
pub fn rejection_response(err: &ProxyError) -> Response {
    let status = err.status_code();
    match status {
        StatusCode::FORBIDDEN => (
            status,
            Json(json!({ "success": false, "error": "forbidden" })),
        )
            .into_response(),
        StatusCode::TOO_MANY_REQUESTS => (status, RATE_LIMIT_MESSAGE).into_response(),
        _ => (
            status,
            Json(json!({
                "success": false,
                "error": err.error_code(),
                "message": err.to_string(),
            })),
        )
            .into_response(),
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        rejection_response(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_rewrite_overwrites_upstream_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://app.example"),
        );
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));

        ResponseRewriter::rewrite(&mut headers);

        assert_eq!(headers.get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN).iter().count(), 1);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
    }

    #[tokio::test]
    async fn test_forbidden_body() {
        let response = rejection_response(&ProxyError::forbidden_target("https://evil.example"));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await,
            json!({ "success": false, "error": "forbidden" })
        );
    }

    #[tokio::test]
    async fn test_rate_limit_body() {
        let response = rejection_response(&ProxyError::rate_limit("client 1.2.3.4"));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], RATE_LIMIT_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn test_gateway_error_body() {
        let response = ProxyError::upstream_unreachable("connection refused").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "upstream_unreachable");
        assert_eq!(body["success"], false);
    }
}
