//! # 请求体诊断
//!
//! 对敏感上游的请求记录调试日志，并按配置校验 `model` 字段。只做告警，不拒绝请求。

use crate::config::ProxyPolicy;
use crate::logging::{LogComponent, LogStage};
use crate::proxy::body::{ParsedBody, preview};
use crate::proxy::context::IncomingRequest;
use crate::proxy::target::TargetUrl;
use crate::{ldebug, lwarn};
use serde_json::Value;
use std::sync::Arc;

const PREVIEW_CHARS: usize = 512;

/// 诊断结论
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionReport {
    pub sensitive: bool,
    /// 可疑原因
    pub suspicion: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BodyInspector {
    policy: Arc<ProxyPolicy>,
}

impl BodyInspector {
    #[must_use]
    pub const fn new(policy: Arc<ProxyPolicy>) -> Self {
        Self { policy }
    }

    fn is_sensitive(&self, target: &TargetUrl) -> bool {
        self.policy
            .inspection
            .hosts
            .iter()
            .any(|host| host == target.host())
    }

    fn check_model(&self, parsed: &ParsedBody) -> Option<String> {
        let allowed = &self.policy.inspection.allowed_models;
        if allowed.is_empty() || !matches!(parsed, ParsedBody::Json(Value::Object(_))) {
            return None;
        }

        match parsed.json_field("model") {
            Some(Value::String(model)) if allowed.iter().any(|m| m == model) => None,
            Some(Value::String(model)) => Some(format!("unexpected model: {model}")),
            Some(other) => Some(format!("model field is not a string: {other}")),
            None => Some("model field is missing".to_string()),
        }
    }

    /// 诊断请求，结果仅用于日志与路由决策标记
    #[must_use]
    pub fn inspect(&self, request: &IncomingRequest, target: &TargetUrl) -> InspectionReport {
        if !self.is_sensitive(target) {
            return InspectionReport::default();
        }

        ldebug!(
            &request.request_id,
            LogStage::Inspection,
            LogComponent::Inspector,
            "request_body",
            "Sensitive upstream request",
            method = %request.method,
            path = %request.path,
            query = request.query.as_deref().unwrap_or(""),
            body_kind = request.parsed_body.kind(),
            body = %preview(&request.raw_body, PREVIEW_CHARS)
        );

        let suspicion = self.check_model(&request.parsed_body);
        if let Some(reason) = &suspicion {
            lwarn!(
                &request.request_id,
                LogStage::Inspection,
                LogComponent::Inspector,
                "suspicious_body",
                "Request body failed sanity check",
                target = %target,
                reason = %reason
            );
        }

        InspectionReport {
            sensitive: true,
            suspicion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::proxy::body::BodyEncoding;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;

    fn inspector(allowed_models: &[&str]) -> BodyInspector {
        let mut config = AppConfig::default();
        config.inspection.allowed_models = allowed_models.iter().map(ToString::to_string).collect();
        BodyInspector::new(Arc::new(ProxyPolicy::from_config(&config).unwrap()))
    }

    fn request(body: &'static [u8]) -> IncomingRequest {
        IncomingRequest {
            request_id: "req-test".to_string(),
            method: Method::POST,
            path: "/v1/chat/completions".to_string(),
            query: None,
            headers: HeaderMap::new(),
            client: "127.0.0.1".to_string(),
            encoding: BodyEncoding::Json,
            parsed_body: ParsedBody::parse(body, BodyEncoding::Json),
            raw_body: Bytes::from_static(body),
        }
    }

    fn openai() -> TargetUrl {
        TargetUrl::parse("https://api.openai.com").unwrap()
    }

    #[test]
    fn test_non_sensitive_target_is_skipped() {
        let report = inspector(&["gpt-4o"]).inspect(
            &request(br#"{"model":"other"}"#),
            &TargetUrl::parse("https://api.elevenlabs.io").unwrap(),
        );
        assert_eq!(report, InspectionReport::default());
    }

    #[test]
    fn test_no_allowed_models_means_no_check() {
        let report = inspector(&[]).inspect(&request(br#"{"model":"anything"}"#), &openai());
        assert!(report.sensitive);
        assert!(report.suspicion.is_none());
    }

    #[test]
    fn test_unexpected_model_is_flagged() {
        let inspector = inspector(&["gpt-4o", "gpt-4o-mini"]);
        assert!(inspector.inspect(&request(br#"{"model":"gpt-4o-mini"}"#), &openai()).suspicion.is_none());

        let report = inspector.inspect(&request(br#"{"model":"o1-pro"}"#), &openai());
        assert_eq!(report.suspicion.as_deref(), Some("unexpected model: o1-pro"));

        let report = inspector.inspect(&request(br#"{"model":7}"#), &openai());
        assert!(report.suspicion.unwrap().contains("not a string"));

        let report = inspector.inspect(&request(br#"{"messages":[]}"#), &openai());
        assert_eq!(report.suspicion.as_deref(), Some("model field is missing"));
    }

    #[test]
    fn test_non_object_bodies_are_not_flagged() {
        let inspector = inspector(&["gpt-4o"]);
        assert!(inspector.inspect(&request(b""), &openai()).suspicion.is_none());
        assert!(inspector.inspect(&request(b"not json"), &openai()).suspicion.is_none());
    }
}
