//! # 上游凭证注入
//!
//! 根据目标主机按优先级匹配凭证规则，生成需要附加到上游请求上的认证头。

use crate::config::ProxyPolicy;
use crate::proxy::target::TargetUrl;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;

/// 需要注入的认证头
#[derive(Debug, Clone)]
pub struct InjectedCredential {
    pub header: HeaderName,
    pub value: HeaderValue,
    /// 命中的规则主机
    pub rule_host: String,
}

/// 凭证匹配结果
#[derive(Debug, Clone)]
pub enum CredentialMatch {
    /// 命中规则且密钥可用
    Injected(InjectedCredential),
    /// 命中规则但未配置密钥，按未认证请求转发
    MissingSecret { rule_host: String },
    /// 没有规则匹配
    NoMatch,
}

impl CredentialMatch {
    #[must_use]
    pub const fn credential(&self) -> Option<&InjectedCredential> {
        match self {
            Self::Injected(credential) => Some(credential),
            Self::MissingSecret { .. } | Self::NoMatch => None,
        }
    }

    /// 命中的规则主机
    #[must_use]
    pub fn rule_host(&self) -> Option<&str> {
        match self {
            Self::Injected(credential) => Some(&credential.rule_host),
            Self::MissingSecret { rule_host } => Some(rule_host),
            Self::NoMatch => None,
        }
    }

    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Injected(_) => "injected",
            Self::MissingSecret { .. } => "missing_secret",
            Self::NoMatch => "none",
        }
    }
}

/// 凭证注入器
#[derive(Debug, Clone)]
pub struct CredentialInjector {
    policy: Arc<ProxyPolicy>,
}

impl CredentialInjector {
    #[must_use]
    pub const fn new(policy: Arc<ProxyPolicy>) -> Self {
        Self { policy }
    }

    /// 为目标选择凭证，首个匹配的规则生效
    #[must_use]
    pub fn credential_for(&self, target: &TargetUrl) -> CredentialMatch {
        let Some(rule) = self
            .policy
            .credentials
            .iter()
            .find(|rule| rule.matches_host(target.host()))
        else {
            return CredentialMatch::NoMatch;
        };

        let descriptor = &rule.descriptor;
        let value = descriptor
            .secret
            .as_ref()
            .filter(|secret| !secret.is_empty())
            .and_then(|secret| {
                let mut value =
                    HeaderValue::from_str(&format!("{}{}", descriptor.value_prefix, secret.expose()))
                        .ok()?;
                value.set_sensitive(true);
                Some(value)
            });

        match value {
            Some(value) => CredentialMatch::Injected(InjectedCredential {
                header: descriptor.header_name.clone(),
                value,
                rule_host: rule.host_pattern.clone(),
            }),
            None => CredentialMatch::MissingSecret {
                rule_host: rule.host_pattern.clone(),
            },
        }
    }

    /// 写入认证头，覆盖同名的已有值
    pub fn inject(headers: &mut HeaderMap, credential: &InjectedCredential) {
        headers.insert(credential.header.clone(), credential.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, CredentialRuleConfig, Secret};

    fn injector(openai: Option<&str>, elevenlabs: Option<&str>) -> CredentialInjector {
        let mut config = AppConfig::default();
        config.upstream.credentials[0].secret = openai.map(Secret::new);
        config.upstream.credentials[1].secret = elevenlabs.map(Secret::new);
        CredentialInjector::new(Arc::new(ProxyPolicy::from_config(&config).unwrap()))
    }

    fn target(raw: &str) -> TargetUrl {
        TargetUrl::parse(raw).unwrap()
    }

    #[test]
    fn test_openai_gets_bearer_token() {
        let matched = injector(Some("sk-1"), Some("el-1")).credential_for(&target("https://api.openai.com/"));
        let credential = matched.credential().unwrap();
        assert_eq!(credential.header.as_str(), "authorization");
        assert_eq!(credential.value, "Bearer sk-1");
        assert!(credential.value.is_sensitive());
    }

    #[test]
    fn test_elevenlabs_gets_vendor_header() {
        let matched = injector(Some("sk-1"), Some("el-1")).credential_for(&target("https://api.elevenlabs.io"));
        let credential = matched.credential().unwrap();
        assert_eq!(credential.header.as_str(), "xi-api-key");
        assert_eq!(credential.value, "el-1");
        assert_eq!(credential.rule_host, "api.elevenlabs.io");
    }

    #[test]
    fn test_missing_secret_is_not_an_error() {
        let matched = injector(None, Some("el-1")).credential_for(&target("https://api.openai.com"));
        assert!(matches!(matched, CredentialMatch::MissingSecret { ref rule_host } if rule_host == "api.openai.com"));
        assert!(matched.credential().is_none());
    }

    #[test]
    fn test_unknown_host_has_no_credential() {
        let matched = injector(Some("sk-1"), Some("el-1")).credential_for(&target("https://example.com"));
        assert!(matches!(matched, CredentialMatch::NoMatch));
    }

    #[test]
    fn test_host_lookalike_in_path_does_not_match() {
        let matched = injector(Some("sk-1"), None)
            .credential_for(&target("https://evil.example/api.openai.com"));
        assert!(matches!(matched, CredentialMatch::NoMatch));
    }

    #[test]
    fn test_first_rule_wins() {
        let mut config = AppConfig::default();
        config.upstream.credentials.insert(
            0,
            CredentialRuleConfig {
                host: "openai.com".to_string(),
                header: "x-api-key".to_string(),
                prefix: String::new(),
                secret_env: None,
                secret: Some(Secret::new("wide")),
            },
        );
        let injector = CredentialInjector::new(Arc::new(ProxyPolicy::from_config(&config).unwrap()));

        let matched = injector.credential_for(&target("https://api.openai.com"));
        assert_eq!(matched.credential().unwrap().header.as_str(), "x-api-key");
    }

    #[test]
    fn test_inject_overwrites_existing_value() {
        let matched = injector(Some("sk-1"), None).credential_for(&target("https://api.openai.com"));
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer client"));

        CredentialInjector::inject(&mut headers, matched.credential().unwrap());

        assert_eq!(headers.get_all("authorization").iter().count(), 1);
        assert_eq!(headers["authorization"], "Bearer sk-1");
    }
}
