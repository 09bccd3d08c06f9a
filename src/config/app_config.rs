//! # 应用配置结构定义

use super::policy::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 最小请求体上限（1 MiB）
pub const MIN_BODY_BYTES: usize = 1024 * 1024;

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 代理监听配置
    pub server: ListenerConfig,
    /// 管理接口监听配置，缺省时不启动
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management: Option<ListenerConfig>,
    /// 上游相关配置
    pub upstream: UpstreamConfig,
    /// 速率限制配置
    pub rate_limit: RateLimitConfig,
    /// 请求体诊断配置
    pub inspection: InspectionConfig,
    /// 日志级别（`RUST_LOG` 优先）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// 监听地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9017,
        }
    }
}

impl ListenerConfig {
    /// `host:port` 形式的绑定地址
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 允许列表执行模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowListMode {
    /// 不在列表内的目标直接拒绝
    #[default]
    Enforced,
    /// 仅记录告警，继续转发
    Advisory,
    /// 不检查
    Off,
}

impl AllowListMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enforced => "enforced",
            Self::Advisory => "advisory",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for AllowListMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllowListMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enforced" | "enforce" => Ok(Self::Enforced),
            "advisory" | "warn" => Ok(Self::Advisory),
            "off" | "disabled" => Ok(Self::Off),
            other => Err(format!("unknown allow-list mode: {other}")),
        }
    }
}

/// 凭证注入规则
///
/// `host` 匹配目标主机本身或其子域名；`secret` 可以直接写在配置文件中，
/// 也可以通过 `secret_env` 指定环境变量名，在加载时解析。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRuleConfig {
    pub host: String,
    pub header: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
}

impl CredentialRuleConfig {
    fn builtin(host: &str, header: &str, prefix: &str, secret_env: &str) -> Self {
        Self {
            host: host.to_string(),
            header: header.to_string(),
            prefix: prefix.to_string(),
            secret_env: Some(secret_env.to_string()),
            secret: None,
        }
    }

    /// 内置规则：OpenAI 使用 Bearer 令牌，ElevenLabs 使用 `xi-api-key`
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::builtin("api.openai.com", "authorization", "Bearer ", "OPENAI_API_KEY"),
            Self::builtin("api.elevenlabs.io", "xi-api-key", "", "ELEVENLABS_API_KEY"),
        ]
    }
}

/// 上游配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// 未携带覆盖头时使用的目标
    pub default_target: String,
    /// 按请求覆盖目标的请求头
    pub target_header: String,
    /// 受信任的客户端 IP 请求头
    pub client_ip_header: String,
    pub allowed_targets: Vec<String>,
    pub allow_list_mode: AllowListMode,
    /// 按优先级排列，首个匹配生效
    pub credentials: Vec<CredentialRuleConfig>,
    /// 上游读超时（秒）
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_target: "https://api.openai.com/".to_string(),
            target_header: "x-target-url".to_string(),
            client_ip_header: "do-connecting-ip".to_string(),
            allowed_targets: vec![
                "https://api.openai.com/".to_string(),
                "https://api.elevenlabs.io/".to_string(),
            ],
            allow_list_mode: AllowListMode::Enforced,
            credentials: CredentialRuleConfig::defaults(),
            timeout_secs: 600,
            max_body_bytes: 1000 * 1024 * 1024,
        }
    }
}

/// 速率限制配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    /// 过期窗口清理间隔（秒）
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 3,
            sweep_interval_secs: 60,
        }
    }
}

/// 请求体诊断配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    /// 需要记录请求体的上游主机
    pub hosts: Vec<String>,
    /// 非空时校验 JSON 请求体的 `model` 字段
    pub allowed_models: Vec<String>,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["api.openai.com".to_string()],
            allowed_models: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        if let Some(management) = &self.management {
            if management.port == 0 {
                return Err("management.port must be greater than 0".to_string());
            }
            if management == &self.server {
                return Err("management listener must differ from the proxy listener".to_string());
            }
        }

        if self.rate_limit.window_secs == 0 {
            return Err("rate_limit.window_secs must be greater than 0".to_string());
        }
        if self.rate_limit.max_requests == 0 {
            return Err("rate_limit.max_requests must be greater than 0".to_string());
        }
        if self.rate_limit.sweep_interval_secs == 0 {
            return Err("rate_limit.sweep_interval_secs must be greater than 0".to_string());
        }

        let upstream = &self.upstream;
        if upstream.default_target.trim().is_empty() {
            return Err("upstream.default_target cannot be empty".to_string());
        }
        if upstream.target_header.trim().is_empty() {
            return Err("upstream.target_header cannot be empty".to_string());
        }
        if upstream.max_body_bytes < MIN_BODY_BYTES {
            return Err(format!(
                "upstream.max_body_bytes must be at least {MIN_BODY_BYTES} bytes"
            ));
        }
        if upstream.timeout_secs == 0 {
            return Err("upstream.timeout_secs must be greater than 0".to_string());
        }

        for (index, rule) in upstream.credentials.iter().enumerate() {
            if rule.host.trim().is_empty() {
                return Err(format!("upstream.credentials[{index}].host cannot be empty"));
            }
            if rule.header.trim().is_empty() {
                return Err(format!("upstream.credentials[{index}].header cannot be empty"));
            }
        }

        Ok(())
    }
}
