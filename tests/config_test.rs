//! # 配置加载测试
//!
//! TOML 文件与环境变量的分层加载，以及由配置构建的只读策略。

use std::collections::HashMap;
use std::io::Write;

use api_relay::ProxyError;
use api_relay::config::{AllowListMode, CONFIG_PATH_ENV, ProxyPolicy, load_config};
use pretty_assertions::assert_eq;
use tempfile::{Builder, NamedTempFile};

struct TempConfig {
    file: NamedTempFile,
}

impl TempConfig {
    fn write(content: &str) -> Self {
        let mut file = Builder::new()
            .prefix("api-relay-")
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        Self { file }
    }

    fn env(&self, extra: &[(&str, &str)]) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = extra
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        env.insert(
            CONFIG_PATH_ENV.to_string(),
            self.file.path().display().to_string(),
        );
        env
    }
}

const RELAY_TOML: &str = r#"
log_level = "debug"

[server]
host = "127.0.0.1"
port = 8800

[management]
host = "127.0.0.1"
port = 8801

[upstream]
default_target = "https://api.elevenlabs.io/"
allowed_targets = ["https://api.elevenlabs.io/v1", "https://api.openai.com"]
allow_list_mode = "advisory"
timeout_secs = 30

[[upstream.credentials]]
host = "elevenlabs.io"
header = "xi-api-key"
secret_env = "VOICE_KEY"

[rate_limit]
window_secs = 10
max_requests = 5

[inspection]
allowed_models = ["gpt-4o-mini"]
"#;

#[test]
fn test_file_then_env_layering() {
    let file = TempConfig::write(RELAY_TOML);
    let config = load_config(&file.env(&[("PORT", "9100"), ("VOICE_KEY", "el-from-env")]))
        .unwrap();

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.management.as_ref().unwrap().port, 8801);
    assert_eq!(config.upstream.allow_list_mode, AllowListMode::Advisory);
    assert_eq!(config.upstream.timeout_secs, 30);
    assert_eq!(config.upstream.credentials.len(), 1);
    assert_eq!(
        config.upstream.credentials[0].secret.as_ref().unwrap().expose(),
        "el-from-env"
    );
    // 未在文件中出现的字段保持默认值
    assert_eq!(config.upstream.target_header, "x-target-url");
    assert_eq!(config.rate_limit.sweep_interval_secs, 60);
    assert_eq!(config.log_level.as_deref(), Some("debug"));
}

#[test]
fn test_policy_from_loaded_file() {
    let file = TempConfig::write(RELAY_TOML);
    let config = load_config(&file.env(&[("VOICE_KEY", "el-key")])).unwrap();
    let policy = ProxyPolicy::from_config(&config).unwrap();

    assert_eq!(policy.default_target.to_string(), "https://api.elevenlabs.io");
    assert_eq!(policy.rate_limit.max_requests, 5);
    assert_eq!(policy.rate_limit.window.as_secs(), 10);
    assert_eq!(policy.inspection.allowed_models, vec!["gpt-4o-mini".to_string()]);
    assert_eq!(policy.credentials.len(), 1);
    assert!(policy.credentials[0].matches_host("api.elevenlabs.io"));
    assert!(!policy.credentials[0].matches_host("api.openai.com"));
}

#[test]
fn test_missing_file_is_an_error() {
    let mut env = HashMap::new();
    env.insert(
        CONFIG_PATH_ENV.to_string(),
        "/nonexistent/api-relay.toml".to_string(),
    );
    assert!(load_config(&env).is_err());
}

#[test]
fn test_invalid_toml_is_an_error() {
    let file = TempConfig::write("[server\nport = ");
    let err = load_config(&file.env(&[])).unwrap_err();

    assert!(matches!(err, ProxyError::Context { .. }));
    assert_eq!(err.error_code(), "config_error");
    assert!(err.to_string().contains(&file.file.path().display().to_string()));
}

#[test]
fn test_enforced_mode_requires_default_target_in_list() {
    let file = TempConfig::write(r#"
[upstream]
default_target = "https://internal.example.com/"
allowed_targets = ["https://api.openai.com/"]
"#,
    );
    let config = load_config(&file.env(&[])).unwrap();
    assert!(ProxyPolicy::from_config(&config).is_err());
}
