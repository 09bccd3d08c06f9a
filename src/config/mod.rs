//! # 配置管理模块
//!
//! 配置在启动时加载一次：内置默认值 → `RELAY_CONFIG` 指定的 TOML 文件 → 环境变量覆盖。
//! 加载完成后构建只读的 `ProxyPolicy`，此后不再读取环境变量。

mod app_config;
mod env;
mod policy;

pub use app_config::{
    AllowListMode, AppConfig, CredentialRuleConfig, InspectionConfig, ListenerConfig,
    MIN_BODY_BYTES, RateLimitConfig, UpstreamConfig,
};
pub use env::{ReadEnv, SystemEnv};
pub use policy::{
    AllowList, CredentialDescriptor, CredentialRule, InspectionPolicy, ProxyPolicy,
    RateLimitPolicy, Secret,
};

use crate::error::{Context, ProxyError, Result};
use std::path::Path;
use std::str::FromStr;

/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// 加载配置
pub fn load_config<E: ReadEnv>(env: &E) -> Result<AppConfig> {
    let mut config = match env.non_empty(CONFIG_PATH_ENV) {
        Some(path) => load_config_file(Path::new(&path))?,
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, env)?;
    config.validate().map_err(ProxyError::config)?;

    Ok(config)
}

/// 读取 TOML 配置文件
pub fn load_config_file(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(ProxyError::config(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?;

    toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
}

fn parse_env<T, E>(env: &E, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    E: ReadEnv,
{
    env.non_empty(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ProxyError::config(format!("{key}={raw} 无法解析: {e}")))
        })
        .transpose()
}

fn parse_list<E: ReadEnv>(env: &E, key: &str) -> Option<Vec<String>> {
    env.non_empty(key).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// 用环境变量覆盖配置
pub fn apply_env_overrides<E: ReadEnv>(config: &mut AppConfig, env: &E) -> Result<()> {
    if let Some(host) = env.non_empty("HOST") {
        config.server.host = host;
    }
    if let Some(port) = parse_env(env, "PORT")? {
        config.server.port = port;
    }
    if let Some(port) = parse_env::<u16, _>(env, "RELAY_MANAGEMENT_PORT")? {
        let host = config
            .management
            .as_ref()
            .map_or_else(|| config.server.host.clone(), |m| m.host.clone());
        config.management = Some(ListenerConfig { host, port });
    }

    let upstream = &mut config.upstream;
    if let Some(target) = env.non_empty("TARGET") {
        upstream.default_target = target;
    }
    if let Some(header) = env.non_empty("RELAY_TARGET_HEADER") {
        upstream.target_header = header;
    }
    if let Ok(header) = env.var("RELAY_CLIENT_IP_HEADER") {
        // 显式设为空表示不信任任何转发头
        upstream.client_ip_header = header.trim().to_string();
    }
    if let Some(targets) = parse_list(env, "RELAY_ALLOWED_TARGETS") {
        upstream.allowed_targets = targets;
    }
    if let Some(mode) = parse_env(env, "RELAY_ALLOW_LIST_MODE")? {
        upstream.allow_list_mode = mode;
    }
    if let Some(bytes) = parse_env(env, "RELAY_MAX_BODY_BYTES")? {
        upstream.max_body_bytes = bytes;
    }
    if let Some(secs) = parse_env(env, "RELAY_UPSTREAM_TIMEOUT_SECS")? {
        upstream.timeout_secs = secs;
    }
    for rule in &mut upstream.credentials {
        if let Some(secret) = rule.secret_env.as_deref().and_then(|key| env.non_empty(key)) {
            rule.secret = Some(Secret::new(secret));
        }
    }

    if let Some(secs) = parse_env(env, "RELAY_RATE_LIMIT_WINDOW_SECS")? {
        config.rate_limit.window_secs = secs;
    }
    if let Some(max) = parse_env(env, "RELAY_RATE_LIMIT_MAX")? {
        config.rate_limit.max_requests = max;
    }
    if let Some(secs) = parse_env(env, "RELAY_RATE_LIMIT_SWEEP_SECS")? {
        config.rate_limit.sweep_interval_secs = secs;
    }

    if let Some(hosts) = parse_list(env, "RELAY_INSPECT_HOSTS") {
        config.inspection.hosts = hosts;
    }
    if let Some(models) = parse_list(env, "RELAY_ALLOWED_MODELS") {
        config.inspection.allowed_models = models;
    }
    if let Some(level) = env.non_empty("RELAY_LOG_LEVEL") {
        config.log_level = Some(level);
    }

    Ok(())
}
