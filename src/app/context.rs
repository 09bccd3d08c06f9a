//! 应用上下文
//!
//! 统一持有跨模块共享的只读配置与服务实例，代理与管理接口共用一份。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::{AppConfig, ProxyPolicy};
use crate::error::Result;
use crate::proxy::{ProxyDispatcher, RateLimiter, UpstreamClient};

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub policy: Arc<ProxyPolicy>,
    pub limiter: Arc<RateLimiter>,
    pub dispatcher: Arc<ProxyDispatcher>,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl AppContext {
    /// 由已加载的配置构建全部共享组件
    pub fn build(config: AppConfig) -> Result<Self> {
        let policy = Arc::new(ProxyPolicy::from_config(&config)?);
        let limiter = Arc::new(RateLimiter::new(
            policy.rate_limit.window,
            policy.rate_limit.max_requests,
        ));
        let upstream = UpstreamClient::new(policy.upstream_timeout)?;
        let dispatcher = Arc::new(ProxyDispatcher::new(
            Arc::clone(&policy),
            Arc::clone(&limiter),
            upstream,
        ));

        Ok(Self {
            config: Arc::new(config),
            policy,
            limiter,
            dispatcher,
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}
