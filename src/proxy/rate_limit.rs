//! # 客户端速率限制
//!
//! 固定窗口计数：每个客户端标识一个窗口，窗口过期后在下一次访问时重置。
//! 读-改-写在 `DashMap` 分片锁内完成，同一客户端的并发请求不会越过上限。
//! 后台清理任务只用于回收长期不活跃的条目。

use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub const RATE_LIMIT_HEADER: HeaderName = HeaderName::from_static("ratelimit");
pub const RATE_LIMIT_POLICY_HEADER: HeaderName = HeaderName::from_static("ratelimit-policy");

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// 准入判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// 距离当前窗口结束的时间
    pub reset_after: Duration,
    pub window: Duration,
}

impl RateLimitDecision {
    /// 向上取整的重置秒数
    #[must_use]
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// 写入 `RateLimit-Policy` / `RateLimit` 组合头，拒绝时附带 `Retry-After`
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let reset = self.reset_secs();
        let policy = format!("{};w={}", self.limit, self.window.as_secs());
        let combined = format!(
            "limit={}, remaining={}, reset={reset}",
            self.limit, self.remaining
        );

        if let Ok(value) = HeaderValue::from_str(&policy) {
            headers.insert(RATE_LIMIT_POLICY_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&combined) {
            headers.insert(RATE_LIMIT_HEADER, value);
        }
        if !self.allowed {
            headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(reset));
        }
    }
}

/// 按客户端标识计数的速率限制器
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: DashMap<String, WindowState>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            windows: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub const fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// 对 `key` 做一次准入判定
    ///
    /// 窗口不存在或已满 `window` 时开启新窗口；否则在未达上限时计数加一。
    /// 拒绝时计数保持为上限值。
    pub fn admit(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut state = self
            .windows
            .entry(key.to_string())
            .or_insert(WindowState {
                window_start: now,
                count: 0,
            });

        if now.saturating_duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }

        let allowed = state.count < self.max_requests;
        if allowed {
            state.count += 1;
        }

        let elapsed = now.saturating_duration_since(state.window_start);
        RateLimitDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests - state.count,
            reset_after: self.window.saturating_sub(elapsed),
            window: self.window,
        }
    }

    /// 清理已过期的窗口，返回清理数量
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, state| now.saturating_duration_since(state.window_start) < self.window);
        before.saturating_sub(self.windows.len())
    }

    /// 当前跟踪的客户端数量
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// 启动后台清理任务
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::RateLimiter,
            "sweeper_start",
            "Rate limit sweeper started",
            interval_secs = interval.as_secs()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 首次 tick 立即返回
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_expired(Instant::now());
                if removed > 0 {
                    ldebug!(
                        "system",
                        LogStage::Maintenance,
                        LogComponent::RateLimiter,
                        "sweep",
                        "Evicted expired rate limit windows",
                        removed = removed,
                        tracked = limiter.tracked_clients()
                    );
                }
            }
        })
    }
}
