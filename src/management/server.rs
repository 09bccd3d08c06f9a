//! # 管理服务器
//!
//! Axum HTTP服务器，提供存活检查与运行信息

use crate::app::AppContext;
use crate::config::ListenerConfig;
use crate::error::Result;
use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use crate::management::handlers;
use axum::Router;
use axum::routing::get;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// 管理服务器应用状态
#[derive(Clone)]
pub struct AppState {
    context: Arc<AppContext>,
}

impl AppState {
    #[must_use]
    pub const fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

impl Deref for AppState {
    type Target = AppContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

/// 构建管理路由
pub fn create_router(context: Arc<AppContext>) -> Router {
    let api_routes = Router::new().route("/system/info", get(handlers::get_system_info));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(handlers::health_handler))
        .route("/ping", get(handlers::ping_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(AppState::new(context))
}

pub struct ManagementServer {
    listener: ListenerConfig,
    router: Router,
}

impl ManagementServer {
    #[must_use]
    pub fn new(listener: ListenerConfig, context: Arc<AppContext>) -> Self {
        Self {
            listener,
            router: create_router(context),
        }
    }

    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = self.listener.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            crate::error!(ServerStart, format!("无法绑定管理端口 {address}"), e)
        })?;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Management,
            "server_start",
            &format!("Starting management server on {address}")
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::error!(Network, format!("Management server error: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, Secret};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn context() -> Arc<AppContext> {
        let mut config = AppConfig::default();
        config.upstream.credentials[0].secret = Some(Secret::new("sk-secret-value"));
        Arc::new(AppContext::build(config).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(create_router(context()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_system_info_never_exposes_secrets() {
        let (status, body) = get_json(create_router(context()), "/api/system/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let proxy = &body["data"]["proxy"];
        assert_eq!(proxy["default_target"], "https://api.openai.com");
        assert_eq!(proxy["allow_list_mode"], "enforced");
        assert_eq!(proxy["credentials"][0]["configured"], true);
        assert_eq!(proxy["credentials"][1]["configured"], false);
        assert_eq!(proxy["rate_limit"]["max_requests"], 3);
        assert!(!body.to_string().contains("sk-secret-value"));
    }
}
