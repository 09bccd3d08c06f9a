//! # 代理服务器
//!
//! 基于 Axum 的代理入口：所有方法、所有路径都交给 `ProxyDispatcher` 处理。

use crate::config::ListenerConfig;
use crate::error::Result;
use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use crate::proxy::pipeline::ProxyDispatcher;
use axum::Router;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::response::Response;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// 构建代理路由
pub fn create_router(dispatcher: Arc<ProxyDispatcher>) -> Router {
    let body_limit = dispatcher.policy().max_body_bytes;
    Router::new()
        .fallback(proxy_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(dispatcher)
}

async fn proxy_handler(
    State(dispatcher): State<Arc<ProxyDispatcher>>,
    request: Request,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    dispatcher.dispatch(request, peer).await
}

/// 代理服务器
pub struct ProxyServer {
    listener: ListenerConfig,
    router: Router,
}

impl ProxyServer {
    #[must_use]
    pub fn new(listener: ListenerConfig, dispatcher: Arc<ProxyDispatcher>) -> Self {
        Self {
            listener,
            router: create_router(dispatcher),
        }
    }

    /// 绑定监听地址并运行，直到 `shutdown` 完成
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = self.listener.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            crate::error!(ServerStart, format!("无法绑定代理端口 {address}"), e)
        })?;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::ServerSetup,
            "proxy_server_start",
            &format!("Proxy listening on {address}")
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::error!(Network, format!("Proxy server error: {e}")))?;

        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::ServerSetup,
            "proxy_server_stop",
            "Proxy server stopped"
        );
        Ok(())
    }
}
