//! # 服务启动与关闭
//!
//! 协调代理服务器、可选的管理服务器与限流清理任务的生命周期。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::app::AppContext;
use crate::config::AppConfig;
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::management::ManagementServer;
use crate::proxy::ProxyServer;
use crate::{lerror, linfo};

type ServerTask = JoinHandle<Result<()>>;
type TaskResult = std::result::Result<Result<()>, JoinError>;

/// 等待关闭通知
async fn shutdown_signal(mut receiver: watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            return;
        }
    }
}

async fn handle_ctrl_c_signal() -> String {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "Ctrl+C signal".to_string(),
        Err(e) => {
            lerror!(
                "system",
                LogStage::Shutdown,
                LogComponent::ServerSetup,
                "ctrl_c_error",
                &format!("Failed to listen for Ctrl+C: {e:?}")
            );
            "Ctrl+C handler error".to_string()
        }
    }
}

/// 记录服务器任务的退出结果，错误与 panic 原样向上返回
fn task_outcome(server_name: &str, result: TaskResult) -> Result<String> {
    let op = server_name.to_lowercase().replace(' ', "_");
    match result {
        Ok(Ok(())) => Ok(format!("{server_name} exit")),
        Ok(Err(e)) => {
            lerror!(
                "system",
                LogStage::Shutdown,
                LogComponent::ServerSetup,
                &format!("{op}_error"),
                &format!("{server_name} error: {e}")
            );
            Err(e)
        }
        Err(e) => {
            lerror!(
                "system",
                LogStage::Shutdown,
                LogComponent::ServerSetup,
                &format!("{op}_panic"),
                &format!("{server_name} panicked: {e:?}")
            );
            Err(crate::error!(Internal, format!("{server_name} panicked"), e))
        }
    }
}

/// 触发关闭的事件
enum Stopped {
    Signal(String),
    Proxy(TaskResult),
    Management(TaskResult),
}

/// 管理服务器未启用时永不完成
async fn await_optional(task: Option<&mut ServerTask>) -> TaskResult {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

/// 启动全部服务并阻塞到 Ctrl+C 或任一服务器退出
pub async fn run_servers(config: AppConfig) -> Result<()> {
    let context = Arc::new(AppContext::build(config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = context
        .limiter
        .spawn_sweeper(context.policy.rate_limit.sweep_interval);

    let proxy_server = ProxyServer::new(
        context.config.server.clone(),
        Arc::clone(&context.dispatcher),
    );
    let mut proxy_task: ServerTask =
        tokio::spawn(proxy_server.serve(shutdown_signal(shutdown_rx.clone())));

    let mut management_task: Option<ServerTask> = context.config.management.clone().map(|listener| {
        let server = ManagementServer::new(listener, Arc::clone(&context));
        tokio::spawn(server.serve(shutdown_signal(shutdown_rx.clone())))
    });

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::ServerSetup,
        "servers_started",
        &format!(
            "Relay started, default target {}, allow-list {}",
            context.policy.default_target, context.policy.allow_list.mode
        )
    );

    let stopped = tokio::select! {
        reason = handle_ctrl_c_signal() => Stopped::Signal(reason),
        result = &mut proxy_task => Stopped::Proxy(result),
        result = await_optional(management_task.as_mut()) => Stopped::Management(result),
    };

    // 已完成的 JoinHandle 不能再次 await
    let (outcome, proxy_done, management_done) = match stopped {
        Stopped::Signal(reason) => (Ok(reason), false, false),
        Stopped::Proxy(result) => (task_outcome("Proxy server", result), true, false),
        Stopped::Management(result) => (task_outcome("Management server", result), false, true),
    };
    let shutdown_reason = match &outcome {
        Ok(reason) => reason.clone(),
        Err(e) => e.to_string(),
    };

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::ServerSetup,
        "shutdown_initiated",
        &format!("Graceful shutdown: {shutdown_reason}")
    );

    let _ = shutdown_tx.send(true);
    sweeper.abort();

    let mut failure = outcome.err();
    if !proxy_done {
        if let Err(e) = task_outcome("Proxy server", proxy_task.await) {
            failure.get_or_insert(e);
        }
    }
    if let Some(task) = management_task.filter(|_| !management_done) {
        if let Err(e) = task_outcome("Management server", task.await) {
            failure.get_or_insert(e);
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::ServerSetup,
        "servers_stopped",
        "All servers stopped"
    );
    Ok(())
}
