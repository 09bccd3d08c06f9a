//! # API Relay 主程序
//!
//! 读取配置、初始化日志并启动代理服务

use api_relay::{
    Result,
    config::{SystemEnv, load_config},
    lerror, linfo,
    logging::{self, LogComponent, LogStage},
    server_setup,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match load_config(&SystemEnv) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(None);
            lerror!(
                "system",
                LogStage::Startup,
                LogComponent::Config,
                "config_load_failed",
                &format!("配置加载失败: {e}")
            );
            std::process::exit(1);
        }
    };

    logging::init_logging(config.log_level.as_deref());

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "service_starting",
        "服务启动"
    );
    if let Err(e) = server_setup::run_servers(config).await {
        lerror!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "service_start_failed",
            &format!("服务启动失败: {e}")
        );
        std::process::exit(1);
    }

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_shutdown",
        "服务正常关闭"
    );
    Ok(())
}
