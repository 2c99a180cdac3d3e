//! Roverlink Daemon
//!
//! 后台守护进程，负责：
//! - 持有 BLE 会话 actor 与 btleplug 射频后端
//! - 通过 Unix Socket 接收 CLI 命令
//! - 向订阅连接推送事件流

mod ipc;

use anyhow::Result;
use roverlink_core::{BleSession, BtlePlugRadio, Settings, radio_channel};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,roverlink_core=debug")),
        )
        .try_init();

    tracing::info!("Roverlink Daemon starting...");

    let settings = Settings::load();

    let (callbacks, radio_events) = radio_channel();
    let radio = BtlePlugRadio::new(callbacks).await?;
    let handle = BleSession::spawn(Arc::new(radio), radio_events, &settings);

    ipc::run_ipc_server(handle).await
}
