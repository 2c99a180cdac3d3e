//! IPC Client - 与守护进程通信

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("roverlink.sock")
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IpcRequest {
    StartScan {
        #[serde(default)]
        services: Vec<String>,
    },
    StopScan,
    Connect {
        id: String,
    },
    Disconnect,
    SetNotify {
        svc: String,
        chr: String,
        enable: bool,
    },
    Read {
        svc: String,
        chr: String,
    },
    Write {
        svc: String,
        chr: String,
        val: Vec<u8>,
        #[serde(default)]
        with_response: bool,
    },
    ReadRssi,
    Subscribe,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IpcResponse {
    Ok,
    Error { code: String, message: String },
    Value { val: Vec<u8> },
    Rssi { value: i16 },
}

async fn connect_daemon() -> Result<UnixStream> {
    let path = socket_path();
    match UnixStream::connect(&path).await {
        Ok(s) => Ok(s),
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 roverlink-daemon 正在运行");
            Err(e.into())
        }
    }
}

pub async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let stream = connect_daemon().await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // 发送请求
    let json = serde_json::to_string(&request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    // 读取响应
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: IpcResponse = serde_json::from_str(&line)?;

    match &response {
        IpcResponse::Ok => println!("✅ ok"),
        IpcResponse::Error { code, message } => eprintln!("❌ [{}] {}", code, message),
        _ => {}
    }

    Ok(response)
}

/// 订阅事件流并把每行事件原样打印，直到守护进程断开或 Ctrl-C
pub async fn listen() -> Result<()> {
    let stream = connect_daemon().await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let json = serde_json::to_string(&IpcRequest::Subscribe)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    // 第一行是订阅回执
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let ack: IpcResponse = serde_json::from_str(&line)?;
    if let IpcResponse::Error { code, message } = ack {
        eprintln!("❌ [{}] {}", code, message);
        return Ok(());
    }
    println!("📡 listening for events...");

    line.clear();
    while reader.read_line(&mut line).await? > 0 {
        print!("{}", line);
        line.clear();
    }
    Ok(())
}
