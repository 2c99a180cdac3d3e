//! IPC Server - Unix Domain Socket 通信
//!
//! 请求/响应各占一行 JSON。`subscribe` 请求把当前连接转为事件推送流，
//! 此后该连接上只有事件，不再处理请求。

use anyhow::Result;
use roverlink_core::{BleError, BleHandle, ScanFilter};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_stream::StreamExt;
use uuid::Uuid;

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

impl IpcResponse {
    fn from_ble(err: &BleError) -> Self {
        IpcResponse::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    fn bad_uuid(raw: &str) -> Self {
        IpcResponse::Error {
            code: "badUuid".to_string(),
            message: format!("invalid uuid: {raw}"),
        }
    }
}

pub async fn run_ipc_server(handle: BleHandle) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_client(stream, handle.clone()));
            }
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, handle: BleHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = IpcResponse::Error {
                    code: "badRequest".to_string(),
                    message: format!("Invalid request: {e}"),
                };
                writer
                    .write_all(serde_json::to_string(&resp)?.as_bytes())
                    .await?;
                writer.write_all(b"\n").await?;
                line.clear();
                continue;
            }
        };

        tracing::debug!("request: {:?}", request);

        if matches!(request, IpcRequest::Subscribe) {
            // 连接转为事件流，由该客户端独占
            let mut events = handle.subscribe();
            writer
                .write_all(serde_json::to_string(&IpcResponse::Ok)?.as_bytes())
                .await?;
            writer.write_all(b"\n").await?;
            while let Some(event) = events.next().await {
                writer
                    .write_all(serde_json::to_string(&event)?.as_bytes())
                    .await?;
                writer.write_all(b"\n").await?;
            }
            return Ok(());
        }

        let response = dispatch(&handle, request).await;
        writer
            .write_all(serde_json::to_string(&response)?.as_bytes())
            .await?;
        writer.write_all(b"\n").await?;
        line.clear();
    }

    Ok(())
}

async fn dispatch(handle: &BleHandle, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::StartScan { services } => {
            let mut parsed = Vec::with_capacity(services.len());
            for raw in &services {
                match Uuid::parse_str(raw) {
                    Ok(uuid) => parsed.push(uuid),
                    Err(_) => return IpcResponse::bad_uuid(raw),
                }
            }
            let filter = if parsed.is_empty() {
                ScanFilter::any()
            } else {
                ScanFilter::services(parsed)
            };
            ack(handle.start_scan(filter))
        }
        IpcRequest::StopScan => ack(handle.stop_scan()),
        IpcRequest::Connect { id } => ack(handle.connect(id)),
        IpcRequest::Disconnect => ack(handle.disconnect()),
        IpcRequest::SetNotify { svc, chr, enable } => {
            let (svc, chr) = match parse_target(&svc, &chr) {
                Ok(pair) => pair,
                Err(resp) => return resp,
            };
            ack(handle.set_notify(svc, chr, enable).await)
        }
        IpcRequest::Read { svc, chr } => {
            let (svc, chr) = match parse_target(&svc, &chr) {
                Ok(pair) => pair,
                Err(resp) => return resp,
            };
            match handle.read(svc, chr).await {
                Ok(val) => IpcResponse::Value { val },
                Err(e) => IpcResponse::from_ble(&e),
            }
        }
        IpcRequest::Write {
            svc,
            chr,
            val,
            with_response,
        } => {
            let (svc, chr) = match parse_target(&svc, &chr) {
                Ok(pair) => pair,
                Err(resp) => return resp,
            };
            ack(handle.write(svc, chr, val, with_response).await)
        }
        IpcRequest::ReadRssi => match handle.read_rssi().await {
            Ok(value) => IpcResponse::Rssi { value },
            Err(e) => IpcResponse::from_ble(&e),
        },
        IpcRequest::Subscribe => unreachable!("handled by the connection loop"),
    }
}

fn ack(result: Result<(), BleError>) -> IpcResponse {
    match result {
        Ok(()) => IpcResponse::Ok,
        Err(e) => IpcResponse::from_ble(&e),
    }
}

fn parse_target(svc: &str, chr: &str) -> Result<(Uuid, Uuid), IpcResponse> {
    let svc_uuid = Uuid::parse_str(svc).map_err(|_| IpcResponse::bad_uuid(svc))?;
    let chr_uuid = Uuid::parse_str(chr).map_err(|_| IpcResponse::bad_uuid(chr))?;
    Ok((svc_uuid, chr_uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format() {
        let req: IpcRequest =
            serde_json::from_str(r#"{"type":"connect","id":"AA:BB:CC:DD:EE:FF"}"#).unwrap();
        assert!(matches!(req, IpcRequest::Connect { ref id } if id == "AA:BB:CC:DD:EE:FF"));

        let req: IpcRequest = serde_json::from_str(
            r#"{"type":"write","svc":"0000180f-0000-1000-8000-00805f9b34fb","chr":"00002a19-0000-1000-8000-00805f9b34fb","val":[1,2]}"#,
        )
        .unwrap();
        match req {
            IpcRequest::Write {
                val, with_response, ..
            } => {
                assert_eq!(val, vec![1, 2]);
                // withResponse 缺省为不带回执
                assert!(!with_response);
            }
            other => panic!("unexpected request: {other:?}"),
        }

        let req: IpcRequest = serde_json::from_str(r#"{"type":"startScan"}"#).unwrap();
        assert!(matches!(req, IpcRequest::StartScan { ref services } if services.is_empty()));
    }

    #[test]
    fn response_wire_format() {
        let json = serde_json::to_value(&IpcResponse::Rssi { value: -60 }).unwrap();
        assert_eq!(json["type"], "rssi");
        assert_eq!(json["value"], -60);

        let json = serde_json::to_value(&IpcResponse::bad_uuid("nope")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "badUuid");
    }
}
