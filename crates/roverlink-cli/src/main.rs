//! Roverlink CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "roverlink", version, about = "Rover BLE 会话管理工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描附近外设
    Scan {
        /// 按服务 UUID 过滤 (可多次指定，不指定则不过滤)
        #[arg(short, long)]
        service: Vec<String>,
    },
    /// 停止扫描
    StopScan,
    /// 连接外设
    Connect {
        /// 外设地址，如 AA:BB:CC:DD:EE:FF
        id: String,
    },
    /// 断开当前连接
    Disconnect,
    /// 开关特征通知
    Notify {
        /// 服务 UUID
        svc: String,
        /// 特征 UUID
        chr: String,
        /// 取消订阅而非开启
        #[arg(long)]
        off: bool,
    },
    /// 读特征值
    Read {
        /// 服务 UUID
        svc: String,
        /// 特征 UUID
        chr: String,
    },
    /// 写特征值
    Write {
        /// 服务 UUID
        svc: String,
        /// 特征 UUID
        chr: String,
        /// 十六进制负载，如 01ff
        val: String,
        /// 不等对端回执的快写模式
        #[arg(long)]
        no_response: bool,
    },
    /// 查询当前连接的信号强度
    Rssi,
    /// 订阅事件流并打印
    Listen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { service } => {
            println!("🔍 扫描外设...");
            client::send_request(client::IpcRequest::StartScan { services: service }).await?;
            println!("   事件见 roverlink listen");
        }
        Commands::StopScan => {
            client::send_request(client::IpcRequest::StopScan).await?;
        }
        Commands::Connect { id } => {
            println!("🔗 连接 {}", id);
            client::send_request(client::IpcRequest::Connect { id }).await?;
        }
        Commands::Disconnect => {
            client::send_request(client::IpcRequest::Disconnect).await?;
        }
        Commands::Notify { svc, chr, off } => {
            client::send_request(client::IpcRequest::SetNotify {
                svc,
                chr,
                enable: !off,
            })
            .await?;
        }
        Commands::Read { svc, chr } => {
            let resp = client::send_request(client::IpcRequest::Read { svc, chr }).await?;
            if let client::IpcResponse::Value { val } = resp {
                println!("{}", to_hex(&val));
            }
        }
        Commands::Write {
            svc,
            chr,
            val,
            no_response,
        } => {
            let val = from_hex(&val)?;
            client::send_request(client::IpcRequest::Write {
                svc,
                chr,
                val,
                with_response: !no_response,
            })
            .await?;
        }
        Commands::Rssi => {
            let resp = client::send_request(client::IpcRequest::ReadRssi).await?;
            if let client::IpcResponse::Rssi { value } = resp {
                println!("{} dBm", value);
            }
        }
        Commands::Listen => {
            client::listen().await?;
        }
    }

    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    // 先挡掉非 ASCII，后面的按字节切片才不会落在字符中间
    if !s.is_ascii() {
        bail!("invalid hex payload: {s}");
    }
    if s.len() % 2 != 0 {
        bail!("hex payload must have an even number of digits");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| anyhow::anyhow!("invalid hex payload: {s}"))
        })
        .collect()
}
