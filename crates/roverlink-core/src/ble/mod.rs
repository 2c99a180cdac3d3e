//! BLE 中心端会话核心
//!
//! - **scanner**: 扫描控制器，产生 `scanResult` 事件序列
//! - **session**: GATT 会话管理 actor（连接状态机 + 挂起请求表）
//! - **radio**: 平台射频栈抽象（同步发起 / 异步回调）
//! - **backend**: 基于 btleplug 的真实射频实现
//! - **testing**: 记录调用的脚本化假射频，供测试注入回调

pub mod backend;
pub mod radio;
pub mod scanner;
pub mod session;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// CCCD（客户端特征配置描述符），写入它来开关外设侧通知推送
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD 开启通知魔数
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
/// CCCD 关闭通知魔数
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Android GATT 状态码：成功
pub const GATT_SUCCESS: i32 = 0;
/// Android GATT 状态码：通用失败（0x101）
pub const GATT_FAILURE: i32 = 257;

/// 扫描过滤器：服务 UUID 集合，空集合表示匹配所有广播
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn services(services: Vec<Uuid>) -> Self {
        Self { services }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// 挂起请求的种类；每种同一时刻至多一个在途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
    Rssi,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Read => write!(f, "read"),
            OpKind::Write => write!(f, "write"),
            OpKind::Rssi => write!(f, "rssi"),
        }
    }
}

/// 面向调用方的请求级错误
///
/// 发起类错误（未连接、未知服务/特征、槽位占用、发起失败）同步返回，
/// 不会触碰事件流；平台异步失败通过回调落在挂起槽位上。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BleError {
    #[error("no active connection")]
    NotConnected,

    #[error("service not found: {0}")]
    UnknownService(Uuid),

    #[error("characteristic not found: {0}")]
    UnknownCharacteristic(Uuid),

    #[error("{0} already in flight")]
    Busy(OpKind),

    #[error("failed to issue {0}")]
    IssueFailed(OpKind),

    #[error("{op} failed with status {status}")]
    Gatt { op: OpKind, status: i32 },

    #[error("peripheral disconnected")]
    Disconnected,

    #[error("{0} timed out")]
    Timeout(OpKind),

    #[error("session closed")]
    Closed,
}

impl BleError {
    /// 短机器码，供 IPC 层透传给外部调用方
    pub fn code(&self) -> &'static str {
        match self {
            BleError::NotConnected => "notConnected",
            BleError::UnknownService(_) => "noSvc",
            BleError::UnknownCharacteristic(_) => "noChr",
            BleError::Busy(_) => "busy",
            BleError::IssueFailed(_) => "issueFailed",
            BleError::Gatt { .. } => "gatt",
            BleError::Disconnected => "disconnected",
            BleError::Timeout(_) => "timeout",
            BleError::Closed => "closed",
        }
    }
}
