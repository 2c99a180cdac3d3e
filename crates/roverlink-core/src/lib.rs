//! Roverlink Core Library
//!
//! 单外设 BLE 中心角色会话管理库：扫描、GATT 连接、服务发现、
//! 特征读写、通知订阅与 RSSI 查询
//!
//! # 模块
//!
//! - **ble**: 扫描控制、GATT 会话 actor、btleplug 射频后端
//! - **event**: 对外事件流（扫描结果、连接状态、读写/通知回执）
//! - **config**: 超时与扫描过滤配置
//!
//! # 使用示例
//!
//! ```ignore
//! use roverlink_core::{BleSession, BtlePlugRadio, Settings, radio_channel};
//!
//! // 1. 建回调通道并初始化射频后端
//! let (callbacks, radio_events) = radio_channel();
//! let radio = BtlePlugRadio::new(callbacks).await?;
//!
//! // 2. 启动会话 actor，拿到句柄
//! let settings = Settings::load();
//! let handle = BleSession::spawn(Arc::new(radio), radio_events, &settings);
//!
//! // 3. 订阅事件流，扫描并连接
//! let mut events = handle.subscribe();
//! handle.start_scan(settings.scan_filter())?;
//! handle.connect("AA:BB:CC:DD:EE:FF")?;
//!
//! // 4. 服务发现完成后读写特征
//! let value = handle.read(svc, chr).await?;
//! ```

pub mod ble;
pub mod config;
pub mod event;

// BLE re-exports
pub use ble::backend::{BackendError, BtlePlugRadio};
pub use ble::radio::{
    CharacteristicInfo, LinkState, Radio, RadioCallbacks, RadioEvent, RadioEvents, ServiceInfo,
    radio_channel,
};
pub use ble::session::{BleHandle, BleSession, ConnectionState};
pub use ble::{
    BleError, CCCD_UUID, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE, GATT_FAILURE,
    GATT_SUCCESS, OpKind, ScanFilter,
};

// Config re-exports
pub use config::Settings;

// Event re-exports
pub use event::{ConnStateLabel, Event, EventSink};
