//! 基于 btleplug 的射频后端
//!
//! 把 [`Radio`] 的"同步发起 / 异步回调"约定映射到 btleplug 的 async
//! API：每个入口要么同步拒绝，要么 spawn 一个任务去完成原生调用，完成
//! 结果通过 [`RadioCallbacks`] 送回会话 actor。适配器事件流（广播、
//! 对端断开）由一个常驻泵任务转发。

use super::radio::{CharacteristicInfo, LinkState, Radio, RadioCallbacks, ServiceInfo};
use super::{CCCD_UUID, GATT_FAILURE, GATT_SUCCESS, ScanFilter};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Descriptor, Manager as _, Peripheral as _,
    ScanFilter as BtleScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// 后端构建/寻址错误
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Peripheral not found: {0}")]
    PeripheralNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] btleplug::Error),
}

pub struct BtlePlugRadio {
    adapter: Adapter,
    callbacks: RadioCallbacks,
    link: Arc<Mutex<Option<Peripheral>>>,
    scanning: Arc<AtomicBool>,
}

impl BtlePlugRadio {
    /// 取第一个蓝牙适配器并启动适配器事件泵
    pub async fn new(callbacks: RadioCallbacks) -> Result<Self, BackendError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(BackendError::NoAdapter)?;

        let radio = Self {
            adapter,
            callbacks,
            link: Arc::new(Mutex::new(None)),
            scanning: Arc::new(AtomicBool::new(false)),
        };
        radio.spawn_central_pump().await?;
        Ok(radio)
    }

    async fn spawn_central_pump(&self) -> Result<(), BackendError> {
        let mut events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let callbacks = self.callbacks.clone();
        let scanning = self.scanning.clone();
        let link = self.link.clone();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        // 平台会对同一外设反复上报，去重交给消费方
                        if !scanning.load(Ordering::SeqCst) {
                            continue;
                        }
                        let Ok(peripheral) = adapter.peripheral(&id).await else {
                            continue;
                        };
                        let Ok(Some(props)) = peripheral.properties().await else {
                            continue;
                        };
                        callbacks.on_scan_result(
                            props.address.to_string(),
                            props.local_name.unwrap_or_default(),
                        );
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        // 只关心当前链路的对端断开
                        let current = link.lock().unwrap().clone();
                        if current.map(|p| p.id()) == Some(id) {
                            link.lock().unwrap().take();
                            callbacks
                                .on_connection_state_change(GATT_SUCCESS, LinkState::Disconnected);
                        }
                    }
                    _ => {}
                }
            }
            tracing::debug!("adapter event stream ended");
        });
        Ok(())
    }

    fn current_link(&self) -> Option<Peripheral> {
        self.link.lock().unwrap().clone()
    }

    fn find_characteristic(peripheral: &Peripheral, svc: Uuid, chr: Uuid) -> Option<Characteristic> {
        peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == svc)?
            .characteristics
            .into_iter()
            .find(|c| c.uuid == chr)
    }

    fn find_descriptor(
        peripheral: &Peripheral,
        svc: Uuid,
        chr: Uuid,
        descriptor: Uuid,
    ) -> Option<Descriptor> {
        Self::find_characteristic(peripheral, svc, chr)?
            .descriptors
            .into_iter()
            .find(|d| d.uuid == descriptor)
    }
}

impl Radio for BtlePlugRadio {
    fn start_scan(&self, filter: &ScanFilter) -> bool {
        let adapter = self.adapter.clone();
        let callbacks = self.callbacks.clone();
        let scanning = self.scanning.clone();
        let btle_filter = BtleScanFilter {
            services: filter.services.clone(),
        };
        scanning.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            if let Err(e) = adapter.start_scan(btle_filter).await {
                tracing::warn!("start_scan failed: {}", e);
                scanning.store(false, Ordering::SeqCst);
                callbacks.on_scan_failed(GATT_FAILURE);
            }
        });
        true
    }

    fn stop_scan(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                tracing::debug!("stop_scan failed: {}", e);
            }
        });
    }

    fn connect(&self, peripheral: &str) {
        let adapter = self.adapter.clone();
        let callbacks = self.callbacks.clone();
        let link = self.link.clone();
        let address = peripheral.to_string();
        tokio::spawn(async move {
            let peripheral = match find_peripheral(&adapter, &address).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(%address, "connect failed: {}", e);
                    callbacks.on_connection_state_change(GATT_FAILURE, LinkState::Disconnected);
                    return;
                }
            };
            if let Err(e) = peripheral.connect().await {
                tracing::warn!(%address, "connect failed: {}", e);
                callbacks.on_connection_state_change(GATT_FAILURE, LinkState::Disconnected);
                return;
            }
            *link.lock().unwrap() = Some(peripheral);
            callbacks.on_connection_state_change(GATT_SUCCESS, LinkState::Connected);
        });
    }

    fn disconnect(&self) {
        if let Some(peripheral) = self.link.lock().unwrap().take() {
            tokio::spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    tracing::debug!("disconnect failed: {}", e);
                }
            });
        }
    }

    fn discover_services(&self) {
        let Some(peripheral) = self.current_link() else {
            self.callbacks.on_services_discovered(GATT_FAILURE, Vec::new());
            return;
        };
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                tracing::warn!("service discovery failed: {}", e);
                callbacks.on_services_discovered(GATT_FAILURE, Vec::new());
                return;
            }
            let services: Vec<ServiceInfo> = peripheral
                .services()
                .into_iter()
                .map(|s| ServiceInfo {
                    uuid: s.uuid,
                    characteristics: s
                        .characteristics
                        .into_iter()
                        .map(|c| CharacteristicInfo {
                            uuid: c.uuid,
                            has_cccd: c.descriptors.iter().any(|d| d.uuid == CCCD_UUID),
                        })
                        .collect(),
                })
                .collect();

            // 通知泵随链路存续，流在断开时自然终止
            let pump_peripheral = peripheral.clone();
            let pump_callbacks = callbacks.clone();
            tokio::spawn(async move {
                let Ok(mut notifications) = pump_peripheral.notifications().await else {
                    tracing::warn!("notification stream unavailable");
                    return;
                };
                while let Some(n) = notifications.next().await {
                    let svc = pump_peripheral
                        .services()
                        .into_iter()
                        .find(|s| s.characteristics.iter().any(|c| c.uuid == n.uuid))
                        .map(|s| s.uuid);
                    if let Some(svc) = svc {
                        pump_callbacks.on_notification(svc, n.uuid, n.value);
                    }
                }
            });

            callbacks.on_services_discovered(GATT_SUCCESS, services);
        });
    }

    fn set_characteristic_notification(&self, svc: Uuid, chr: Uuid, enable: bool) {
        let Some(peripheral) = self.current_link() else {
            return;
        };
        let Some(target) = Self::find_characteristic(&peripheral, svc, chr) else {
            return;
        };
        tokio::spawn(async move {
            let result = if enable {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            if let Err(e) = result {
                tracing::warn!(%chr, enable, "notification toggle failed: {}", e);
            }
        });
    }

    fn write_descriptor(&self, svc: Uuid, chr: Uuid, descriptor: Uuid, value: Vec<u8>) {
        let Some(peripheral) = self.current_link() else {
            return;
        };
        let Some(target) = Self::find_descriptor(&peripheral, svc, chr, descriptor) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = peripheral.write_descriptor(&target, &value).await {
                tracing::warn!(%descriptor, "descriptor write failed: {}", e);
            }
        });
    }

    fn read(&self, svc: Uuid, chr: Uuid) -> bool {
        let Some(peripheral) = self.current_link() else {
            return false;
        };
        let Some(target) = Self::find_characteristic(&peripheral, svc, chr) else {
            return false;
        };
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            match peripheral.read(&target).await {
                Ok(value) => callbacks.on_characteristic_read(svc, chr, GATT_SUCCESS, value),
                Err(e) => {
                    tracing::warn!(%chr, "read failed: {}", e);
                    callbacks.on_characteristic_read(svc, chr, GATT_FAILURE, Vec::new());
                }
            }
        });
        true
    }

    fn write(&self, svc: Uuid, chr: Uuid, value: Vec<u8>, with_response: bool) -> bool {
        let Some(peripheral) = self.current_link() else {
            return false;
        };
        let Some(target) = Self::find_characteristic(&peripheral, svc, chr) else {
            return false;
        };
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            match peripheral.write(&target, &value, write_type).await {
                Ok(()) => callbacks.on_characteristic_write(svc, chr, GATT_SUCCESS),
                Err(e) => {
                    tracing::warn!(%chr, "write failed: {}", e);
                    callbacks.on_characteristic_write(svc, chr, GATT_FAILURE);
                }
            }
        });
        true
    }

    fn read_rssi(&self) -> bool {
        let Some(peripheral) = self.current_link() else {
            return false;
        };
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            // btleplug 没有专门的 RSSI 读取，取属性里的最近值
            let rssi = peripheral
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|props| props.rssi);
            match rssi {
                Some(value) => callbacks.on_rssi(GATT_SUCCESS, value),
                None => callbacks.on_rssi(GATT_FAILURE, 0),
            }
        });
        true
    }
}

/// 按地址在适配器已知外设里查找目标
async fn find_peripheral(adapter: &Adapter, address: &str) -> Result<Peripheral, BackendError> {
    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            if props.address.to_string().eq_ignore_ascii_case(address) {
                return Ok(peripheral);
            }
        }
    }
    Err(BackendError::PeripheralNotFound(address.to_string()))
}
