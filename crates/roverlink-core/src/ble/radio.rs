//! 平台射频栈抽象
//!
//! 仿照 Android `BluetoothGatt`/`BluetoothLeScanner` 的调用约定建模：
//! 入口同步返回（部分带"是否成功发起"的布尔值），结果一律通过回调异步
//! 送达。后端把回调投递进 [`RadioCallbacks`]，会话 actor 在自己的消息
//! 循环里逐条消费，命令与回调因此天然串行，无需细粒度锁。

use super::ScanFilter;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 链路层状态，连接回调的 `new_state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// 服务发现得到的特征条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    /// 是否暴露 CCCD；决定 `set_notify` 要不要补一次描述符写
    pub has_cccd: bool,
}

/// 服务发现得到的服务条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    pub fn characteristic(&self, chr: Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics.iter().find(|c| c.uuid == chr)
    }
}

/// 平台侧异步回调，与原生栈的回调一一对应
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    ScanResult {
        id: String,
        name: String,
    },
    ScanFailed {
        code: i32,
    },
    ConnectionState {
        status: i32,
        link: LinkState,
    },
    ServicesDiscovered {
        status: i32,
        services: Vec<ServiceInfo>,
    },
    CharacteristicRead {
        svc: Uuid,
        chr: Uuid,
        status: i32,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        svc: Uuid,
        chr: Uuid,
        status: i32,
    },
    Notification {
        svc: Uuid,
        chr: Uuid,
        value: Vec<u8>,
    },
    Rssi {
        status: i32,
        value: i16,
    },
}

/// 后端向会话 actor 投递回调的句柄
#[derive(Clone)]
pub struct RadioCallbacks {
    tx: mpsc::UnboundedSender<RadioEvent>,
}

/// 会话 actor 消费回调的接收端
pub type RadioEvents = mpsc::UnboundedReceiver<RadioEvent>;

/// 建立一对回调句柄/接收端
pub fn radio_channel() -> (RadioCallbacks, RadioEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RadioCallbacks { tx }, rx)
}

impl RadioCallbacks {
    fn deliver(&self, event: RadioEvent) {
        // 会话已退出时回调无处可去，丢弃即可
        if self.tx.send(event).is_err() {
            tracing::trace!("radio callback dropped, session gone");
        }
    }

    pub fn on_scan_result(&self, id: impl Into<String>, name: impl Into<String>) {
        self.deliver(RadioEvent::ScanResult {
            id: id.into(),
            name: name.into(),
        });
    }

    pub fn on_scan_failed(&self, code: i32) {
        self.deliver(RadioEvent::ScanFailed { code });
    }

    pub fn on_connection_state_change(&self, status: i32, link: LinkState) {
        self.deliver(RadioEvent::ConnectionState { status, link });
    }

    pub fn on_services_discovered(&self, status: i32, services: Vec<ServiceInfo>) {
        self.deliver(RadioEvent::ServicesDiscovered { status, services });
    }

    pub fn on_characteristic_read(&self, svc: Uuid, chr: Uuid, status: i32, value: Vec<u8>) {
        self.deliver(RadioEvent::CharacteristicRead {
            svc,
            chr,
            status,
            value,
        });
    }

    pub fn on_characteristic_write(&self, svc: Uuid, chr: Uuid, status: i32) {
        self.deliver(RadioEvent::CharacteristicWritten { svc, chr, status });
    }

    pub fn on_notification(&self, svc: Uuid, chr: Uuid, value: Vec<u8>) {
        self.deliver(RadioEvent::Notification { svc, chr, value });
    }

    pub fn on_rssi(&self, status: i32, value: i16) {
        self.deliver(RadioEvent::Rssi { status, value });
    }
}

/// 射频后端需要实现的原生入口
///
/// 所有方法不得阻塞：要么立即把工作排给平台，要么用返回值报告发起失败。
/// `read`/`write`/`read_rssi` 的布尔返回值对应原生 `readCharacteristic`
/// 等入口的同步结果；`false` 表示平台拒绝发起，不会再有回调。
pub trait Radio: Send + Sync + 'static {
    /// 发起扫描；返回 `false` 表示拿不到平台扫描器
    fn start_scan(&self, filter: &ScanFilter) -> bool;

    /// 停止扫描；对未在扫描的状态也必须安全
    fn stop_scan(&self);

    /// 向目标外设发起 GATT 连接，结果经连接回调送达
    fn connect(&self, peripheral: &str);

    /// 断开并释放当前链路的原生资源
    fn disconnect(&self);

    /// 对当前链路发起服务发现，结果经服务发现回调送达
    fn discover_services(&self);

    /// 开关本地通知分发
    fn set_characteristic_notification(&self, svc: Uuid, chr: Uuid, enable: bool);

    /// 写描述符（fire-and-forget，本核心只用于 CCCD）
    fn write_descriptor(&self, svc: Uuid, chr: Uuid, descriptor: Uuid, value: Vec<u8>);

    fn read(&self, svc: Uuid, chr: Uuid) -> bool;

    fn write(&self, svc: Uuid, chr: Uuid, value: Vec<u8>, with_response: bool) -> bool;

    fn read_rssi(&self) -> bool;
}
