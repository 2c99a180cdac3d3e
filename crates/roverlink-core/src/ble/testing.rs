//! 测试用假射频
//!
//! 记录每一次原生入口调用，回调由测试通过
//! [`RadioCallbacks`](super::radio::RadioCallbacks) 手工注入，
//! 使状态机无需硬件即可做确定性测试。

use super::ScanFilter;
use super::radio::Radio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// 假射频记录下的一次入口调用
#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    StartScan {
        services: Vec<Uuid>,
    },
    StopScan,
    Connect {
        peripheral: String,
    },
    Disconnect,
    DiscoverServices,
    SetNotification {
        svc: Uuid,
        chr: Uuid,
        enable: bool,
    },
    WriteDescriptor {
        svc: Uuid,
        chr: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    Read {
        svc: Uuid,
        chr: Uuid,
    },
    Write {
        svc: Uuid,
        chr: Uuid,
        value: Vec<u8>,
        with_response: bool,
    },
    ReadRssi,
}

/// 脚本化假射频
///
/// 各 `refuse_*` 开关让对应入口返回发起失败，用于覆盖同步失败路径。
#[derive(Clone, Default)]
pub struct FakeRadio {
    calls: Arc<Mutex<Vec<RadioCall>>>,
    pub refuse_scan: Arc<AtomicBool>,
    pub refuse_read: Arc<AtomicBool>,
    pub refuse_write: Arc<AtomicBool>,
    pub refuse_rssi: Arc<AtomicBool>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// 目前记录的全部调用
    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().unwrap().clone()
    }

    /// 取走并清空调用记录
    pub fn take_calls(&self) -> Vec<RadioCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, call: RadioCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Radio for FakeRadio {
    fn start_scan(&self, filter: &ScanFilter) -> bool {
        self.record(RadioCall::StartScan {
            services: filter.services.clone(),
        });
        !self.refuse_scan.load(Ordering::SeqCst)
    }

    fn stop_scan(&self) {
        self.record(RadioCall::StopScan);
    }

    fn connect(&self, peripheral: &str) {
        self.record(RadioCall::Connect {
            peripheral: peripheral.to_string(),
        });
    }

    fn disconnect(&self) {
        self.record(RadioCall::Disconnect);
    }

    fn discover_services(&self) {
        self.record(RadioCall::DiscoverServices);
    }

    fn set_characteristic_notification(&self, svc: Uuid, chr: Uuid, enable: bool) {
        self.record(RadioCall::SetNotification { svc, chr, enable });
    }

    fn write_descriptor(&self, svc: Uuid, chr: Uuid, descriptor: Uuid, value: Vec<u8>) {
        self.record(RadioCall::WriteDescriptor {
            svc,
            chr,
            descriptor,
            value,
        });
    }

    fn read(&self, svc: Uuid, chr: Uuid) -> bool {
        self.record(RadioCall::Read { svc, chr });
        !self.refuse_read.load(Ordering::SeqCst)
    }

    fn write(&self, svc: Uuid, chr: Uuid, value: Vec<u8>, with_response: bool) -> bool {
        self.record(RadioCall::Write {
            svc,
            chr,
            value,
            with_response,
        });
        !self.refuse_write.load(Ordering::SeqCst)
    }

    fn read_rssi(&self) -> bool {
        self.record(RadioCall::ReadRssi);
        !self.refuse_rssi.load(Ordering::SeqCst)
    }
}
