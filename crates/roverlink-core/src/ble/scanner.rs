//! 扫描控制器
//!
//! 持有发现阶段的全部状态：发起/停止过滤扫描，把平台的广播回调转成
//! `scanResult` 事件序列。扫描错误只走事件流，不向任何调用方直接返回
//! 失败——扫描是没有单一等待者的后台活动。
//!
//! 平台可能对同一外设重复上报广播，这里不做去重，由消费方按 `id` 判重。

use super::ScanFilter;
use super::radio::Radio;
use crate::event::{Event, EventSink};
use std::sync::Arc;

/// 扫描器拿不到时上报的错误码（原生栈此时没有任何编号可用）
const SCANNER_UNAVAILABLE: i32 = -1;

pub(crate) struct ScanController {
    radio: Arc<dyn Radio>,
    events: EventSink,
    active: bool,
}

impl ScanController {
    pub fn new(radio: Arc<dyn Radio>, events: EventSink) -> Self {
        Self {
            radio,
            events,
            active: false,
        }
    }

    /// 发起扫描。平台拒绝时仅发 `scanError`，状态不变。
    pub fn start(&mut self, filter: &ScanFilter) {
        if !self.radio.start_scan(filter) {
            tracing::warn!("platform scanner unavailable");
            self.events.emit(Event::ScanError {
                code: SCANNER_UNAVAILABLE,
                msg: Some("no scanner".into()),
            });
            return;
        }
        tracing::debug!(services = filter.services.len(), "scan started");
        self.active = true;
        self.events.emit(Event::ScanStarted);
    }

    /// 停止扫描。幂等：未在扫描时也发 `scanStopped`。
    pub fn stop(&mut self) {
        self.radio.stop_scan();
        self.active = false;
        self.events.emit(Event::ScanStopped);
    }

    /// 平台广播回调。停止扫描后仍在队列里的残余回调被丢弃，
    /// 保证 `connState(connecting)` 之后不会再冒出 `scanResult`。
    pub fn on_scan_result(&self, id: String, name: String) {
        if !self.active {
            tracing::trace!(%id, "discovery after scan stop, dropped");
            return;
        }
        self.events.emit(Event::ScanResult { id, name });
    }

    /// 平台扫描失败回调；不终止扫描，后续广播仍会上报。
    pub fn on_scan_failed(&self, code: i32) {
        tracing::warn!(code, "scan failed");
        self.events.emit(Event::ScanError { code, msg: None });
    }
}
