//! 事件流模块
//!
//! 核心对外只有一条事件通道：扫描结果、连接状态、通知负载等都作为
//! 带 `type` 判别字段的 JSON 记录推送给外部订阅者（Flutter/UI 层）。
//!
//! 订阅语义：同一时刻至多一个订阅者，新的 [`EventSink::subscribe`] 会
//! 顶替旧订阅者；未被消费的历史事件不回放。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// 连接状态标签，对应 `connState` 事件的 `state` 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnStateLabel {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnStateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnStateLabel::Connecting => write!(f, "connecting"),
            ConnStateLabel::Connected => write!(f, "connected"),
            ConnStateLabel::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// 推送给外部订阅者的事件
///
/// 字段名与 Rover 移动端协议保持一致：`id`/`name`/`code`/`msg`/`state`/
/// `status`/`svc`/`chr`/`val`/`count`/`value`。字节负载序列化为 0–255
/// 的整数数组，保证跨语言传输（见协议约定）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    ScanStarted,
    ScanStopped,
    ScanResult {
        id: String,
        name: String,
    },
    ScanError {
        code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },
    ConnState {
        state: ConnStateLabel,
    },
    ConnError {
        status: i32,
    },
    Services {
        count: usize,
    },
    ServicesError {
        status: i32,
    },
    Notify {
        svc: uuid::Uuid,
        chr: uuid::Uuid,
        val: Vec<u8>,
    },
    Read {
        svc: uuid::Uuid,
        chr: uuid::Uuid,
        val: Vec<u8>,
    },
    Rssi {
        value: i16,
    },
}

type Subscriber = mpsc::UnboundedSender<Event>;

/// 单订阅者事件出口
///
/// 可克隆；所有克隆共享同一个订阅者槽位。
#[derive(Clone, Default)]
pub struct EventSink {
    subscriber: Arc<Mutex<Option<Subscriber>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定一个新订阅者并返回其事件流，旧订阅者（若有）被顶替。
    pub fn subscribe(&self) -> UnboundedReceiverStream<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.subscriber.lock().unwrap();
        if slot.replace(tx).is_some() {
            tracing::debug!("event subscriber replaced");
        }
        UnboundedReceiverStream::new(rx)
    }

    /// 推送一个事件；没有订阅者或订阅者已断开时静默丢弃。
    pub fn emit(&self, event: Event) {
        let mut slot = self.subscriber.lock().unwrap();
        if let Some(tx) = slot.as_ref() {
            if tx.send(event).is_err() {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    #[test]
    fn event_wire_format_matches_protocol() {
        let json = serde_json::to_value(&Event::ScanResult {
            id: "AA:BB:CC:DD:EE:FF".into(),
            name: "rover".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "scanResult");
        assert_eq!(json["id"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["name"], "rover");

        let json = serde_json::to_value(&Event::ConnState {
            state: ConnStateLabel::Connecting,
        })
        .unwrap();
        assert_eq!(json["type"], "connState");
        assert_eq!(json["state"], "connecting");

        // 缺省 msg 不出现在 JSON 里
        let json = serde_json::to_value(&Event::ScanError { code: 2, msg: None }).unwrap();
        assert_eq!(json["type"], "scanError");
        assert_eq!(json["code"], 2);
        assert!(json.get("msg").is_none());
    }

    #[test]
    fn byte_payloads_serialize_as_integer_arrays() {
        let svc = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
        let chr = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
        let json = serde_json::to_value(&Event::Read {
            svc,
            chr,
            val: vec![0, 42, 255],
        })
        .unwrap();
        assert_eq!(json["type"], "read");
        assert_eq!(json["svc"], "0000180f-0000-1000-8000-00805f9b34fb");
        assert_eq!(json["chr"], "00002a19-0000-1000-8000-00805f9b34fb");
        assert_eq!(json["val"], serde_json::json!([0, 42, 255]));
    }

    #[tokio::test]
    async fn new_subscriber_replaces_previous() {
        let sink = EventSink::new();
        let mut first = sink.subscribe();
        sink.emit(Event::ScanStarted);
        assert_eq!(first.next().await, Some(Event::ScanStarted));

        let mut second = sink.subscribe();
        sink.emit(Event::ScanStopped);
        assert_eq!(second.next().await, Some(Event::ScanStopped));
        // 旧订阅者的通道已关闭，不再收到事件
        assert_eq!(first.next().await, None);
    }

    #[test]
    fn emit_without_subscriber_is_dropped() {
        let sink = EventSink::new();
        sink.emit(Event::ScanStarted);
        // 不 panic、不积压即可
    }
}
