//! 端到端测试：通过公开 API 走完 扫描 → 连接 → 服务发现 → 读写/通知
//! 的完整生命周期，射频层用 FakeRadio 替身

use roverlink_core::ble::testing::{FakeRadio, RadioCall};
use roverlink_core::{
    BleError, BleHandle, BleSession, CharacteristicInfo, ConnStateLabel, Event, GATT_FAILURE,
    GATT_SUCCESS, LinkState, RadioCallbacks, ScanFilter, ServiceInfo, Settings,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

const PERIPHERAL: &str = "AA:BB:CC:DD:EE:FF";

fn battery_svc() -> Uuid {
    Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb)
}

fn battery_chr() -> Uuid {
    Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb)
}

struct Stack {
    handle: BleHandle,
    radio: FakeRadio,
    callbacks: RadioCallbacks,
    events: UnboundedReceiverStream<Event>,
}

fn stack() -> Stack {
    let (callbacks, radio_events) = roverlink_core::radio_channel();
    let radio = FakeRadio::new();
    let handle = BleSession::spawn(Arc::new(radio.clone()), radio_events, &Settings::default());
    let events = handle.subscribe();
    Stack {
        handle,
        radio,
        callbacks,
        events,
    }
}

impl Stack {
    async fn next_event(&mut self) -> Event {
        self.events.next().await.expect("event stream ended")
    }

    async fn wait_for_call(&self, pred: impl Fn(&RadioCall) -> bool) {
        while !self.radio.calls().iter().any(|c| pred(c)) {
            tokio::task::yield_now().await;
        }
    }

    async fn connect_and_discover(&mut self) {
        self.handle.connect(PERIPHERAL).unwrap();
        assert_eq!(self.next_event().await, Event::ScanStopped);
        assert_eq!(
            self.next_event().await,
            Event::ConnState {
                state: ConnStateLabel::Connecting
            }
        );
        self.callbacks
            .on_connection_state_change(GATT_SUCCESS, LinkState::Connected);
        assert_eq!(
            self.next_event().await,
            Event::ConnState {
                state: ConnStateLabel::Connected
            }
        );
        self.callbacks.on_services_discovered(
            GATT_SUCCESS,
            vec![ServiceInfo {
                uuid: battery_svc(),
                characteristics: vec![CharacteristicInfo {
                    uuid: battery_chr(),
                    has_cccd: true,
                }],
            }],
        );
        assert_eq!(self.next_event().await, Event::Services { count: 1 });
    }
}

#[tokio::test]
async fn scan_lifecycle_and_result_forwarding() {
    let mut s = stack();

    s.handle.start_scan(ScanFilter::any()).unwrap();
    assert_eq!(s.next_event().await, Event::ScanStarted);
    s.wait_for_call(|c| matches!(c, RadioCall::StartScan { .. }))
        .await;

    s.callbacks.on_scan_result("11:22:33:44:55:66", "Rover");
    assert_eq!(
        s.next_event().await,
        Event::ScanResult {
            id: "11:22:33:44:55:66".into(),
            name: "Rover".into(),
        }
    );

    s.handle.stop_scan().unwrap();
    assert_eq!(s.next_event().await, Event::ScanStopped);
    // 停止后迟到的发现结果被丢弃
    s.callbacks.on_scan_result("77:88:99:AA:BB:CC", "Late");

    // 停止是幂等的，重复调用仍然回执
    s.handle.stop_scan().unwrap();
    assert_eq!(s.next_event().await, Event::ScanStopped);
}

#[tokio::test]
async fn scan_refusal_reports_unavailable_scanner() {
    let mut s = stack();
    s.radio.refuse_scan.store(true, Ordering::SeqCst);

    s.handle.start_scan(ScanFilter::any()).unwrap();
    assert_eq!(
        s.next_event().await,
        Event::ScanError {
            code: -1,
            msg: Some("no scanner".into()),
        }
    );
}

#[tokio::test]
async fn connect_stops_scan_before_any_further_results() {
    let mut s = stack();

    s.handle.start_scan(ScanFilter::any()).unwrap();
    assert_eq!(s.next_event().await, Event::ScanStarted);

    s.handle.connect(PERIPHERAL).unwrap();
    assert_eq!(s.next_event().await, Event::ScanStopped);
    assert_eq!(
        s.next_event().await,
        Event::ConnState {
            state: ConnStateLabel::Connecting
        }
    );

    // connState(connecting) 之后不再有 scanResult
    s.callbacks.on_scan_result("11:22:33:44:55:66", "Straggler");
    s.callbacks
        .on_connection_state_change(GATT_SUCCESS, LinkState::Connected);
    assert_eq!(
        s.next_event().await,
        Event::ConnState {
            state: ConnStateLabel::Connected
        }
    );
}

#[tokio::test]
async fn read_delivers_same_bytes_on_both_paths() {
    let mut s = stack();
    s.connect_and_discover().await;

    let pending = {
        let handle = s.handle.clone();
        tokio::spawn(async move { handle.read(battery_svc(), battery_chr()).await })
    };
    s.wait_for_call(|c| matches!(c, RadioCall::Read { .. })).await;
    s.callbacks
        .on_characteristic_read(battery_svc(), battery_chr(), GATT_SUCCESS, vec![42]);

    // 请求方拿到的字节和事件流推送的字节是同一份
    assert_eq!(pending.await.unwrap(), Ok(vec![42]));
    assert_eq!(
        s.next_event().await,
        Event::Read {
            svc: battery_svc(),
            chr: battery_chr(),
            val: vec![42],
        }
    );
}

#[tokio::test]
async fn clean_reconnect_after_connection_error() {
    let mut s = stack();

    s.handle.connect(PERIPHERAL).unwrap();
    assert_eq!(s.next_event().await, Event::ScanStopped);
    assert_eq!(
        s.next_event().await,
        Event::ConnState {
            state: ConnStateLabel::Connecting
        }
    );
    s.callbacks
        .on_connection_state_change(GATT_FAILURE, LinkState::Disconnected);
    assert_eq!(
        s.next_event().await,
        Event::ConnError {
            status: GATT_FAILURE
        }
    );
    assert_eq!(
        s.next_event().await,
        Event::ConnState {
            state: ConnStateLabel::Disconnected
        }
    );

    // 失败后可以干净地重新走完整个连接周期
    s.connect_and_discover().await;
    let pending = {
        let handle = s.handle.clone();
        tokio::spawn(async move { handle.read_rssi().await })
    };
    s.wait_for_call(|c| matches!(c, RadioCall::ReadRssi)).await;
    s.callbacks.on_rssi(GATT_SUCCESS, -55);
    assert_eq!(pending.await.unwrap(), Ok(-55));
    assert_eq!(s.next_event().await, Event::Rssi { value: -55 });
}

#[tokio::test]
async fn notifications_stream_in_order_without_touching_pendings() {
    let mut s = stack();
    s.connect_and_discover().await;

    s.handle
        .set_notify(battery_svc(), battery_chr(), true)
        .await
        .unwrap();

    // 挂起一个 read，确认通知不会动它的槽位
    let pending = {
        let handle = s.handle.clone();
        tokio::spawn(async move { handle.read(battery_svc(), battery_chr()).await })
    };
    s.wait_for_call(|c| matches!(c, RadioCall::Read { .. })).await;

    s.callbacks
        .on_notification(battery_svc(), battery_chr(), vec![1]);
    s.callbacks
        .on_notification(battery_svc(), battery_chr(), vec![2]);
    assert_eq!(
        s.next_event().await,
        Event::Notify {
            svc: battery_svc(),
            chr: battery_chr(),
            val: vec![1],
        }
    );
    assert_eq!(
        s.next_event().await,
        Event::Notify {
            svc: battery_svc(),
            chr: battery_chr(),
            val: vec![2],
        }
    );

    s.callbacks
        .on_characteristic_read(battery_svc(), battery_chr(), GATT_SUCCESS, vec![3]);
    assert_eq!(pending.await.unwrap(), Ok(vec![3]));
}

#[tokio::test]
async fn new_subscriber_replaces_the_old_one() {
    let mut s = stack();

    let mut replacement = s.handle.subscribe();
    s.handle.start_scan(ScanFilter::any()).unwrap();

    // 新订阅者收到事件，旧订阅流随之结束
    assert_eq!(replacement.next().await, Some(Event::ScanStarted));
    assert_eq!(s.events.next().await, None);
}

#[tokio::test]
async fn handle_reports_closed_after_actor_exits() {
    let s = stack();
    // 模拟射频回调端整体消失，actor 循环退出
    drop(s.callbacks);
    let handle = s.handle.clone();
    loop {
        match handle.read_rssi().await {
            Err(BleError::Closed) => break,
            _ => tokio::task::yield_now().await,
        }
    }
}
