//! GATT 会话管理 actor
//!
//! 单外设、单会话：连接状态机、服务目录、三个"每种至多一个"的挂起
//! 请求槽位全部归一个 actor 任务所有。调用方命令和平台回调走两条
//! mpsc 通道，由同一个 `select!` 循环逐条消费，天然满足顺序一致性，
//! 不需要细粒度锁。
//!
//! 与移动端原始协议相比收紧了三处：重复发起同类操作返回 busy 而不是
//! 静默覆盖旧槽位；断开（含对端主动断开和新连接顶替）会让所有挂起
//! 请求以 disconnected 收尾；挂起请求超过配置时限以 timeout 收尾。

use super::radio::{LinkState, Radio, RadioEvent, RadioEvents, ServiceInfo};
use super::scanner::ScanController;
use super::{
    BleError, CCCD_UUID, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE, GATT_SUCCESS,
    OpKind, ScanFilter,
};
use crate::config::Settings;
use crate::event::{ConnStateLabel, Event, EventSink};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// 连接状态机；`Disconnected` 用会话槽位为空表达
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    ServicesDiscovered,
}

type Responder<T> = oneshot::Sender<Result<T, BleError>>;

enum Command {
    StartScan {
        filter: ScanFilter,
    },
    StopScan,
    Connect {
        peripheral: String,
    },
    Disconnect,
    SetNotify {
        svc: Uuid,
        chr: Uuid,
        enable: bool,
        ack: Responder<()>,
    },
    Read {
        svc: Uuid,
        chr: Uuid,
        reply: Responder<Vec<u8>>,
    },
    Write {
        svc: Uuid,
        chr: Uuid,
        value: Vec<u8>,
        with_response: bool,
        reply: Responder<()>,
    },
    ReadRssi {
        reply: Responder<i16>,
    },
}

/// 当前 GATT 会话；同一时刻至多一个，新 `connect` 顶替旧会话
struct Session {
    peripheral: String,
    state: ConnectionState,
    catalog: Vec<ServiceInfo>,
    notifying: HashSet<(Uuid, Uuid)>,
}

struct PendingSlot<T> {
    reply: Responder<T>,
    deadline: Instant,
}

impl<T> PendingSlot<T> {
    fn new(reply: Responder<T>, timeout: Duration) -> Self {
        Self {
            reply,
            deadline: Instant::now() + timeout,
        }
    }

    fn resolve(self, result: Result<T, BleError>) {
        // 调用方可能已放弃等待，送达失败不是错误
        let _ = self.reply.send(result);
    }
}

/// 挂起请求表：每种操作一个槽位
#[derive(Default)]
struct PendingTable {
    read: Option<PendingSlot<Vec<u8>>>,
    write: Option<PendingSlot<()>>,
    rssi: Option<PendingSlot<i16>>,
}

impl PendingTable {
    fn next_deadline(&self) -> Option<Instant> {
        [
            self.read.as_ref().map(|s| s.deadline),
            self.write.as_ref().map(|s| s.deadline),
            self.rssi.as_ref().map(|s| s.deadline),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// 断开或关闭时让所有在途请求收尾
    fn fail_all(&mut self, err: &BleError) {
        if let Some(slot) = self.read.take() {
            slot.resolve(Err(err.clone()));
        }
        if let Some(slot) = self.write.take() {
            slot.resolve(Err(err.clone()));
        }
        if let Some(slot) = self.rssi.take() {
            slot.resolve(Err(err.clone()));
        }
    }

    fn expire(&mut self, now: Instant) {
        if self.read.as_ref().is_some_and(|s| s.deadline <= now) {
            tracing::warn!("pending read timed out");
            if let Some(slot) = self.read.take() {
                slot.resolve(Err(BleError::Timeout(OpKind::Read)));
            }
        }
        if self.write.as_ref().is_some_and(|s| s.deadline <= now) {
            tracing::warn!("pending write timed out");
            if let Some(slot) = self.write.take() {
                slot.resolve(Err(BleError::Timeout(OpKind::Write)));
            }
        }
        if self.rssi.as_ref().is_some_and(|s| s.deadline <= now) {
            tracing::warn!("pending rssi timed out");
            if let Some(slot) = self.rssi.take() {
                slot.resolve(Err(BleError::Timeout(OpKind::Rssi)));
            }
        }
    }
}

/// 会话 actor 的对外句柄
///
/// 可克隆，可跨任务使用。`start_scan`/`stop_scan`/`connect`/`disconnect`
/// 是 fire-and-acknowledge：入队即返回，结果只走事件流。`read`/`write`/
/// `read_rssi` 等到挂起请求被解决为止。
#[derive(Clone)]
pub struct BleHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: EventSink,
}

impl BleHandle {
    /// 绑定新的事件订阅者，顶替旧订阅者
    pub fn subscribe(&self) -> UnboundedReceiverStream<Event> {
        self.events.subscribe()
    }

    pub fn start_scan(&self, filter: ScanFilter) -> Result<(), BleError> {
        self.send(Command::StartScan { filter })
    }

    pub fn stop_scan(&self) -> Result<(), BleError> {
        self.send(Command::StopScan)
    }

    pub fn connect(&self, peripheral: impl Into<String>) -> Result<(), BleError> {
        self.send(Command::Connect {
            peripheral: peripheral.into(),
        })
    }

    pub fn disconnect(&self) -> Result<(), BleError> {
        self.send(Command::Disconnect)
    }

    /// 开关通知订阅。目标解析失败立即报错；描述符写本身无完成事件，
    /// 之后的通知负载以 `notify` 事件送达。
    pub async fn set_notify(&self, svc: Uuid, chr: Uuid, enable: bool) -> Result<(), BleError> {
        let (ack, rx) = oneshot::channel();
        self.send(Command::SetNotify {
            svc,
            chr,
            enable,
            ack,
        })?;
        rx.await.map_err(|_| BleError::Closed)?
    }

    /// 读特征值。成功时同一份字节也会以 `read` 事件推给订阅者。
    pub async fn read(&self, svc: Uuid, chr: Uuid) -> Result<Vec<u8>, BleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Read { svc, chr, reply })?;
        rx.await.map_err(|_| BleError::Closed)?
    }

    pub async fn write(
        &self,
        svc: Uuid,
        chr: Uuid,
        value: Vec<u8>,
        with_response: bool,
    ) -> Result<(), BleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Write {
            svc,
            chr,
            value,
            with_response,
            reply,
        })?;
        rx.await.map_err(|_| BleError::Closed)?
    }

    /// 查询当前连接的信号强度；成功时同时推送 `rssi` 事件。
    pub async fn read_rssi(&self) -> Result<i16, BleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ReadRssi { reply })?;
        rx.await.map_err(|_| BleError::Closed)?
    }

    fn send(&self, command: Command) -> Result<(), BleError> {
        self.commands.send(command).map_err(|_| BleError::Closed)
    }
}

/// 会话 actor 本体
pub struct BleSession {
    radio: Arc<dyn Radio>,
    scan: ScanController,
    events: EventSink,
    session: Option<Session>,
    pending: PendingTable,
    op_timeout: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    radio_events: RadioEvents,
}

impl BleSession {
    /// 启动会话 actor，返回对外句柄。
    ///
    /// `radio_events` 必须是构建 `radio` 时用的同一对
    /// [`radio_channel`](super::radio::radio_channel) 的接收端。
    pub fn spawn(
        radio: Arc<dyn Radio>,
        radio_events: RadioEvents,
        settings: &Settings,
    ) -> BleHandle {
        let events = EventSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = BleSession {
            scan: ScanController::new(radio.clone(), events.clone()),
            radio,
            events: events.clone(),
            session: None,
            pending: PendingTable::default(),
            op_timeout: settings.op_timeout(),
            commands: rx,
            radio_events,
        };
        tokio::spawn(actor.run());
        BleHandle {
            commands: tx,
            events,
        }
    }

    async fn run(mut self) {
        loop {
            let deadline = self.pending.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                radio_event = self.radio_events.recv() => match radio_event {
                    Some(event) => self.handle_radio(event),
                    None => break,
                },
                () = sleep_until_or_forever(deadline) => {
                    self.pending.expire(Instant::now());
                }
            }
        }
        tracing::debug!("session actor exiting");
        self.pending.fail_all(&BleError::Closed);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan { filter } => self.scan.start(&filter),
            Command::StopScan => self.scan.stop(),
            Command::Connect { peripheral } => self.cmd_connect(peripheral),
            Command::Disconnect => self.cmd_disconnect(),
            Command::SetNotify {
                svc,
                chr,
                enable,
                ack,
            } => {
                let _ = ack.send(self.cmd_set_notify(svc, chr, enable));
            }
            Command::Read { svc, chr, reply } => self.cmd_read(svc, chr, reply),
            Command::Write {
                svc,
                chr,
                value,
                with_response,
                reply,
            } => self.cmd_write(svc, chr, value, with_response, reply),
            Command::ReadRssi { reply } => self.cmd_read_rssi(reply),
        }
    }

    fn handle_radio(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::ScanResult { id, name } => self.scan.on_scan_result(id, name),
            RadioEvent::ScanFailed { code } => self.scan.on_scan_failed(code),
            RadioEvent::ConnectionState { status, link } => {
                self.on_connection_state(status, link);
            }
            RadioEvent::ServicesDiscovered { status, services } => {
                self.on_services_discovered(status, services);
            }
            RadioEvent::CharacteristicRead {
                svc,
                chr,
                status,
                value,
            } => self.on_characteristic_read(svc, chr, status, value),
            RadioEvent::CharacteristicWritten { status, .. } => {
                self.on_characteristic_write(status);
            }
            RadioEvent::Notification { svc, chr, value } => {
                self.events.emit(Event::Notify {
                    svc,
                    chr,
                    val: value,
                });
            }
            RadioEvent::Rssi { status, value } => self.on_rssi(status, value),
        }
    }

    // -------- 命令 --------

    fn cmd_connect(&mut self, peripheral: String) {
        // 连接前必须停扫描：扫描挤占射频带宽，会拖垮连接尝试
        self.scan.stop();

        // 新会话顶替旧会话：释放原生资源，挂起请求全部收尾
        if let Some(old) = self.session.take() {
            tracing::debug!(peripheral = %old.peripheral, "superseding previous session");
            self.radio.disconnect();
            self.pending.fail_all(&BleError::Disconnected);
        }

        tracing::info!(%peripheral, "connecting");
        self.radio.connect(&peripheral);
        self.session = Some(Session {
            peripheral,
            state: ConnectionState::Connecting,
            catalog: Vec::new(),
            notifying: HashSet::new(),
        });
        self.events.emit(Event::ConnState {
            state: ConnStateLabel::Connecting,
        });
    }

    fn cmd_disconnect(&mut self) {
        // 无会话时为安全空操作
        if self.session.take().is_none() {
            return;
        }
        tracing::info!("disconnecting");
        self.radio.disconnect();
        self.pending.fail_all(&BleError::Disconnected);
        self.events.emit(Event::ConnState {
            state: ConnStateLabel::Disconnected,
        });
    }

    fn cmd_set_notify(&mut self, svc: Uuid, chr: Uuid, enable: bool) -> Result<(), BleError> {
        let session = self.session.as_mut().ok_or(BleError::NotConnected)?;
        let service = session
            .catalog
            .iter()
            .find(|s| s.uuid == svc)
            .ok_or(BleError::UnknownService(svc))?;
        let has_cccd = service
            .characteristic(chr)
            .ok_or(BleError::UnknownCharacteristic(chr))?
            .has_cccd;

        if enable {
            session.notifying.insert((svc, chr));
        } else {
            session.notifying.remove(&(svc, chr));
        }

        self.radio.set_characteristic_notification(svc, chr, enable);
        if has_cccd {
            // 重复开启时也重写 CCCD，与移动端协议一致
            let value = if enable {
                ENABLE_NOTIFICATION_VALUE
            } else {
                DISABLE_NOTIFICATION_VALUE
            };
            self.radio.write_descriptor(svc, chr, CCCD_UUID, value.to_vec());
        }
        Ok(())
    }

    fn cmd_read(&mut self, svc: Uuid, chr: Uuid, reply: Responder<Vec<u8>>) {
        if let Err(e) = self.resolve_target(svc, chr) {
            let _ = reply.send(Err(e));
            return;
        }
        if self.pending.read.is_some() {
            let _ = reply.send(Err(BleError::Busy(OpKind::Read)));
            return;
        }
        self.pending.read = Some(PendingSlot::new(reply, self.op_timeout));
        if !self.radio.read(svc, chr) {
            if let Some(slot) = self.pending.read.take() {
                slot.resolve(Err(BleError::IssueFailed(OpKind::Read)));
            }
        }
    }

    fn cmd_write(
        &mut self,
        svc: Uuid,
        chr: Uuid,
        value: Vec<u8>,
        with_response: bool,
        reply: Responder<()>,
    ) {
        if let Err(e) = self.resolve_target(svc, chr) {
            let _ = reply.send(Err(e));
            return;
        }
        if self.pending.write.is_some() {
            let _ = reply.send(Err(BleError::Busy(OpKind::Write)));
            return;
        }
        self.pending.write = Some(PendingSlot::new(reply, self.op_timeout));
        if !self.radio.write(svc, chr, value, with_response) {
            if let Some(slot) = self.pending.write.take() {
                slot.resolve(Err(BleError::IssueFailed(OpKind::Write)));
            }
        }
    }

    fn cmd_read_rssi(&mut self, reply: Responder<i16>) {
        if self.session.is_none() {
            let _ = reply.send(Err(BleError::NotConnected));
            return;
        }
        if self.pending.rssi.is_some() {
            let _ = reply.send(Err(BleError::Busy(OpKind::Rssi)));
            return;
        }
        self.pending.rssi = Some(PendingSlot::new(reply, self.op_timeout));
        if !self.radio.read_rssi() {
            if let Some(slot) = self.pending.rssi.take() {
                slot.resolve(Err(BleError::IssueFailed(OpKind::Rssi)));
            }
        }
    }

    /// 目标可解析性检查；失败时不发起任何原生调用、不占用槽位
    fn resolve_target(&self, svc: Uuid, chr: Uuid) -> Result<(), BleError> {
        let session = self.session.as_ref().ok_or(BleError::NotConnected)?;
        let service = session
            .catalog
            .iter()
            .find(|s| s.uuid == svc)
            .ok_or(BleError::UnknownService(svc))?;
        service
            .characteristic(chr)
            .ok_or(BleError::UnknownCharacteristic(chr))?;
        Ok(())
    }

    // -------- 平台回调 --------

    fn on_connection_state(&mut self, status: i32, link: LinkState) {
        if status != GATT_SUCCESS {
            tracing::warn!(status, "connection error");
            self.events.emit(Event::ConnError { status });
            self.events.emit(Event::ConnState {
                state: ConnStateLabel::Disconnected,
            });
            if self.session.take().is_some() {
                self.radio.disconnect();
                self.pending.fail_all(&BleError::Disconnected);
            }
            return;
        }

        match link {
            LinkState::Connected => {
                let Some(session) = self.session.as_mut() else {
                    tracing::debug!("connected callback without session, ignored");
                    return;
                };
                // 平台可能重复上报 connected，只有 Connecting 状态下才推进
                if session.state != ConnectionState::Connecting {
                    tracing::debug!("duplicate connected callback, ignored");
                    return;
                }
                session.state = ConnectionState::Connected;
                tracing::info!(peripheral = %session.peripheral, "connected");
                self.events.emit(Event::ConnState {
                    state: ConnStateLabel::Connected,
                });
                self.radio.discover_services();
            }
            LinkState::Disconnected => {
                // 对端主动断开可能在任意时刻到来，不只作为 disconnect 的回执
                if self.session.take().is_some() {
                    tracing::info!("link disconnected");
                    self.pending.fail_all(&BleError::Disconnected);
                    self.events.emit(Event::ConnState {
                        state: ConnStateLabel::Disconnected,
                    });
                }
            }
        }
    }

    fn on_services_discovered(&mut self, status: i32, services: Vec<ServiceInfo>) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("service discovery callback without session, ignored");
            return;
        };
        if status != GATT_SUCCESS {
            // 状态保持 Connected；不自动重试，由上层重走连接周期
            tracing::warn!(status, "service discovery failed");
            self.events.emit(Event::ServicesError { status });
            return;
        }
        session.state = ConnectionState::ServicesDiscovered;
        let count = services.len();
        session.catalog = services;
        tracing::info!(count, "services discovered");
        self.events.emit(Event::Services { count });
    }

    fn on_characteristic_read(&mut self, svc: Uuid, chr: Uuid, status: i32, value: Vec<u8>) {
        let Some(slot) = self.pending.read.take() else {
            tracing::debug!("read callback with no pending request, dropped");
            return;
        };
        if status == GATT_SUCCESS {
            // 双路送达：解决挂起请求，同时推送 read 事件
            slot.resolve(Ok(value.clone()));
            self.events.emit(Event::Read {
                svc,
                chr,
                val: value,
            });
        } else {
            slot.resolve(Err(BleError::Gatt {
                op: OpKind::Read,
                status,
            }));
        }
    }

    fn on_characteristic_write(&mut self, status: i32) {
        let Some(slot) = self.pending.write.take() else {
            tracing::debug!("write callback with no pending request, dropped");
            return;
        };
        if status == GATT_SUCCESS {
            slot.resolve(Ok(()));
        } else {
            slot.resolve(Err(BleError::Gatt {
                op: OpKind::Write,
                status,
            }));
        }
    }

    fn on_rssi(&mut self, status: i32, value: i16) {
        let Some(slot) = self.pending.rssi.take() else {
            tracing::debug!("rssi callback with no pending request, dropped");
            return;
        };
        if status == GATT_SUCCESS {
            slot.resolve(Ok(value));
            self.events.emit(Event::Rssi { value });
        } else {
            slot.resolve(Err(BleError::Gatt {
                op: OpKind::Rssi,
                status,
            }));
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
