//! 远程链路（Linker）
//!
//! 以一条 WebSocket 连接替代串口，多个机器人的状态以 JSON 对象复用在同一连接上：
//!
//! - 接收线程：持有连接；读超时很短，读到的 JSON 按 `module + index`
//!   （找不到时按 `group + index`）分发给已注册的端点；同时发送出站队列中的消息；
//!   连接断开后等待重连间隔再连接
//! - 发送线程：每个发送周期把所有端点的输出对象聚合为 `{ module+index: {...} }`
//!   并放入出站队列
//!
//! 连接由 [`BusConnector`] 创建，默认实现为基于 `tungstenite` 的 [`WsConnector`]。

use crate::error::LinkError;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use neopia_tools::LinkConfig;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as JsonValue};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// 出站队列容量（接收线程每个读超时清空一次）
const OUTBOUND_CAPACITY: usize = 4;

/// 可中断休眠的粒度
const STOP_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// 连接抽象
// ============================================================================

/// 已建立的消息总线连接
pub trait BusConnection: Send {
    fn send_text(&mut self, text: &str) -> Result<(), LinkError>;

    /// 读一条文本消息；读超时返回 `Ok(None)`
    fn recv_text(&mut self) -> Result<Option<String>, LinkError>;

    fn close(&mut self);
}

/// 消息总线连接工厂
pub trait BusConnector: Send + Sync {
    fn connect(&self, url: &str, read_timeout: Duration)
    -> Result<Box<dyn BusConnection>, LinkError>;
}

/// WebSocket 连接工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl BusConnector for WsConnector {
    fn connect(
        &self,
        url: &str,
        read_timeout: Duration,
    ) -> Result<Box<dyn BusConnection>, LinkError> {
        let (mut socket, _response) = tungstenite::connect(url)?;
        if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
            stream
                .set_read_timeout(Some(read_timeout))
                .map_err(|e| LinkError::WebSocket(e.to_string()))?;
        }
        Ok(Box::new(WsConnection { socket }))
    }
}

struct WsConnection {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl BusConnection for WsConnection {
    fn send_text(&mut self, text: &str) -> Result<(), LinkError> {
        self.socket.send(Message::Text(text.to_string()))?;
        Ok(())
    }

    fn recv_text(&mut self) -> Result<Option<String>, LinkError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text)),
            Ok(Message::Close(_)) => Err(LinkError::Closed),
            Ok(_) => Ok(None),
            Err(e) => match LinkError::from(e) {
                LinkError::Timeout => Ok(None),
                other => Err(other),
            },
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

// ============================================================================
// 端点
// ============================================================================

/// 链路端点（一个逻辑机器人）
pub trait LinkEndpoint: Send + Sync {
    fn module(&self) -> &str;

    fn group(&self) -> &str;

    fn index(&self) -> usize;

    /// 日志前缀
    fn tag(&self) -> &str;

    /// 当前输出对象
    fn encode_motoring(&self) -> JsonValue;

    fn decode_sensory(&self, received: &Map<String, JsonValue>);
}

/// 对端报告的连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Disconnected,
    Connecting,
    Connected,
    ConnectionLost,
}

impl RemoteState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Disconnected),
            1 => Some(Self::Connecting),
            2 => Some(Self::Connected),
            3 => Some(Self::ConnectionLost),
            _ => None,
        }
    }
}

struct Link {
    key: String,
    group_key: String,
    endpoint: Arc<dyn LinkEndpoint>,
    connection_state: Mutex<Option<i64>>,
}

impl Link {
    fn handle_sensory(&self, received: &Map<String, JsonValue>) {
        if let Some(code) = received.get("connectionState").and_then(JsonValue::as_i64) {
            let mut last = self.connection_state.lock();
            if *last != Some(code) {
                *last = Some(code);
                let tag = self.endpoint.tag();
                match RemoteState::from_code(code) {
                    Some(RemoteState::Connecting) => info!("{} Connecting", tag),
                    Some(RemoteState::Connected) => info!("{} Connected", tag),
                    Some(RemoteState::ConnectionLost) => error!("{} Connection lost", tag),
                    Some(RemoteState::Disconnected) => error!("{} Disconnected", tag),
                    None => debug!("{} Unknown connection state {}", tag, code),
                }
            }
        }
        self.endpoint.decode_sensory(received);
    }
}

// ============================================================================
// Linker
// ============================================================================

struct LinkShared {
    config: LinkConfig,
    connector: Arc<dyn BusConnector>,
    links: RwLock<Vec<Arc<Link>>>,
    running: AtomicBool,
    connected: AtomicBool,
    outbound_tx: Sender<String>,
    outbound_rx: Receiver<String>,
}

impl LinkShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 休眠 `duration`，停止时提前返回
    fn sleep_while_running(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }

    fn find(&self, key: &str, by_group: bool) -> Option<Arc<Link>> {
        self.links
            .read()
            .iter()
            .find(|l| if by_group { l.group_key == key } else { l.key == key })
            .cloned()
    }

    fn dispatch(&self, text: &str) {
        let received: JsonValue = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                trace!("Linker dropped malformed message: {}", e);
                return;
            },
        };
        let Some(received) = received.as_object() else {
            return;
        };
        let Some(index) = received.get("index").and_then(JsonValue::as_i64) else {
            return;
        };
        if index < 0 {
            return;
        }
        let field = |name: &str| received.get(name).and_then(JsonValue::as_str);
        let link = field("module")
            .and_then(|module| self.find(&format!("{}{}", module, index), false))
            .or_else(|| {
                field("group").and_then(|group| self.find(&format!("{}{}", group, index), true))
            });
        if let Some(link) = link {
            link.handle_sensory(received);
        }
    }

    /// 聚合所有端点的输出对象
    fn aggregate(&self) -> Map<String, JsonValue> {
        self.links
            .read()
            .iter()
            .map(|l| (l.key.clone(), l.endpoint.encode_motoring()))
            .collect()
    }
}

/// 远程链路
pub struct Linker {
    shared: Arc<LinkShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Linker {
    /// 使用 WebSocket 连接启动
    pub fn start(config: LinkConfig) -> Arc<Self> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// 使用自定义连接工厂启动（测试或其它总线）
    pub fn with_connector(config: LinkConfig, connector: Arc<dyn BusConnector>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = bounded(OUTBOUND_CAPACITY);
        let shared = Arc::new(LinkShared {
            config,
            connector,
            links: RwLock::new(Vec::new()),
            running: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            outbound_tx,
            outbound_rx,
        });

        let mut threads = Vec::with_capacity(2);
        let recv_shared = shared.clone();
        threads.push(thread::spawn(move || receive_loop(recv_shared)));
        let send_shared = shared.clone();
        threads.push(thread::spawn(move || send_loop(send_shared)));

        Arc::new(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    pub fn url(&self) -> &str {
        &self.shared.config.url
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// 注册端点；同一 `module + index` 重复注册时替换旧端点
    pub fn register(&self, endpoint: Arc<dyn LinkEndpoint>) {
        let index = endpoint.index();
        let link = Arc::new(Link {
            key: format!("{}{}", endpoint.module(), index),
            group_key: format!("{}{}", endpoint.group(), index),
            endpoint,
            connection_state: Mutex::new(None),
        });
        let mut links = self.shared.links.write();
        links.retain(|l| l.key != link.key);
        debug!("Linker registered {}", link.key);
        links.push(link);
    }

    pub fn unregister(&self, module: &str, index: usize) {
        let key = format!("{}{}", module, index);
        self.shared.links.write().retain(|l| l.key != key);
    }

    pub fn link_count(&self) -> usize {
        self.shared.links.read().len()
    }

    /// 停止并等待线程退出（幂等）
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                warn!("Linker thread panicked");
            }
        }
    }
}

impl Drop for Linker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(shared: Arc<LinkShared>) {
    let url = shared.config.url.clone();
    while shared.is_running() {
        let mut conn = match shared.connector.connect(&url, shared.config.read_timeout()) {
            Ok(conn) => conn,
            Err(e) => {
                debug!("Linker cannot connect to {}: {}", url, e);
                shared.sleep_while_running(shared.config.reconnect_delay());
                continue;
            },
        };
        info!("Linker connected: {}", url);
        shared.connected.store(true, Ordering::Release);

        'session: while shared.is_running() {
            for text in shared.outbound_rx.try_iter() {
                if let Err(e) = conn.send_text(&text) {
                    warn!("Linker send failed: {}", e);
                    break 'session;
                }
            }
            match conn.recv_text() {
                Ok(Some(text)) => shared.dispatch(&text),
                Ok(None) => {},
                Err(e) => {
                    warn!("Linker connection dropped: {}", e);
                    break;
                },
            }
        }

        shared.connected.store(false, Ordering::Release);
        conn.close();
        // 断线期间的出站消息已过期
        while shared.outbound_rx.try_recv().is_ok() {}
        shared.sleep_while_running(shared.config.reconnect_delay());
    }
}

fn send_loop(shared: Arc<LinkShared>) {
    let interval = shared.config.send_interval();
    let mut next = Instant::now() + interval;
    while shared.is_running() {
        if shared.connected.load(Ordering::Acquire) {
            let packet = shared.aggregate();
            if !packet.is_empty() {
                match serde_json::to_string(&packet) {
                    Ok(text) => match shared.outbound_tx.try_send(text) {
                        Ok(()) | Err(TrySendError::Full(_)) => {},
                        Err(TrySendError::Disconnected(_)) => break,
                    },
                    Err(e) => warn!("Linker cannot encode motoring: {}", e),
                }
            }
        }

        let now = Instant::now();
        if next > now {
            spin_sleep::sleep(next - now);
            next += interval;
        } else {
            next = now + interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// 测试用总线：入站消息由测试注入，出站消息被记录
    #[derive(Default)]
    struct MockBus {
        inbound: Mutex<Vec<String>>,
        sent: Mutex<Vec<String>>,
        connects: Mutex<usize>,
        drop_next: AtomicBool,
    }

    struct MockConnection {
        bus: Arc<MockBus>,
    }

    impl BusConnection for MockConnection {
        fn send_text(&mut self, text: &str) -> Result<(), LinkError> {
            self.bus.sent.lock().push(text.to_string());
            Ok(())
        }

        fn recv_text(&mut self) -> Result<Option<String>, LinkError> {
            if self.bus.drop_next.swap(false, Ordering::SeqCst) {
                return Err(LinkError::Closed);
            }
            let next = {
                let mut inbound = self.bus.inbound.lock();
                if inbound.is_empty() { None } else { Some(inbound.remove(0)) }
            };
            if next.is_none() {
                thread::sleep(Duration::from_millis(2));
            }
            Ok(next)
        }

        fn close(&mut self) {}
    }

    struct MockConnector(Arc<MockBus>);

    impl BusConnector for MockConnector {
        fn connect(
            &self,
            _url: &str,
            _read_timeout: Duration,
        ) -> Result<Box<dyn BusConnection>, LinkError> {
            *self.0.connects.lock() += 1;
            Ok(Box::new(MockConnection { bus: self.0.clone() }))
        }
    }

    struct Endpoint {
        received: Mutex<Vec<Map<String, JsonValue>>>,
    }

    impl LinkEndpoint for Endpoint {
        fn module(&self) -> &str {
            "hamsterS"
        }
        fn group(&self) -> &str {
            "hamster"
        }
        fn index(&self) -> usize {
            0
        }
        fn tag(&self) -> &str {
            "Neosoco[0]"
        }
        fn encode_motoring(&self) -> JsonValue {
            json!({ "module": "hamsterS", "index": 0, "leftWheel": 10 })
        }
        fn decode_sensory(&self, received: &Map<String, JsonValue>) {
            self.received.lock().push(received.clone());
        }
    }

    fn config() -> LinkConfig {
        LinkConfig {
            reconnect_delay_ms: 10,
            send_interval_ms: 5,
            read_timeout_ms: 2,
            ..LinkConfig::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_dispatch_by_module_then_group() {
        let bus = Arc::new(MockBus::default());
        let linker = Linker::with_connector(config(), Arc::new(MockConnector(bus.clone())));
        let endpoint = Arc::new(Endpoint {
            received: Mutex::new(Vec::new()),
        });
        linker.register(endpoint.clone());

        {
            let mut inbound = bus.inbound.lock();
            inbound.push(json!({"module": "hamsterS", "index": 0, "light": 1}).to_string());
            inbound.push(json!({"module": "other", "group": "hamster", "index": 0, "light": 2}).to_string());
            inbound.push(json!({"module": "hamsterS", "index": 1, "light": 3}).to_string());
            inbound.push(json!({"module": "hamsterS", "index": -1, "light": 4}).to_string());
            inbound.push("not json".to_string());
        }
        assert!(wait_for(|| bus.inbound.lock().is_empty()));
        assert!(wait_for(|| endpoint.received.lock().len() == 2));
        let lights: Vec<i64> = endpoint
            .received
            .lock()
            .iter()
            .map(|m| m["light"].as_i64().unwrap())
            .collect();
        assert_eq!(lights, vec![1, 2]);
        linker.stop();
    }

    #[test]
    fn test_send_loop_aggregates_by_key() {
        let bus = Arc::new(MockBus::default());
        let linker = Linker::with_connector(config(), Arc::new(MockConnector(bus.clone())));
        linker.register(Arc::new(Endpoint {
            received: Mutex::new(Vec::new()),
        }));
        assert!(wait_for(|| !bus.sent.lock().is_empty()));
        let text = bus.sent.lock()[0].clone();
        let packet: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(packet["hamsterS0"]["leftWheel"], json!(10));
        linker.stop();
        assert!(!linker.is_running());
    }

    #[test]
    fn test_reconnects_after_drop() {
        let bus = Arc::new(MockBus::default());
        let linker = Linker::with_connector(config(), Arc::new(MockConnector(bus.clone())));
        assert!(wait_for(|| linker.is_connected()));
        bus.drop_next.store(true, Ordering::SeqCst);
        assert!(wait_for(|| *bus.connects.lock() >= 2));
        assert!(wait_for(|| linker.is_connected()));
        linker.stop();
        assert!(!linker.is_connected());
    }

    #[test]
    fn test_register_replaces_and_unregister() {
        let bus = Arc::new(MockBus::default());
        let linker = Linker::with_connector(config(), Arc::new(MockConnector(bus)));
        for _ in 0..2 {
            linker.register(Arc::new(Endpoint {
                received: Mutex::new(Vec::new()),
            }));
        }
        assert_eq!(linker.link_count(), 1);
        linker.unregister("hamsterS", 0);
        assert_eq!(linker.link_count(), 0);
    }

    #[test]
    fn test_remote_state_codes() {
        assert_eq!(RemoteState::from_code(3), Some(RemoteState::ConnectionLost));
        assert_eq!(RemoteState::from_code(7), None);
    }
}
