//! 串口连接器
//!
//! 状态机：
//!
//! ```text
//! Disconnected → Probing → Connected ⇄ ConnectionLost
//!        ↑_____________________________________| close()
//! ```
//!
//! - `open()`: 枚举端口（或只用指定端口），逐个握手
//! - `read_frame()`: 帧同步读取；持续无有效帧超过超时则进入 `ConnectionLost`（只触发一次），
//!   之后收到有效帧恢复 `Connected`；端口读错误时释放端口并定期重新握手
//! - `write()`: 尽力写入，错误只记录日志
//! - `close()`: 幂等，释放端口

use neopia_protocol::{
    FrameScanner, HANDSHAKE_PREFIX, HANDSHAKE_REQUEST, HandshakeInfo, ModelCode, format_address,
};
use neopia_serial::{PortSettings, SerialAdapter, SerialBackend, SerialError};
use neopia_tools::ConnectorConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Probing = 1,
    Connected = 2,
    ConnectionLost = 3,
}

impl ConnectionState {
    /// 无效值视为 Disconnected
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Probing,
            2 => Self::Connected,
            3 => Self::ConnectionLost,
            _ => Self::Disconnected,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 连接状态（原子版本，IO 线程写，其它线程读）
#[derive(Debug, Default)]
pub struct AtomicConnectionState {
    inner: AtomicU8,
}

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }
}

/// `open()` 结果（找不到设备不是错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenResult {
    Found,
    NotAvailable,
}

/// 握手应答检查器：确认对端并给出型号码
pub trait ConnectionChecker: Send + Sync {
    fn check(&self, info: &HandshakeInfo) -> Option<ModelCode>;
}

/// Neosoco 检查器
#[derive(Debug, Clone, Copy, Default)]
pub struct NeosocoChecker;

impl ConnectionChecker for NeosocoChecker {
    fn check(&self, info: &HandshakeInfo) -> Option<ModelCode> {
        ModelCode::from_handshake(info)
    }
}

enum Probe {
    Found(ModelCode, HandshakeInfo),
    Rejected,
    Silent,
}

/// 串口连接器
pub struct SerialConnector {
    tag: String,
    backend: Arc<dyn SerialBackend>,
    checker: Arc<dyn ConnectionChecker>,
    config: ConnectorConfig,
    port: Option<Box<dyn SerialAdapter>>,
    port_name: Option<String>,
    address: Option<String>,
    model: Option<ModelCode>,
    state: Arc<AtomicConnectionState>,
    scanner: FrameScanner,
    last_frame: Instant,
    reprobe_at: Option<Instant>,
    closed: bool,
}

impl SerialConnector {
    /// 创建连接器
    ///
    /// # 参数
    ///
    /// - `tag`: 日志前缀，如 `Neosoco[0]`
    /// - `frame_len`: 传感帧长度（含起始标记）
    pub fn new(
        tag: impl Into<String>,
        backend: Arc<dyn SerialBackend>,
        checker: Arc<dyn ConnectionChecker>,
        config: ConnectorConfig,
        frame_len: usize,
    ) -> Self {
        Self {
            tag: tag.into(),
            backend,
            checker,
            config,
            port: None,
            port_name: None,
            address: None,
            model: None,
            state: Arc::new(AtomicConnectionState::default()),
            scanner: FrameScanner::new(frame_len),
            last_frame: Instant::now(),
            reprobe_at: None,
            closed: false,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// 共享状态句柄（供其它线程读取）
    pub fn state_handle(&self) -> Arc<AtomicConnectionState> {
        self.state.clone()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// 对端地址（`AA:BB:...`）
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// 握手学到的型号码
    pub fn model(&self) -> Option<ModelCode> {
        self.model
    }

    pub fn has_port(&self) -> bool {
        self.port.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_frame_len(&mut self, frame_len: usize) {
        self.scanner.set_frame_len(frame_len);
    }

    fn settings(&self) -> PortSettings {
        PortSettings {
            baud_rate: self.config.baud_rate,
            read_timeout: self.config.read_timeout(),
        }
    }

    // ============================================================
    // 端口发现与握手
    // ============================================================

    /// 打开连接
    ///
    /// `port` 为空时使用配置中的端口；两者都为空时枚举所有端口。
    pub fn open(&mut self, port: Option<&str>) -> OpenResult {
        if self.closed {
            return OpenResult::NotAvailable;
        }
        let candidates = match port.map(str::to_string).or_else(|| self.config.port.clone()) {
            Some(name) => vec![name],
            None => match self.backend.available_ports() {
                Ok(ports) => ports.into_iter().map(|p| p.name).collect(),
                Err(e) => {
                    warn!("{} Failed to list ports: {}", self.tag, e);
                    Vec::new()
                },
            },
        };

        for name in &candidates {
            if self.open_port(name) == OpenResult::Found {
                return OpenResult::Found;
            }
        }

        self.state.set(ConnectionState::Disconnected);
        error!("{} No available USB to BLE bridge", self.tag);
        OpenResult::NotAvailable
    }

    fn open_port(&mut self, name: &str) -> OpenResult {
        debug!("{} Probing {}", self.tag, name);
        self.state.set(ConnectionState::Probing);
        let mut port = match self.backend.open(name, &self.settings()) {
            Ok(port) => port,
            Err(e) => {
                debug!("{} Cannot open {}: {}", self.tag, name, e);
                return OpenResult::NotAvailable;
            },
        };
        if let Err(e) = port.clear() {
            debug!("{} Cannot clear {}: {}", self.tag, name, e);
        }

        match self.handshake(port.as_mut()) {
            Probe::Found(model, info) => {
                self.address = format_address(info.address());
                self.model = Some(model);
                self.port_name = Some(name.to_string());
                self.port = Some(port);
                self.scanner.clear();
                self.last_frame = Instant::now();
                self.reprobe_at = None;
                self.state.set(ConnectionState::Connected);
                match &self.address {
                    Some(address) => info!("{} Connected: {} {}", self.tag, name, address),
                    None => info!("{} Connected: {}", self.tag, name),
                }
                OpenResult::Found
            },
            Probe::Rejected | Probe::Silent => OpenResult::NotAvailable,
        }
    }

    fn handshake(&self, port: &mut dyn SerialAdapter) -> Probe {
        for attempt in 0..self.config.handshake_retries {
            if let Err(e) = port.write_all(HANDSHAKE_REQUEST) {
                debug!("{} Handshake write failed: {}", self.tag, e);
                return Probe::Silent;
            }
            let line = match read_line(port, self.config.read_timeout() * 2) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    trace!("{} No handshake reply (attempt {})", self.tag, attempt + 1);
                    continue;
                },
                Err(e) => {
                    debug!("{} Handshake read failed: {}", self.tag, e);
                    return Probe::Silent;
                },
            };
            match HandshakeInfo::parse(&line) {
                Ok(info) => {
                    return match self.checker.check(&info) {
                        Some(model) => Probe::Found(model, info),
                        None => {
                            debug!("{} Rejected peer: {}", self.tag, line);
                            Probe::Rejected
                        },
                    };
                },
                Err(e) => trace!("{} {}", self.tag, e),
            }
        }
        Probe::Silent
    }

    // ============================================================
    // 稳态读写
    // ============================================================

    /// 读取一帧（阻塞至多一个读超时）
    pub fn read_frame(&mut self) -> Option<Vec<u8>> {
        if let Some(frame) = self.scanner.next_frame() {
            self.on_frame();
            return Some(frame);
        }

        let mut buf = [0u8; 64];
        let result = match self.port.as_mut() {
            Some(port) => port.try_read(&mut buf),
            None => {
                self.try_reprobe();
                return None;
            },
        };
        match result {
            Ok(n) => self.scanner.push(&buf[..n]),
            Err(e) => {
                warn!("{} Read failed: {}", self.tag, e);
                self.drop_port();
                return None;
            },
        }

        if let Some(frame) = self.scanner.next_frame() {
            self.on_frame();
            return Some(frame);
        }
        self.check_timeout();
        None
    }

    fn on_frame(&mut self) {
        self.last_frame = Instant::now();
        if self.state.get() == ConnectionState::ConnectionLost {
            self.state.set(ConnectionState::Connected);
            info!("{} Connected", self.tag);
        }
    }

    fn check_timeout(&mut self) {
        if self.state.get() == ConnectionState::Connected
            && self.last_frame.elapsed() > self.config.connection_timeout()
        {
            self.state.set(ConnectionState::ConnectionLost);
            warn!("{} Connection lost", self.tag);
        }
    }

    fn drop_port(&mut self) {
        self.port = None;
        self.scanner.clear();
        if self.state.get() == ConnectionState::Connected {
            self.state.set(ConnectionState::ConnectionLost);
            warn!("{} Connection lost", self.tag);
        }
        self.reprobe_at = Some(Instant::now() + self.config.connection_timeout());
    }

    /// 端口丢失后按连接超时间隔重新握手同一端口
    fn try_reprobe(&mut self) {
        if self.closed {
            return;
        }
        let (Some(name), Some(at)) = (self.port_name.clone(), self.reprobe_at) else {
            return;
        };
        if Instant::now() < at {
            return;
        }
        if self.open_port(&name) == OpenResult::NotAvailable {
            self.state.set(ConnectionState::ConnectionLost);
            self.reprobe_at = Some(Instant::now() + self.config.connection_timeout());
        }
    }

    /// 尽力写入，错误只记录日志
    pub fn write(&mut self, frame: &[u8]) {
        let Some(port) = self.port.as_mut() else {
            return;
        };
        if let Err(e) = port.write_all(frame) {
            if self.state.get() == ConnectionState::Connected {
                warn!("{} Write failed: {}", self.tag, e);
            } else {
                trace!("{} Write failed: {}", self.tag, e);
            }
        }
    }

    /// 关闭连接（幂等）
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.port = None;
        self.reprobe_at = None;
        self.scanner.clear();
        self.state.set(ConnectionState::Disconnected);
        info!("{} Disposed", self.tag);
    }
}

impl Drop for SerialConnector {
    fn drop(&mut self) {
        self.close();
    }
}

/// 读取一行握手应答
///
/// 应答前可能混有传感帧字节，因此在缓冲中查找 `FF` 开头、`\r` 或 `\n` 结尾的片段。
fn read_line(port: &mut dyn SerialAdapter, budget: Duration) -> Result<Option<String>, SerialError> {
    let deadline = Instant::now() + budget;
    let mut pending = Vec::new();
    let mut buf = [0u8; 64];
    while Instant::now() < deadline {
        let n = port.try_read(&mut buf)?;
        pending.extend_from_slice(&buf[..n]);
        if let Some(line) = extract_line(&pending) {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

fn extract_line(pending: &[u8]) -> Option<String> {
    let prefix = HANDSHAKE_PREFIX.as_bytes();
    let start = pending.windows(prefix.len()).position(|w| w == prefix)?;
    let rest = &pending[start..];
    let end = rest.iter().position(|&b| b == b'\r' || b == b'\n')?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use neopia_protocol::BasicSensory;
    use neopia_serial::mock::{MockDevice, MockSerialBackend};
    use std::thread;

    const REPLY: &[u8] = b"FF,Neosoco,04,0,A1B2C3D4E5F6\r\n";

    fn config() -> ConnectorConfig {
        ConnectorConfig {
            read_timeout_ms: 5,
            connection_timeout_ms: 50,
            handshake_retries: 3,
            ..ConnectorConfig::default()
        }
    }

    fn connector(backend: &Arc<MockSerialBackend>) -> SerialConnector {
        SerialConnector::new(
            "Neosoco[0]",
            backend.clone(),
            Arc::new(NeosocoChecker),
            config(),
            8,
        )
    }

    fn frame() -> Vec<u8> {
        BasicSensory {
            inputs: [1, 2, 3],
            remote: 0,
            battery: 200,
        }
        .encode()
        .to_vec()
    }

    fn robot_port(backend: &MockSerialBackend, name: &str) -> MockDevice {
        let device = backend.add_port(name);
        device.reply_to(HANDSHAKE_REQUEST, REPLY.to_vec());
        device
    }

    #[test]
    fn test_extract_line_skips_binary_prefix() {
        let mut pending = vec![0xAB, 0xCD, 0x01, 0xFF];
        pending.extend_from_slice(b"FF,Neosoco,04,0,A1\r\n");
        assert_eq!(extract_line(&pending).unwrap(), "FF,Neosoco,04,0,A1");
        assert!(extract_line(b"FF,Neosoco").is_none());
    }

    #[test]
    fn test_open_enumerates_until_found() {
        let backend = Arc::new(MockSerialBackend::new());
        let silent = backend.add_port("COM1");
        let robot = robot_port(&backend, "COM2");

        let mut conn = connector(&backend);
        assert_eq!(conn.open(None), OpenResult::Found);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.port_name(), Some("COM2"));
        assert_eq!(conn.model(), Some(ModelCode::Gen04));
        assert_eq!(conn.address(), Some("F6:E5:D4:C3:B2:A1"));
        // 静默端口重试了全部次数
        assert_eq!(silent.write_count(), 3);
        assert_eq!(robot.clear_count(), 1);
    }

    #[test]
    fn test_open_not_available() {
        let backend = Arc::new(MockSerialBackend::new());
        let rejecting = backend.add_port("COM1");
        rejecting.reply_to(HANDSHAKE_REQUEST, b"FF,Other,07,0,000000000000\r".to_vec());

        let mut conn = connector(&backend);
        assert_eq!(conn.open(None), OpenResult::NotAvailable);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        // 被拒绝后不再重试
        assert_eq!(rejecting.write_count(), 1);

        assert_eq!(conn.open(Some("COM9")), OpenResult::NotAvailable);
    }

    #[test]
    fn test_explicit_port_only() {
        let backend = Arc::new(MockSerialBackend::new());
        let first = robot_port(&backend, "COM1");
        robot_port(&backend, "COM2");

        let mut conn = connector(&backend);
        assert_eq!(conn.open(Some("COM2")), OpenResult::Found);
        assert_eq!(first.open_count(), 0);
    }

    #[test]
    fn test_read_frame_resyncs() {
        let backend = Arc::new(MockSerialBackend::new());
        let device = robot_port(&backend, "COM1");
        let mut conn = connector(&backend);
        assert_eq!(conn.open(None), OpenResult::Found);

        device.push_rx(&[0x00, 0x13, 0x37]);
        device.push_rx(&frame());
        device.push_rx(&frame());
        let mut frames = Vec::new();
        for _ in 0..10 {
            if let Some(f) = conn.read_frame() {
                frames.push(f);
            }
            if frames.len() == 2 {
                break;
            }
        }
        assert_eq!(frames, vec![frame(), frame()]);
    }

    #[test]
    fn test_connection_lost_once_then_recovered() {
        let backend = Arc::new(MockSerialBackend::new());
        let device = robot_port(&backend, "COM1");
        let mut conn = connector(&backend);
        assert_eq!(conn.open(None), OpenResult::Found);

        thread::sleep(Duration::from_millis(60));
        assert!(conn.read_frame().is_none());
        assert_eq!(conn.state(), ConnectionState::ConnectionLost);
        // 继续静默不再改变状态
        assert!(conn.read_frame().is_none());
        assert_eq!(conn.state(), ConnectionState::ConnectionLost);

        device.push_rx(&frame());
        assert!(conn.read_frame().is_some());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_write_errors_swallowed() {
        let backend = Arc::new(MockSerialBackend::new());
        let device = robot_port(&backend, "COM1");
        let mut conn = connector(&backend);
        assert_eq!(conn.open(None), OpenResult::Found);
        device.take_written();

        conn.write(&[0xCD, 0xAB]);
        assert_eq!(device.written(), vec![0xCD, 0xAB]);
        device.set_fail_writes(true);
        conn.write(&[0x01]);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_read_error_reprobes() {
        let backend = Arc::new(MockSerialBackend::new());
        let device = robot_port(&backend, "COM1");
        let mut conn = connector(&backend);
        assert_eq!(conn.open(None), OpenResult::Found);

        device.set_fail_reads(true);
        assert!(conn.read_frame().is_none());
        assert!(!conn.has_port());
        assert_eq!(conn.state(), ConnectionState::ConnectionLost);

        device.set_fail_reads(false);
        thread::sleep(Duration::from_millis(60));
        conn.read_frame();
        assert!(conn.has_port());
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(device.open_count(), 2);
    }

    #[test]
    fn test_close_idempotent() {
        let backend = Arc::new(MockSerialBackend::new());
        robot_port(&backend, "COM1");
        let mut conn = connector(&backend);
        assert_eq!(conn.open(None), OpenResult::Found);
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(!conn.has_port());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.open(None), OpenResult::NotAvailable);
    }

    #[test]
    fn test_atomic_state() {
        let state = AtomicConnectionState::new(ConnectionState::Probing);
        assert_eq!(state.get(), ConnectionState::Probing);
        state.set(ConnectionState::ConnectionLost);
        assert_eq!(state.get(), ConnectionState::ConnectionLost);
        assert_eq!(ConnectionState::from_u8(9), ConnectionState::Disconnected);
    }
}
