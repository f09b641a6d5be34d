//! 模拟串口后端
//!
//! 用于在没有硬件的情况下测试连接器与 IO 线程。
//! [`MockDevice`] 是测试侧句柄：注入接收字节、检查已写入的字节、
//! 设置应答器或让写入失败。

use crate::{PortInfo, PortSettings, SerialAdapter, SerialBackend, SerialError};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 写入应答器：收到写入的字节后返回要注入接收缓冲的应答
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct DeviceState {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    writes: usize,
    fail_writes: bool,
    fail_reads: bool,
    open_count: usize,
    clear_count: usize,
    responder: Option<Responder>,
}

struct Shared {
    state: Mutex<DeviceState>,
    data_ready: Condvar,
}

/// 模拟设备句柄（可克隆，所有克隆共享状态）
#[derive(Clone)]
pub struct MockDevice {
    shared: Arc<Shared>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DeviceState::default()),
                data_ready: Condvar::new(),
            }),
        }
    }

    /// 注入设备发出的字节
    pub fn push_rx(&self, bytes: &[u8]) {
        let mut state = self.shared.state.lock();
        state.rx.extend(bytes.iter().copied());
        self.shared.data_ready.notify_all();
    }

    /// 主机写入的全部字节
    pub fn written(&self) -> Vec<u8> {
        self.shared.state.lock().written.clone()
    }

    /// 取出并清空已写入的字节
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.shared.state.lock().written)
    }

    /// 写入调用次数
    pub fn write_count(&self) -> usize {
        self.shared.state.lock().writes
    }

    /// 端口被打开的次数
    pub fn open_count(&self) -> usize {
        self.shared.state.lock().open_count
    }

    /// 缓冲被清空的次数
    pub fn clear_count(&self) -> usize {
        self.shared.state.lock().clear_count
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.state.lock().fail_writes = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.shared.state.lock().fail_reads = fail;
    }

    /// 设置写入应答器
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.shared.state.lock().responder = Some(Box::new(responder));
    }

    /// 对 `request` 固定应答 `reply`
    pub fn reply_to(&self, request: &'static [u8], reply: Vec<u8>) {
        self.set_responder(move |data| (data == request).then(|| reply.clone()));
    }
}

/// 模拟端口
pub struct MockSerialAdapter {
    name: String,
    device: MockDevice,
    read_timeout: Duration,
}

impl MockSerialAdapter {
    pub fn new(name: impl Into<String>, device: MockDevice, read_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            device,
            read_timeout,
        }
    }
}

impl SerialAdapter for MockSerialAdapter {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let shared = &self.device.shared;
        let deadline = Instant::now() + self.read_timeout;
        let mut state = shared.state.lock();
        loop {
            if state.fail_reads {
                return Err(SerialError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mock read failure",
                )));
            }
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len());
                for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if shared.data_ready.wait_until(&mut state, deadline).timed_out() {
                return Err(SerialError::Timeout);
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        let shared = &self.device.shared;
        let mut state = shared.state.lock();
        if state.fail_writes {
            return Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        state.writes += 1;
        state.written.extend_from_slice(data);
        let reply = state.responder.as_mut().and_then(|r| r(data));
        if let Some(reply) = reply {
            state.rx.extend(reply);
            shared.data_ready.notify_all();
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SerialError> {
        let mut state = self.device.shared.state.lock();
        state.rx.clear();
        state.clear_count += 1;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), SerialError> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 模拟后端
#[derive(Default)]
pub struct MockSerialBackend {
    ports: Mutex<BTreeMap<String, MockDevice>>,
}

impl MockSerialBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个端口并返回其设备句柄
    pub fn add_port(&self, name: impl Into<String>) -> MockDevice {
        let device = MockDevice::new();
        self.ports.lock().insert(name.into(), device.clone());
        device
    }

    pub fn remove_port(&self, name: &str) {
        self.ports.lock().remove(name);
    }

    pub fn device(&self, name: &str) -> Option<MockDevice> {
        self.ports.lock().get(name).cloned()
    }
}

impl SerialBackend for MockSerialBackend {
    fn available_ports(&self) -> Result<Vec<PortInfo>, SerialError> {
        Ok(self.ports.lock().keys().map(PortInfo::new).collect())
    }

    fn open(
        &self,
        port: &str,
        settings: &PortSettings,
    ) -> Result<Box<dyn SerialAdapter>, SerialError> {
        let device = self
            .ports
            .lock()
            .get(port)
            .cloned()
            .ok_or_else(|| SerialError::NotFound(port.to_string()))?;
        device.shared.state.lock().open_count += 1;
        Ok(Box::new(MockSerialAdapter::new(
            port,
            device,
            settings.read_timeout,
        )))
    }
}
