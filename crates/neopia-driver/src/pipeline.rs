//! Pipeline IO 循环模块
//!
//! 每个串口传输一个后台 IO 线程：收到一帧 → 解码并通知传感通道 → 回发一帧输出。
//! 发送由设备节奏驱动（每收一帧回一帧）。

use crate::connector::SerialConnector;
use neopia_protocol::ProtocolError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// IO 线程处理器（由具体机器人实现）
pub trait FrameHandler: Send + Sync {
    /// 解码一帧并写入传感通道，成功后通知监听器
    ///
    /// 无效帧返回错误且不修改任何状态。
    fn handle_sensory(&self, frame: &[u8]) -> Result<(), ProtocolError>;

    /// 当前输出帧（在输出锁内编码）
    fn motoring_frame(&self) -> Vec<u8>;
}

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use neopia_driver::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig {
///     idle_sleep: Duration::from_millis(5),
///     ..PipelineConfig::default()
/// };
/// assert_eq!(config.release_timeout, Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 端口不可用时每轮休眠
    pub idle_sleep: Duration,
    /// 释放阶段等待最后一帧输出的上限
    pub release_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(5),
            release_timeout: Duration::from_millis(400),
        }
    }
}

/// IO 线程运行标志
///
/// - `running`: 正常运行
/// - `releasing`: 已停止但还需再发送一帧（复位后的输出）
#[derive(Debug)]
pub struct IoControl {
    running: AtomicBool,
    releasing: AtomicBool,
}

impl Default for IoControl {
    fn default() -> Self {
        Self::new()
    }
}

impl IoControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            releasing: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_releasing(&self) -> bool {
        self.releasing.load(Ordering::Acquire)
    }

    /// 请求停止：先置 releasing 再清 running
    pub fn release(&self) {
        self.releasing.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    fn release_done(&self) {
        self.releasing.store(false, Ordering::Release);
    }
}

/// IO 循环
///
/// 返回时连接器已关闭。
pub fn io_loop(
    mut connector: SerialConnector,
    handler: Arc<dyn FrameHandler>,
    control: Arc<IoControl>,
    config: PipelineConfig,
) {
    let mut release_deadline: Option<Instant> = None;

    loop {
        if !control.is_running() {
            if !control.is_releasing() {
                break;
            }
            let deadline =
                *release_deadline.get_or_insert_with(|| Instant::now() + config.release_timeout);
            if Instant::now() >= deadline {
                debug!("{} Release timed out", connector.tag());
                break;
            }
        }

        match connector.read_frame() {
            Some(frame) => {
                if let Err(e) = handler.handle_sensory(&frame) {
                    trace!("{} Skipping frame: {}", connector.tag(), e);
                }
                let out = handler.motoring_frame();
                connector.write(&out);
                control.release_done();
            },
            None => {
                if !connector.has_port() {
                    spin_sleep::sleep(config.idle_sleep);
                }
            },
        }
    }

    connector.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{NeosocoChecker, OpenResult};
    use neopia_protocol::{BasicSensory, HANDSHAKE_REQUEST};
    use neopia_serial::mock::MockSerialBackend;
    use neopia_tools::ConnectorConfig;
    use parking_lot::Mutex;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Vec<u8>>>,
        out: Mutex<Vec<u8>>,
    }

    impl FrameHandler for Recorder {
        fn handle_sensory(&self, frame: &[u8]) -> Result<(), ProtocolError> {
            BasicSensory::try_from(frame)?;
            self.frames.lock().push(frame.to_vec());
            Ok(())
        }

        fn motoring_frame(&self) -> Vec<u8> {
            self.out.lock().clone()
        }
    }

    fn sensory() -> Vec<u8> {
        BasicSensory {
            inputs: [4, 5, 6],
            remote: 1,
            battery: 180,
        }
        .encode()
        .to_vec()
    }

    #[test]
    fn test_one_reply_per_frame_and_release() {
        let backend = Arc::new(MockSerialBackend::new());
        let device = backend.add_port("COM1");
        device.reply_to(HANDSHAKE_REQUEST, b"FF,Neosoco,04,0,A1B2C3D4E5F6\r\n".to_vec());

        let mut connector = SerialConnector::new(
            "Neosoco[0]",
            backend.clone(),
            Arc::new(NeosocoChecker),
            ConnectorConfig {
                read_timeout_ms: 5,
                ..ConnectorConfig::default()
            },
            8,
        );
        assert_eq!(connector.open(None), OpenResult::Found);
        device.take_written();
        let handshakes = device.write_count();

        let handler = Arc::new(Recorder::default());
        *handler.out.lock() = vec![0xCD, 0xAB, 0x01];
        let control = Arc::new(IoControl::new());
        let thread = {
            let handler: Arc<dyn FrameHandler> = handler.clone();
            let control = control.clone();
            thread::spawn(move || io_loop(connector, handler, control, PipelineConfig::default()))
        };

        // 一个无效帧（校验和错误）也会触发回发
        let mut bad = sensory();
        bad[7] ^= 0xFF;
        device.push_rx(&sensory());
        device.push_rx(&bad);
        let deadline = Instant::now() + Duration::from_secs(2);
        while device.write_count() < handshakes + 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(handler.frames.lock().len(), 1);
        assert_eq!(device.take_written(), vec![0xCD, 0xAB, 0x01, 0xCD, 0xAB, 0x01]);

        // 释放：最后一帧输出发送后退出
        *handler.out.lock() = vec![0xCD, 0xAB, 0x00];
        control.release();
        device.push_rx(&sensory());
        thread.join().unwrap();
        assert!(!control.is_releasing());
        assert_eq!(device.written(), vec![0xCD, 0xAB, 0x00]);
    }

    #[test]
    fn test_release_without_device_times_out() {
        let backend = Arc::new(MockSerialBackend::new());
        let connector = SerialConnector::new(
            "Neosoco[1]",
            backend,
            Arc::new(NeosocoChecker),
            ConnectorConfig::default(),
            8,
        );
        let control = Arc::new(IoControl::new());
        let handler: Arc<dyn FrameHandler> = Arc::new(Recorder::default());
        let config = PipelineConfig {
            idle_sleep: Duration::from_millis(1),
            release_timeout: Duration::from_millis(20),
        };
        let c = control.clone();
        let thread = thread::spawn(move || io_loop(connector, handler, c, config));
        control.release();
        thread.join().unwrap();
        assert!(!control.is_running());
    }
}
