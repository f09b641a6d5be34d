//! Neosoco 机器人
//!
//! 一棵固定的实体树（根实体 `Neosoco`）加一种传输：
//!
//! - 串口：[`SerialConnector`] + 后台 IO 线程（[`io_loop`]），每收一帧回一帧
//! - 远程链路：注册到 [`Linker`]，以 JSON 对象收发
//!
//! 输出快照在调度线程的 `request_motoring_data()` 中生成，IO 线程只读取快照编码。

use crate::connector::{
    AtomicConnectionState, ConnectionState, NeosocoChecker, OpenResult, SerialConnector,
};
use crate::error::DriverError;
use crate::link::{LinkEndpoint, Linker};
use crate::model::{Arity, ChannelId, ChannelSpec, EntityTree, Role, Value, ValueKind};
use crate::neobot::{Neobot, Robot};
use crate::pipeline::{FrameHandler, IoControl, PipelineConfig, io_loop};
use crate::readiness::Readiness;
use neopia_protocol::*;
use neopia_serial::SerialBackend;
use neopia_tools::NeopiaConfig;
use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use tracing::{info, warn};

/// 根实体名
pub const ENTITY_NAME: &str = "Neosoco";

/// 远程链路上的模块名与分组名
pub const LINK_MODULE: &str = "hamster";
pub const LINK_GROUP: &str = "hamster";

// 基础通道
pub const OUTPUT_1: ChannelId = ChannelId::new(ID_OUTPUT_1);
pub const OUTPUT_2: ChannelId = ChannelId::new(ID_OUTPUT_2);
pub const OUTPUT_3: ChannelId = ChannelId::new(ID_OUTPUT_3);
pub const INPUT_1: ChannelId = ChannelId::new(ID_INPUT_1);
pub const INPUT_2: ChannelId = ChannelId::new(ID_INPUT_2);
pub const INPUT_3: ChannelId = ChannelId::new(ID_INPUT_3);
pub const REMOTE_CTL: ChannelId = ChannelId::new(ID_REMOTE_CTL);
pub const BATTERY: ChannelId = ChannelId::new(ID_BATTERY);
pub const LEFT_MOTOR: ChannelId = ChannelId::new(ID_LEFT_MOTOR);
pub const RIGHT_MOTOR: ChannelId = ChannelId::new(ID_RIGHT_MOTOR);
pub const NOTE: ChannelId = ChannelId::new(ID_NOTE);

// 扩展通道
pub const SIGNAL_STRENGTH: ChannelId = ChannelId::new(ID_SIGNAL_STRENGTH);
pub const LEFT_PROXIMITY: ChannelId = ChannelId::new(ID_LEFT_PROXIMITY);
pub const RIGHT_PROXIMITY: ChannelId = ChannelId::new(ID_RIGHT_PROXIMITY);
pub const LEFT_FLOOR: ChannelId = ChannelId::new(ID_LEFT_FLOOR);
pub const RIGHT_FLOOR: ChannelId = ChannelId::new(ID_RIGHT_FLOOR);
pub const ACCELERATION: ChannelId = ChannelId::new(ID_ACCELERATION);
pub const LIGHT: ChannelId = ChannelId::new(ID_LIGHT);
pub const TEMPERATURE: ChannelId = ChannelId::new(ID_TEMPERATURE);
pub const INPUT_A: ChannelId = ChannelId::new(ID_INPUT_A);
pub const INPUT_B: ChannelId = ChannelId::new(ID_INPUT_B);
pub const LINE_TRACER_STATE: ChannelId = ChannelId::new(ID_LINE_TRACER_STATE);
pub const TILT: ChannelId = ChannelId::new(ID_TILT);
pub const BATTERY_STATE: ChannelId = ChannelId::new(ID_BATTERY_STATE);
pub const LINE_TRACER_MODE: ChannelId = ChannelId::new(ID_LINE_TRACER_MODE);

fn int(id: u32, name: &str, role: Role, min: f64, max: f64) -> ChannelSpec {
    ChannelSpec::new(id, name, role, ValueKind::Integer).range(min, max)
}

/// 构建 Neosoco 实体树（25 个通道）
pub fn build_tree() -> Result<EntityTree, DriverError> {
    use Role::*;

    let mut tree = EntityTree::new(ENTITY_NAME, NEOSOCO_UID);
    let root = tree.root();
    let specs = [
        int(ID_OUTPUT_1, "Output1", Effector, 0.0, 255.0),
        int(ID_OUTPUT_2, "Output2", Effector, 0.0, 255.0),
        int(ID_OUTPUT_3, "Output3", Effector, 0.0, 255.0),
        int(ID_INPUT_1, "Input1", Sensor, 0.0, 255.0),
        int(ID_INPUT_2, "Input2", Sensor, 0.0, 255.0),
        int(ID_INPUT_3, "Input3", Sensor, 0.0, 255.0),
        int(ID_REMOTE_CTL, "RemoteCtl", Sensor, 0.0, 255.0),
        int(ID_BATTERY, "Battery", Sensor, 0.0, 255.0),
        int(ID_LEFT_MOTOR, "LeftMotor", Effector, 0.0, 47.0),
        int(ID_RIGHT_MOTOR, "RightMotor", Effector, 0.0, 47.0),
        int(ID_NOTE, "Note", Command, 0.0, 72.0),
        int(ID_SIGNAL_STRENGTH, "SignalStrength", Sensor, -128.0, 0.0),
        int(ID_LEFT_PROXIMITY, "LeftProximity", Sensor, 0.0, 255.0),
        int(ID_RIGHT_PROXIMITY, "RightProximity", Sensor, 0.0, 255.0),
        int(ID_LEFT_FLOOR, "LeftFloor", Sensor, 0.0, 255.0),
        int(ID_RIGHT_FLOOR, "RightFloor", Sensor, 0.0, 255.0),
        int(ID_ACCELERATION, "Acceleration", Sensor, -32768.0, 32767.0).arity(Arity::Fixed(3)),
        int(ID_LIGHT, "Light", Sensor, 0.0, 65535.0),
        int(ID_TEMPERATURE, "Temperature", Sensor, -40.0, 88.0),
        int(ID_INPUT_A, "InputA", Sensor, 0.0, 255.0),
        int(ID_INPUT_B, "InputB", Sensor, 0.0, 255.0),
        int(ID_LINE_TRACER_STATE, "LineTracerState", Event, 0.0, 255.0),
        int(ID_TILT, "Tilt", Event, -3.0, 3.0),
        int(ID_BATTERY_STATE, "BatteryState", Event, 0.0, 2.0)
            .initial(i64::from(BatteryLevel::Normal.as_u8())),
        int(ID_LINE_TRACER_MODE, "LineTracerMode", Command, 0.0, 15.0),
    ];
    for spec in specs {
        tree.add_channel(root, spec)?;
    }
    Ok(tree)
}

// ============================================================================
// 输出快照
// ============================================================================

/// 调度线程写、IO 线程读的输出快照
#[derive(Debug)]
struct Motoring {
    outputs: [i64; 3],
    left_motor: i64,
    right_motor: i64,
    note: i64,
    line_tracer_mode: i64,
    note_pending: bool,
    mode_pending: bool,
    note_id: i64,
    mode_id: i64,
    /// 远程链路上持续发送的输出对象
    link: Map<String, JsonValue>,
}

impl Motoring {
    fn new(index: usize) -> Self {
        let link = json!({
            "module": LINK_MODULE,
            "index": index,
            "leftWheel": 0,
            "rightWheel": 0,
            "buzzer": 0,
            "outputA": 0,
            "outputB": 0,
            "noteId": 0,
            "note": 0,
            "lineTracerModeId": 0,
            "lineTracerMode": 0,
        });
        Self {
            outputs: [0; 3],
            left_motor: 0,
            right_motor: 0,
            note: 0,
            line_tracer_mode: 0,
            note_pending: false,
            mode_pending: false,
            note_id: 0,
            mode_id: 0,
            link: match link {
                JsonValue::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    fn packet(&self) -> MotoringPacket {
        MotoringPacket::from_values(self.outputs, self.left_motor, self.right_motor, self.note)
    }
}

fn next_change_id(id: i64) -> i64 {
    (id % 255) + 1
}

/// 链路上最近一次见到的事件 ID（`None` 表示尚未收到）
#[derive(Debug, Default)]
struct LinkIds {
    line_tracer_state: Option<i64>,
    tilt: Option<i64>,
    battery_state: Option<i64>,
}

// ============================================================================
// 共享状态
// ============================================================================

/// IO 线程 / 链路线程与调度线程共享的部分
struct NeosocoShared {
    index: usize,
    tag: String,
    tree: EntityTree,
    motoring: Mutex<Motoring>,
    layout: Mutex<SensoryLayout>,
    decoder: Mutex<ExtendedDecoder>,
    link_ids: Mutex<LinkIds>,
    /// 远程链路报告的对端状态
    remote_state: AtomicConnectionState,
    ready: AtomicBool,
    disposed: AtomicBool,
    readiness: Option<Arc<Readiness>>,
}

impl NeosocoShared {
    fn new(index: usize, readiness: Option<Arc<Readiness>>) -> Result<Self, DriverError> {
        Ok(Self {
            index,
            tag: format!("{}[{}]", ENTITY_NAME, index),
            tree: build_tree()?,
            motoring: Mutex::new(Motoring::new(index)),
            layout: Mutex::new(SensoryLayout::Basic),
            decoder: Mutex::new(ExtendedDecoder::new()),
            link_ids: Mutex::new(LinkIds::default()),
            remote_state: AtomicConnectionState::default(),
            ready: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            readiness,
        })
    }

    fn put(&self, id: ChannelId, value: impl Into<Value>, fired: bool) {
        if let Some(channel) = self.tree.find_channel_by_id(id) {
            channel.put(value, fired);
        }
    }

    fn put_at(&self, id: ChannelId, index: usize, value: impl Into<Value>) {
        if let Some(channel) = self.tree.find_channel_by_id(id) {
            channel.put_at(index, value, true);
        }
    }

    fn read_i64(&self, id: ChannelId) -> i64 {
        self.tree
            .find_channel_by_id(id)
            .map(|c| c.read().as_i64())
            .unwrap_or_default()
    }

    fn is_written(&self, id: ChannelId) -> bool {
        self.tree.find_channel_by_id(id).is_some_and(|c| c.is_written())
    }

    /// 首次就绪（收到首帧或确认不可用）时登记到就绪计数器
    fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::AcqRel)
            && let Some(readiness) = &self.readiness
        {
            readiness.register_checked();
        }
    }

    fn request_motoring_data(&self) {
        let mut motoring = self.motoring.lock();
        motoring.outputs = [
            self.read_i64(OUTPUT_1),
            self.read_i64(OUTPUT_2),
            self.read_i64(OUTPUT_3),
        ];
        motoring.left_motor = self.read_i64(LEFT_MOTOR);
        motoring.right_motor = self.read_i64(RIGHT_MOTOR);
        motoring.note = self.read_i64(NOTE);
        motoring.line_tracer_mode = self.read_i64(LINE_TRACER_MODE);
        if self.is_written(NOTE) {
            motoring.note_pending = true;
        }
        if self.is_written(LINE_TRACER_MODE) {
            motoring.mode_pending = true;
            self.decoder.lock().arm_line_tracer();
        }
        self.tree.clear_written();
    }

    fn reset(&self) {
        self.tree.reset();
        self.decoder.lock().reset();
        *self.link_ids.lock() = LinkIds::default();
        *self.motoring.lock() = Motoring::new(self.index);
    }

    fn apply_basic(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        let sensory = BasicSensory::try_from(frame)?;
        for (id, value) in [INPUT_1, INPUT_2, INPUT_3].into_iter().zip(sensory.inputs) {
            self.put(id, value, true);
        }
        self.put(REMOTE_CTL, sensory.remote, true);
        self.put(BATTERY, sensory.battery, true);
        Ok(())
    }

    fn apply_extended(&self, model: ModelCode, frame: &[u8]) -> Result<(), ProtocolError> {
        if frame.len() != EXTENDED_FRAME_LEN || frame[..2] != SENSORY_MARKER {
            return Err(ProtocolError::InvalidLength {
                expected: EXTENDED_FRAME_LEN,
                actual: frame.len(),
            });
        }
        let update = self
            .decoder
            .lock()
            .decode(model, &frame[SENSORY_MARKER.len()..])?;
        let r = &update.reading;

        self.put(SIGNAL_STRENGTH, r.signal_strength, true);
        self.put(LEFT_PROXIMITY, r.proximity[0], true);
        self.put(RIGHT_PROXIMITY, r.proximity[1], true);
        self.put(LEFT_FLOOR, r.floor[0], true);
        self.put(RIGHT_FLOOR, r.floor[1], true);
        for (i, axis) in r.acceleration.into_iter().enumerate() {
            self.put_at(ACCELERATION, i, axis);
        }
        self.put(LIGHT, update.light, true);
        self.put(TEMPERATURE, update.temperature, true);
        self.put(INPUT_A, r.inputs[0], true);
        self.put(INPUT_B, r.inputs[1], true);
        if let Some((tilt, fired)) = update.tilt {
            self.put(TILT, i64::from(tilt.as_i8()), fired);
        }
        if let Some((level, fired)) = update.battery {
            self.put(BATTERY_STATE, level.as_u8(), fired);
        }
        if let Some(state) = update.line_tracer {
            self.put(LINE_TRACER_STATE, state, true);
        }
        Ok(())
    }

    /// 链路事件：ID 变化且之前见过 ID 时才写入值
    fn put_link_event(
        &self,
        received: &Map<String, JsonValue>,
        id: ChannelId,
        field: &str,
        id_field: &str,
        last: &mut Option<i64>,
    ) {
        let Some(event_id) = received.get(id_field).and_then(JsonValue::as_i64) else {
            return;
        };
        if *last != Some(event_id) {
            if last.is_some()
                && let Some(value) = received.get(field).and_then(JsonValue::as_i64)
            {
                self.put(id, value, true);
            }
            *last = Some(event_id);
        }
    }
}

impl FrameHandler for NeosocoShared {
    fn handle_sensory(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        let layout = *self.layout.lock();
        match layout {
            SensoryLayout::Basic => self.apply_basic(frame)?,
            SensoryLayout::Extended(model) => self.apply_extended(model, frame)?,
        }
        self.mark_ready();
        self.tree.notify_sensory();
        Ok(())
    }

    fn motoring_frame(&self) -> Vec<u8> {
        self.motoring.lock().packet().encode().to_vec()
    }
}

impl LinkEndpoint for NeosocoShared {
    fn module(&self) -> &str {
        LINK_MODULE
    }

    fn group(&self) -> &str {
        LINK_GROUP
    }

    fn index(&self) -> usize {
        self.index
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn encode_motoring(&self) -> JsonValue {
        let mut guard = self.motoring.lock();
        let m = &mut *guard;
        m.link.insert("leftWheel".into(), m.left_motor.into());
        m.link.insert("rightWheel".into(), m.right_motor.into());
        m.link.insert("outputA".into(), m.outputs[0].into());
        m.link.insert("outputB".into(), m.outputs[1].into());
        if m.note_pending {
            m.note_pending = false;
            m.note_id = next_change_id(m.note_id);
            m.link.insert("note".into(), m.note.into());
            m.link.insert("noteId".into(), m.note_id.into());
        }
        if m.mode_pending {
            m.mode_pending = false;
            m.mode_id = next_change_id(m.mode_id);
            m.link.insert("lineTracerMode".into(), m.line_tracer_mode.into());
            m.link.insert("lineTracerModeId".into(), m.mode_id.into());
        }
        JsonValue::Object(m.link.clone())
    }

    fn decode_sensory(&self, received: &Map<String, JsonValue>) {
        let field = |name: &str| received.get(name).and_then(JsonValue::as_i64);

        if let Some(code) = field("connectionState") {
            self.remote_state.set(ConnectionState::from_u8(code as u8));
        }
        for (id, name) in [
            (SIGNAL_STRENGTH, "signalStrength"),
            (LEFT_PROXIMITY, "leftProximity"),
            (RIGHT_PROXIMITY, "rightProximity"),
            (LEFT_FLOOR, "leftFloor"),
            (RIGHT_FLOOR, "rightFloor"),
            (LIGHT, "light"),
            (TEMPERATURE, "temperature"),
            (INPUT_A, "inputA"),
            (INPUT_B, "inputB"),
        ] {
            if let Some(value) = field(name) {
                self.put(id, value, true);
            }
        }
        for (i, name) in ["accelerationX", "accelerationY", "accelerationZ"]
            .into_iter()
            .enumerate()
        {
            if let Some(value) = field(name) {
                self.put_at(ACCELERATION, i, value);
            }
        }

        {
            let mut ids = self.link_ids.lock();
            let ids = &mut *ids;
            self.put_link_event(
                received,
                LINE_TRACER_STATE,
                "lineTracerState",
                "lineTracerStateId",
                &mut ids.line_tracer_state,
            );
            self.put_link_event(received, TILT, "tilt", "tiltId", &mut ids.tilt);
            self.put_link_event(
                received,
                BATTERY_STATE,
                "batteryState",
                "batteryStateId",
                &mut ids.battery_state,
            );
        }

        self.mark_ready();
        self.tree.notify_sensory();
    }
}

// ============================================================================
// NeosocoRobot
// ============================================================================

enum Transport {
    Idle,
    Serial {
        control: Arc<IoControl>,
        io_thread: Option<JoinHandle<()>>,
        state: Arc<AtomicConnectionState>,
    },
    Link {
        linker: Arc<Linker>,
    },
}

/// Neosoco 机器人（实体树 + 传输）
pub struct NeosocoRobot {
    shared: Arc<NeosocoShared>,
    transport: Mutex<Transport>,
}

impl NeosocoRobot {
    /// 通过串口连接
    ///
    /// 握手在调用线程中同步完成；找到设备后启动 IO 线程。找不到设备不是错误，
    /// 机器人会立即被标记为就绪（不可用）。
    pub fn serial(
        index: usize,
        config: &NeopiaConfig,
        backend: Arc<dyn SerialBackend>,
        readiness: Option<Arc<Readiness>>,
    ) -> Result<Arc<Self>, DriverError> {
        let shared = Arc::new(NeosocoShared::new(index, readiness)?);
        if let Some(readiness) = &shared.readiness {
            readiness.register_required();
        }

        let mut connector = SerialConnector::new(
            shared.tag.clone(),
            backend,
            Arc::new(NeosocoChecker),
            config.connector.clone(),
            SensoryLayout::Basic.frame_len(),
        );

        let transport = match connector.open(None) {
            OpenResult::Found => {
                let layout = match (config.basic, connector.model()) {
                    (false, Some(model)) => SensoryLayout::Extended(model),
                    _ => SensoryLayout::Basic,
                };
                *shared.layout.lock() = layout;
                connector.set_frame_len(layout.frame_len());

                let state = connector.state_handle();
                let control = Arc::new(IoControl::new());
                let handler: Arc<dyn FrameHandler> = shared.clone();
                let io_control = control.clone();
                let io_thread = spawn(move || {
                    io_loop(connector, handler, io_control, PipelineConfig::default())
                });
                Transport::Serial {
                    control,
                    io_thread: Some(io_thread),
                    state,
                }
            },
            OpenResult::NotAvailable => {
                shared.mark_ready();
                Transport::Idle
            },
        };

        Ok(Arc::new(Self {
            shared,
            transport: Mutex::new(transport),
        }))
    }

    /// 通过远程链路连接
    pub fn linked(
        index: usize,
        linker: &Arc<Linker>,
        readiness: Option<Arc<Readiness>>,
    ) -> Result<Arc<Self>, DriverError> {
        let shared = Arc::new(NeosocoShared::new(index, readiness)?);
        if let Some(readiness) = &shared.readiness {
            readiness.register_required();
        }
        linker.register(shared.clone());
        Ok(Arc::new(Self {
            shared,
            transport: Mutex::new(Transport::Link {
                linker: linker.clone(),
            }),
        }))
    }

    pub fn tag(&self) -> &str {
        &self.shared.tag
    }

    /// 当前传感帧布局
    pub fn layout(&self) -> SensoryLayout {
        *self.shared.layout.lock()
    }

    /// 当前输出帧（调试用）
    pub fn motoring_packet(&self) -> MotoringPacket {
        self.shared.motoring.lock().packet()
    }
}

impl Neobot for NeosocoRobot {
    fn tree(&self) -> &EntityTree {
        &self.shared.tree
    }

    fn index(&self) -> usize {
        self.shared.index
    }

    fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    fn connection_state(&self) -> ConnectionState {
        match &*self.transport.lock() {
            Transport::Idle => ConnectionState::Disconnected,
            Transport::Serial { state, .. } => state.get(),
            Transport::Link { .. } => self.shared.remote_state.get(),
        }
    }

    fn request_motoring_data(&self) {
        self.shared.request_motoring_data();
    }

    fn reset(&self) {
        self.shared.reset();
    }

    fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.reset();
        // 等待中的调用者不应永远阻塞
        self.shared.mark_ready();

        let transport = std::mem::replace(&mut *self.transport.lock(), Transport::Idle);
        match transport {
            Transport::Idle => {},
            Transport::Serial {
                control, io_thread, ..
            } => {
                control.release();
                if let Some(handle) = io_thread
                    && handle.join().is_err()
                {
                    warn!("{} IO thread panicked", self.shared.tag);
                }
            },
            Transport::Link { linker } => {
                linker.unregister(LINK_MODULE, self.shared.index);
                info!("{} Disposed", self.shared.tag);
            },
        }
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}

impl Drop for NeosocoRobot {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// 将 Neosoco 包装为可注册到调度器的逻辑机器人
pub fn robot(neosoco: Arc<NeosocoRobot>) -> Robot {
    let index = neosoco.index();
    Robot::new(NEOSOCO_TYPE_ID, ENTITY_NAME, index).with_neobot(neosoco)
}
