//! Neobot 与 Robot
//!
//! [`Neobot`] 是一棵带传输的实体树（每个物理设备一个实现），
//! [`Robot`] 按逻辑下标聚合若干 Neobot，是注册到调度器的单元。

use crate::connector::ConnectionState;
use crate::error::WriteError;
use crate::model::{Channel, ChannelId, ChannelListener, EntityId, EntityTree, Value};
use std::sync::Arc;

/// 带传输的实体树
pub trait Neobot: Send + Sync {
    fn tree(&self) -> &EntityTree;

    fn index(&self) -> usize;

    /// 是否已收到首帧（或确认不可用）
    fn is_ready(&self) -> bool;

    fn connection_state(&self) -> ConnectionState;

    /// 在输出锁内快照输出通道并清除写入标志
    fn request_motoring_data(&self);

    /// 恢复所有通道初始值并清空派生分类器状态
    fn reset(&self);

    /// 释放传输（只执行一次）
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// 实体引用（树 + 下标）
#[derive(Clone, Copy)]
pub struct EntityRef<'a> {
    pub tree: &'a EntityTree,
    pub id: EntityId,
}

impl<'a> EntityRef<'a> {
    pub fn name(&self) -> &'a str {
        self.tree.entity(self.id).map(|e| e.name()).unwrap_or_default()
    }

    pub fn channels(&self) -> impl Iterator<Item = &'a Channel> {
        self.tree.entity_channels(self.id)
    }
}

/// 逻辑机器人
pub struct Robot {
    type_id: String,
    name: String,
    index: usize,
    neobots: Vec<Arc<dyn Neobot>>,
}

impl Robot {
    pub fn new(type_id: impl Into<String>, name: impl Into<String>, index: usize) -> Self {
        Self {
            type_id: type_id.into(),
            name: name.into(),
            index,
            neobots: Vec::new(),
        }
    }

    pub fn with_neobot(mut self, neobot: Arc<dyn Neobot>) -> Self {
        self.neobots.push(neobot);
        self
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn neobots(&self) -> &[Arc<dyn Neobot>] {
        &self.neobots
    }

    // ============================================================
    // 查找
    // ============================================================

    pub fn find_channel_by_id(&self, id: ChannelId) -> Option<&Channel> {
        self.neobots
            .iter()
            .find_map(|n| n.tree().find_channel_by_id(id))
    }

    /// 按 `neobot.channel` 路径查找，首段必须是 Neobot 根实体名
    pub fn find_channel_by_name(&self, path: &str) -> Option<&Channel> {
        let (head, rest) = path.split_once('.')?;
        self.neobots
            .iter()
            .find(|n| n.tree().name().eq_ignore_ascii_case(head))
            .and_then(|n| n.tree().find_channel_by_name(rest))
    }

    /// 按路径查找实体：`neosoco` 为根实体，`neosoco.child` 进入子实体
    pub fn find_entity_by_name(&self, path: &str) -> Option<EntityRef<'_>> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let tree = self
            .neobots
            .iter()
            .find(|n| n.tree().name().eq_ignore_ascii_case(head))?
            .tree();
        let id = match rest {
            Some(rest) => tree.find_entity_by_name(rest)?,
            None => tree.root(),
        };
        Some(EntityRef { tree, id })
    }

    // ============================================================
    // 读写
    // ============================================================

    /// 读取第一个值；未知通道返回 `Integer(0)`
    pub fn read(&self, id: ChannelId) -> Value {
        self.read_at(id, 0)
    }

    pub fn read_at(&self, id: ChannelId, index: usize) -> Value {
        self.find_channel_by_id(id)
            .map(|c| c.read_at(index))
            .unwrap_or_default()
    }

    pub fn write(&self, id: ChannelId, value: impl Into<Value>) -> Result<(), WriteError> {
        self.channel(id)?.write(value)
    }

    pub fn write_at(
        &self,
        id: ChannelId,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<(), WriteError> {
        self.channel(id)?.write_at(index, value)
    }

    pub fn write_all(&self, id: ChannelId, values: &[Value]) -> Result<usize, WriteError> {
        self.channel(id)?.write_all(values)
    }

    /// 上一周期该通道是否变化；未知通道返回 false
    pub fn has_event(&self, id: ChannelId) -> bool {
        self.find_channel_by_id(id).is_some_and(Channel::has_event)
    }

    fn channel(&self, id: ChannelId) -> Result<&Channel, WriteError> {
        self.find_channel_by_id(id)
            .ok_or(WriteError::UnknownChannel(id))
    }

    // ============================================================
    // 监听器
    // ============================================================

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        for neobot in &self.neobots {
            neobot.tree().add_listener(listener.clone());
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) {
        for neobot in &self.neobots {
            neobot.tree().remove_listener(listener);
        }
    }

    pub fn clear_listeners(&self) {
        for neobot in &self.neobots {
            neobot.tree().clear_listeners();
        }
    }

    // ============================================================
    // 调度周期
    // ============================================================

    pub fn latch_sensory(&self) {
        self.neobots.iter().for_each(|n| n.tree().latch_sensory());
    }

    pub fn request_motoring_data(&self) {
        self.neobots.iter().for_each(|n| n.request_motoring_data());
    }

    pub fn latch_motoring(&self) {
        self.neobots.iter().for_each(|n| n.tree().latch_motoring());
    }

    pub fn notify_motoring(&self) {
        self.neobots.iter().for_each(|n| n.tree().notify_motoring());
    }

    // ============================================================
    // 生命周期
    // ============================================================

    pub fn is_ready(&self) -> bool {
        self.neobots.iter().all(|n| n.is_ready())
    }

    pub fn reset(&self) {
        self.neobots.iter().for_each(|n| n.reset());
    }

    pub fn dispose(&self) {
        self.neobots.iter().for_each(|n| n.dispose());
    }

    pub fn is_disposed(&self) -> bool {
        self.neobots.iter().all(|n| n.is_disposed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelSpec, Role, ValueKind};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Plain {
        tree: EntityTree,
        requests: AtomicUsize,
        disposed: AtomicBool,
    }

    impl Plain {
        fn new() -> Self {
            let mut tree = EntityTree::new("Bot", 0x0010_0000);
            let root = tree.root();
            tree.add_channel(
                root,
                ChannelSpec::new(0x0010_0001, "Motor", Role::Effector, ValueKind::Integer)
                    .range(-100.0, 100.0),
            )
            .unwrap();
            tree.add_channel(
                root,
                ChannelSpec::new(0x0010_0002, "Light", Role::Sensor, ValueKind::Integer),
            )
            .unwrap();
            let arm = tree.add_entity(root, "Arm", 0x0020_0000).unwrap();
            tree.add_channel(
                arm,
                ChannelSpec::new(0x0020_0001, "Angle", Role::Effector, ValueKind::Float),
            )
            .unwrap();
            Self {
                tree,
                requests: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            }
        }
    }

    impl Neobot for Plain {
        fn tree(&self) -> &EntityTree {
            &self.tree
        }
        fn index(&self) -> usize {
            0
        }
        fn is_ready(&self) -> bool {
            true
        }
        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
        fn request_motoring_data(&self) {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.tree.clear_written();
        }
        fn reset(&self) {
            self.tree.reset();
        }
        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
        fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    fn robot() -> (Robot, Arc<Plain>) {
        let plain = Arc::new(Plain::new());
        let robot = Robot::new("test.bot", "Bot", 0).with_neobot(plain.clone());
        (robot, plain)
    }

    #[test]
    fn test_read_write_by_id() {
        let (robot, _) = robot();
        let motor = ChannelId::new(0x0010_0001);
        robot.write(motor, 250).unwrap();
        assert_eq!(robot.read(motor), Value::Integer(100));
        assert_eq!(robot.read(ChannelId::new(0x0099_0001)), Value::Integer(0));
        assert_eq!(
            robot.write(ChannelId::new(0x0099_0001), 1),
            Err(WriteError::UnknownChannel(ChannelId::new(0x0099_0001)))
        );
        assert!(matches!(
            robot.write(ChannelId::new(0x0010_0002), 1),
            Err(WriteError::ReadOnly(_))
        ));
        robot.write(ChannelId::new(0x0020_0001), 1.5).unwrap();
        assert_eq!(robot.read(ChannelId::new(0x0020_0001)), Value::Float(1.5));
    }

    #[test]
    fn test_find_by_name_requires_root_segment() {
        let (robot, _) = robot();
        assert!(robot.find_channel_by_name("motor").is_none());
        assert_eq!(robot.find_channel_by_name("bot.MOTOR").unwrap().name(), "Motor");
        assert_eq!(robot.find_channel_by_name("bot.arm.angle").unwrap().name(), "Angle");

        assert_eq!(robot.find_entity_by_name("BOT").unwrap().name(), "Bot");
        let arm = robot.find_entity_by_name("bot.arm").unwrap();
        assert_eq!(arm.name(), "Arm");
        assert_eq!(arm.channels().count(), 1);
        assert!(robot.find_entity_by_name("bot.leg").is_none());
    }

    #[test]
    fn test_has_event_after_latch() {
        let (robot, plain) = robot();
        let light = ChannelId::new(0x0010_0002);
        plain.tree.find_channel_by_id(light).unwrap().put(9, true);
        assert!(!robot.has_event(light));
        robot.latch_sensory();
        assert!(robot.has_event(light));
        assert!(!robot.has_event(ChannelId::new(0x0099_0001)));
    }

    #[test]
    fn test_cycle_and_lifecycle_delegate() {
        let (robot, plain) = robot();
        robot.write(ChannelId::new(0x0010_0001), 5).unwrap();
        robot.request_motoring_data();
        assert_eq!(plain.requests.load(Ordering::SeqCst), 1);
        assert!(!plain.tree.find_channel_by_name("motor").unwrap().is_written());

        assert!(robot.is_ready());
        robot.dispose();
        assert!(robot.is_disposed());
    }
}
