//! 实体树
//!
//! 实体与通道存放在扁平数组（arena）中，通过稳定下标互相引用。
//! 构造完成后树结构不再变化，通道值通过通道自身的锁修改，
//! 因此 `EntityTree` 可以直接在线程间共享（`Arc<EntityTree>` 或嵌入 `Arc` 对象）。

use crate::error::DriverError;
use crate::model::{Channel, ChannelId, ChannelListener, ChannelSpec};
use std::sync::Arc;

/// 实体下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 实体节点
#[derive(Debug)]
pub struct Entity {
    name: String,
    uid: u32,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    channels: Vec<usize>,
}

impl Entity {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn children(&self) -> &[EntityId] {
        &self.children
    }
}

/// 实体树
#[derive(Debug)]
pub struct EntityTree {
    entities: Vec<Entity>,
    channels: Vec<Channel>,
    // 传感分区（Sensor + Event）与输出分区（Effector + Command）
    sensory: Vec<usize>,
    motoring: Vec<usize>,
}

impl EntityTree {
    /// 创建只含根实体的树
    pub fn new(root_name: impl Into<String>, uid: u32) -> Self {
        Self {
            entities: vec![Entity {
                name: root_name.into(),
                uid,
                parent: None,
                children: Vec::new(),
                channels: Vec::new(),
            }],
            channels: Vec::new(),
            sensory: Vec::new(),
            motoring: Vec::new(),
        }
    }

    pub fn root(&self) -> EntityId {
        EntityId(0)
    }

    pub fn name(&self) -> &str {
        &self.entities[0].name
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0)
    }

    /// 添加子实体
    pub fn add_entity(
        &mut self,
        parent: EntityId,
        name: impl Into<String>,
        uid: u32,
    ) -> Result<EntityId, DriverError> {
        if parent.0 >= self.entities.len() {
            return Err(DriverError::UnknownEntity(parent.0));
        }
        let id = EntityId(self.entities.len());
        self.entities.push(Entity {
            name: name.into(),
            uid,
            parent: Some(parent),
            children: Vec::new(),
            channels: Vec::new(),
        });
        self.entities[parent.0].children.push(id);
        Ok(id)
    }

    /// 向实体添加通道；整棵树内通道 ID 必须唯一
    pub fn add_channel(
        &mut self,
        owner: EntityId,
        spec: ChannelSpec,
    ) -> Result<ChannelId, DriverError> {
        if owner.0 >= self.entities.len() {
            return Err(DriverError::UnknownEntity(owner.0));
        }
        let id = spec.id;
        if self.channels.iter().any(|c| c.id() == id) {
            return Err(DriverError::DuplicateChannel(id));
        }
        let slot = self.channels.len();
        if spec.role.is_sensory() {
            self.sensory.push(slot);
        } else {
            self.motoring.push(slot);
        }
        self.channels.push(Channel::new(spec));
        self.entities[owner.0].channels.push(slot);
        Ok(id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// 实体直属的通道
    pub fn entity_channels(&self, id: EntityId) -> impl Iterator<Item = &Channel> {
        self.entities
            .get(id.0)
            .into_iter()
            .flat_map(|e| e.channels.iter().map(|&slot| &self.channels[slot]))
    }

    pub fn sensory_channels(&self) -> impl Iterator<Item = &Channel> {
        self.sensory.iter().map(|&slot| &self.channels[slot])
    }

    pub fn motoring_channels(&self) -> impl Iterator<Item = &Channel> {
        self.motoring.iter().map(|&slot| &self.channels[slot])
    }

    // ============================================================
    // 查找
    // ============================================================

    /// 按 ID 查找（先按 owner 定位实体）
    pub fn find_channel_by_id(&self, id: ChannelId) -> Option<&Channel> {
        let owner = self.entities.iter().find(|e| e.uid == id.owner())?;
        owner
            .channels
            .iter()
            .map(|&slot| &self.channels[slot])
            .find(|c| c.id() == id)
    }

    /// 按点分路径查找通道（相对根实体，不区分大小写）
    ///
    /// `"leftmotor"` 在根实体下查找，`"wheel.speed"` 先进入子实体 `wheel`。
    pub fn find_channel_by_name(&self, path: &str) -> Option<&Channel> {
        self.find_channel_from(self.root(), &path.to_lowercase())
    }

    fn find_channel_from(&self, at: EntityId, path: &str) -> Option<&Channel> {
        match path.split_once('.') {
            None => self
                .entity_channels(at)
                .find(|c| c.name().to_lowercase() == path),
            Some((head, rest)) => {
                let child = self.find_child(at, head)?;
                self.find_channel_from(child, rest)
            },
        }
    }

    /// 按点分路径查找子实体（相对根实体，不区分大小写）
    pub fn find_entity_by_name(&self, path: &str) -> Option<EntityId> {
        let path = path.to_lowercase();
        let mut at = self.root();
        for segment in path.split('.') {
            at = self.find_child(at, segment)?;
        }
        Some(at)
    }

    fn find_child(&self, at: EntityId, name: &str) -> Option<EntityId> {
        self.entities[at.0]
            .children
            .iter()
            .copied()
            .find(|c| self.entities[c.0].name.to_lowercase() == name)
    }

    // ============================================================
    // 批量操作
    // ============================================================

    pub fn latch_sensory(&self) {
        self.sensory_channels().for_each(Channel::latch);
    }

    pub fn latch_motoring(&self) {
        self.motoring_channels().for_each(Channel::latch);
    }

    pub fn notify_sensory(&self) {
        self.sensory_channels().for_each(Channel::notify_changed);
    }

    pub fn notify_motoring(&self) {
        self.motoring_channels().for_each(Channel::notify_changed);
    }

    pub fn clear_written(&self) {
        self.channels.iter().for_each(Channel::clear_written);
    }

    pub fn reset(&self) {
        self.channels.iter().for_each(Channel::reset);
    }

    /// 在所有通道上注册监听器
    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        for channel in &self.channels {
            channel.add_listener(listener.clone());
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) {
        for channel in &self.channels {
            channel.remove_listener(listener);
        }
    }

    pub fn clear_listeners(&self) {
        self.channels.iter().for_each(Channel::clear_listeners);
    }
}
