//! 类型化通道模型
//!
//! - [`Value`] / [`ValueKind`]: 通道值
//! - [`Channel`]: 带角色、范围与边沿标志的值槽
//! - [`EntityTree`]: 实体与通道的 arena

mod channel;
mod entity;
mod value;

pub use channel::{Arity, Channel, ChannelId, ChannelListener, ChannelSpec, Role};
pub use entity::{Entity, EntityId, EntityTree};
pub use value::{Value, ValueKind};
