//! 就绪跟踪
//!
//! 每个正在连接的机器人先登记为 required，连接成功收到首帧或确认无可用端口后
//! 登记为 checked。`checked >= required` 时所有机器人都已就绪。

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counts {
    required: usize,
    checked: usize,
}

/// 就绪计数器
#[derive(Debug, Default)]
pub struct Readiness {
    counts: Mutex<Counts>,
    changed: Condvar,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_required(&self) {
        self.counts.lock().required += 1;
    }

    pub fn register_checked(&self) {
        self.counts.lock().checked += 1;
        self.changed.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        let counts = self.counts.lock();
        counts.checked >= counts.required
    }

    /// (required, checked)
    pub fn counts(&self) -> (usize, usize) {
        let counts = self.counts.lock();
        (counts.required, counts.checked)
    }

    /// 等待就绪，超时返回 false
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counts = self.counts.lock();
        while counts.checked < counts.required {
            if self.changed.wait_until(&mut counts, deadline).timed_out() {
                return counts.checked >= counts.required;
            }
        }
        true
    }
}
