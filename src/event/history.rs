//! 近期事件緩衝區
//!
//! 固定容量的環形緩衝，超出容量時淘汰最舊事件。這是盡力而為的快取，
//! 供重播與查詢使用，不保證完整性。

use crate::event::types::Event;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// 參考容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// 歷史查詢條件
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub channel: Option<String>,
    pub organization_id: Option<String>,
    /// 只返回時間戳晚於此時間的事件
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl HistoryQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(channel) = &self.channel {
            if event.channel.as_str() != channel {
                return false;
            }
        }
        if let Some(organization_id) = &self.organization_id {
            if event.metadata.organization_id.as_deref() != Some(organization_id.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            match event.metadata.timestamp {
                Some(timestamp) if timestamp > since => {}
                _ => return false,
            }
        }
        true
    }
}

/// 固定容量的歷史事件緩衝
#[derive(Debug)]
pub struct HistoryBuffer {
    events: RwLock<VecDeque<Arc<Event>>>,
    capacity: usize,
}

impl HistoryBuffer {
    /// 創建指定容量的緩衝區，容量至少為 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// 附加事件，超出容量時淘汰最舊事件
    pub fn append(&self, event: Arc<Event>) {
        let mut events = self.events.write();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// 依條件查詢，結果按附加順序排列（最新在最後），最多 `limit` 筆
    pub fn query(&self, query: &HistoryQuery) -> Vec<Arc<Event>> {
        let limit = query.limit.clamp(1, self.capacity);
        let events = self.events.read();

        let mut matched: Vec<Arc<Event>> = events
            .iter()
            .rev()
            .filter(|event| query.matches(event))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
