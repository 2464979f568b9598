//! 訂閱索引
//!
//! 以頻道為鍵的索引，使 `matches` 的成本只與該頻道的訂閱數成正比。
//! 本結構本身不加鎖，由 [`ConnectionRegistry`](super::ConnectionRegistry)
//! 在同一把鎖下與連線表一起維護。

use crate::connection::types::{ConnectionId, SubscriptionId};
use crate::event::types::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// 以事件元數據欄位做等值比對的過濾條件
pub type SubscriptionFilters = HashMap<String, String>;

/// 連線對某個頻道的訂閱
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: SubscriptionId,
    pub connection_id: ConnectionId,
    pub channel: String,
    pub user_id: String,
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<SubscriptionFilters>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// 事件是否滿足此訂閱；任一邊缺少過濾鍵皆視為不匹配
    pub fn accepts(&self, event: &Event) -> bool {
        if !self.is_active || event.channel.as_str() != self.channel {
            return false;
        }
        match &self.filters {
            None => true,
            Some(filters) => filters
                .iter()
                .all(|(key, expected)| event.metadata.field(key) == Some(expected.as_str())),
        }
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_id: HashMap<SubscriptionId, Subscription>,
    by_channel: HashMap<String, HashSet<SubscriptionId>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subscription: Subscription) {
        self.by_channel
            .entry(subscription.channel.clone())
            .or_default()
            .insert(subscription.id.clone());
        self.by_id.insert(subscription.id.clone(), subscription);
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let subscription = self.by_id.remove(id)?;
        if let Some(ids) = self.by_channel.get_mut(&subscription.channel) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_channel.remove(&subscription.channel);
            }
        }
        Some(subscription)
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.by_id.get(id)
    }

    /// 只掃描事件所屬頻道上的訂閱
    pub fn matches<'a>(&'a self, event: &'a Event) -> impl Iterator<Item = &'a ConnectionId> + 'a {
        self.by_channel
            .get(event.channel.as_str())
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.by_id.get(id))
            .filter(move |subscription| subscription.accepts(event))
            .map(|subscription| &subscription.connection_id)
    }

    pub fn channel_len(&self, channel: &str) -> usize {
        self.by_channel.get(channel).map_or(0, HashSet::len)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn subscription(connection: &str, channel: &str, filters: Option<SubscriptionFilters>) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            connection_id: ConnectionId::from(connection),
            channel: channel.to_string(),
            user_id: "u".to_string(),
            organization_id: "O1".to_string(),
            filters,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn filters(pairs: &[(&str, &str)]) -> Option<SubscriptionFilters> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[rstest]
    #[case(None, Some("O1"), true)]
    #[case(filters(&[("organizationId", "O1")]), Some("O1"), true)]
    #[case(filters(&[("organizationId", "O1")]), Some("O2"), false)]
    #[case(filters(&[("organizationId", "O1")]), None, false)]
    #[case(filters(&[("organizationId", "O1"), ("userId", "u9")]), Some("O1"), false)]
    #[case(filters(&[("unknownKey", "x")]), Some("O1"), false)]
    fn test_filter_semantics(
        #[case] filters: Option<SubscriptionFilters>,
        #[case] organization: Option<&str>,
        #[case] expected: bool,
    ) {
        let sub = subscription("c1", "agent-events", filters);
        let mut event = Event::new("AGENT_CREATED", "agent-events", json!(null));
        event.metadata.organization_id = organization.map(str::to_string);
        assert_eq!(sub.accepts(&event), expected);
    }

    #[test]
    fn test_matches_only_scans_event_channel() {
        let mut index = SubscriptionIndex::new();
        index.insert(subscription("c1", "agent-events", None));
        index.insert(subscription("c2", "tool-events", None));

        let event = Event::new("AGENT_CREATED", "agent-events", json!(null));
        let matched: Vec<_> = index.matches(&event).cloned().collect();
        assert_eq!(matched, vec![ConnectionId::from("c1")]);
        assert_eq!(index.channel_len("agent-events"), 1);
    }

    #[test]
    fn test_remove_cleans_channel_bucket() {
        let mut index = SubscriptionIndex::new();
        let sub = subscription("c1", "agent-events", None);
        let id = sub.id.clone();
        index.insert(sub);

        assert!(index.remove(&id).is_some());
        assert!(index.remove(&id).is_none());
        assert_eq!(index.channel_len("agent-events"), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_inactive_subscription_never_matches() {
        let mut sub = subscription("c1", "agent-events", None);
        sub.is_active = false;
        let event = Event::new("AGENT_CREATED", "agent-events", json!(null));
        assert!(!sub.accepts(&event));
    }
}
