//! 房間索引與房間命名規則

use crate::connection::types::ConnectionId;
use std::collections::{HashMap, HashSet};

/// 組織房間前綴，連線註冊時自動加入
pub const ORGANIZATION_ROOM_PREFIX: &str = "org:";
/// 頻道房間前綴
pub const CHANNEL_ROOM_PREFIX: &str = "channel:";

pub fn organization_room(organization_id: &str) -> String {
    format!("{}{}", ORGANIZATION_ROOM_PREFIX, organization_id)
}

pub fn channel_room(channel: &str) -> String {
    format!("{}{}", CHANNEL_ROOM_PREFIX, channel)
}

/// 房間類別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Organization,
    Channel,
    Custom,
}

impl RoomKind {
    pub fn of(room: &str) -> Self {
        if room.starts_with(ORGANIZATION_ROOM_PREFIX) {
            RoomKind::Organization
        } else if room.starts_with(CHANNEL_ROOM_PREFIX) {
            RoomKind::Channel
        } else {
            RoomKind::Custom
        }
    }

    /// 客戶端是否可自行加入或離開
    pub fn is_client_joinable(&self) -> bool {
        !matches!(self, RoomKind::Organization)
    }
}

/// 房間名稱到成員連線的索引
#[derive(Debug, Default)]
pub struct RoomIndex {
    members: HashMap<String, HashSet<ConnectionId>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入房間，返回是否為新成員
    pub fn join(&mut self, room: &str, connection_id: &ConnectionId) -> bool {
        self.members
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.clone())
    }

    /// 離開房間，空房間會被移除
    pub fn leave(&mut self, room: &str, connection_id: &ConnectionId) -> bool {
        let Some(members) = self.members.get_mut(room) else {
            return false;
        };
        let removed = members.remove(connection_id);
        if members.is_empty() {
            self.members.remove(room);
        }
        removed
    }

    pub fn members(&self, room: &str) -> impl Iterator<Item = &ConnectionId> {
        self.members.get(room).into_iter().flat_map(|members| members.iter())
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.members.get(room).map_or(0, HashSet::len)
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("org:O1", RoomKind::Organization, false)]
    #[case("channel:agent-events", RoomKind::Channel, true)]
    #[case("project-42", RoomKind::Custom, true)]
    fn test_room_kind(#[case] room: &str, #[case] kind: RoomKind, #[case] joinable: bool) {
        assert_eq!(RoomKind::of(room), kind);
        assert_eq!(RoomKind::of(room).is_client_joinable(), joinable);
    }

    #[test]
    fn test_room_names() {
        assert_eq!(organization_room("O1"), "org:O1");
        assert_eq!(channel_room("tool-events"), "channel:tool-events");
    }

    #[test]
    fn test_join_leave_removes_empty_room() {
        let mut index = RoomIndex::new();
        let c1 = ConnectionId::from("c1");

        assert!(index.join("r", &c1));
        assert!(!index.join("r", &c1));
        assert_eq!(index.member_count("r"), 1);

        assert!(index.leave("r", &c1));
        assert!(!index.leave("r", &c1));
        assert_eq!(index.room_count(), 0);
    }
}
