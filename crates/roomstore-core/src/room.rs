// ABOUTME: Defines Room, a conversation known to the store, and its display-name resolution.
// ABOUTME: Names fall back from explicit name to aliases to joined members to the raw room id.

use serde::{Deserialize, Serialize};

use crate::state::RoomState;

/// A room tracked by the store together with its live state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub live_state: RoomState,
}

impl Room {
    /// Create a room with an empty state snapshot.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            live_state: RoomState::new(),
        }
    }

    /// Resolve the name shown for this room from the point of view of `self_user_id`.
    ///
    /// Order: explicit room name, canonical alias, first alias, then the
    /// joined members other than ourselves ("Alice", "Alice and Bob",
    /// "Alice and 3 others"), and finally the room id.
    pub fn display_name(&self, self_user_id: &str) -> String {
        let state = &self.live_state;

        if let Some(name) = state.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        if let Some(alias) = state.canonical_alias.as_deref() {
            return alias.to_string();
        }
        if let Some(alias) = state.aliases.first() {
            return alias.clone();
        }

        let others: Vec<&str> = state
            .joined_members()
            .filter(|m| m.user_id != self_user_id)
            .map(|m| m.name())
            .collect();

        match others.as_slice() {
            [] => self.room_id.clone(),
            [only] => only.to_string(),
            [first, second] => format!("{} and {}", first, second),
            [first, rest @ ..] => format!("{} and {} others", first, rest.len()),
        }
    }

    pub fn topic(&self) -> Option<&str> {
        self.live_state.topic.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use serde_json::json;

    fn join(room: &mut Room, user_id: &str, name: Option<&str>) {
        let mut content = json!({"membership": "join"});
        if let Some(name) = name {
            content["displayname"] = json!(name);
        }
        let event = Event::new("$m", &room.room_id, "m.room.member", user_id, content)
            .with_state_key(user_id);
        room.live_state.apply(&event);
    }

    #[test]
    fn explicit_name_wins() {
        let mut room = Room::new("!r:hs");
        room.live_state.name = Some("Ops".to_string());
        room.live_state.canonical_alias = Some("#ops:hs".to_string());
        assert_eq!(room.display_name("@me:hs"), "Ops");
    }

    #[test]
    fn alias_used_when_unnamed() {
        let mut room = Room::new("!r:hs");
        room.live_state.aliases = vec!["#first:hs".to_string()];
        assert_eq!(room.display_name("@me:hs"), "#first:hs");
    }

    #[test]
    fn members_used_excluding_self() {
        let mut room = Room::new("!r:hs");
        join(&mut room, "@me:hs", Some("Me"));
        join(&mut room, "@alice:hs", Some("Alice"));
        assert_eq!(room.display_name("@me:hs"), "Alice");

        join(&mut room, "@bob:hs", None);
        assert_eq!(room.display_name("@me:hs"), "Alice and @bob:hs");

        join(&mut room, "@carol:hs", Some("Carol"));
        assert_eq!(room.display_name("@me:hs"), "Alice and 2 others");
    }

    #[test]
    fn falls_back_to_room_id() {
        let room = Room::new("!lonely:hs");
        assert_eq!(room.display_name("@me:hs"), "!lonely:hs");
    }
}
