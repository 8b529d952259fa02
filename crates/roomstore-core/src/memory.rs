// ABOUTME: In-memory implementation of the store contract: rooms, timelines, tokens and summaries.
// ABOUTME: Maps sit behind RwLocks so foreground writers and a background persister can share them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::contract::{EventStore, StoreListener};
use crate::event::{Direction, Event, PageResult, SentState, TokenChunk};
use crate::metadata::{Credentials, Metadata};
use crate::room::Room;
use crate::state::RoomState;
use crate::summary::RoomSummary;
use crate::timeline::{self, EventLog};
use crate::user::User;

/// The memory tier. Every map is keyed by room id.
///
/// Locks are always taken in the order rooms, events, tokens, summaries,
/// users, metadata, and never held across calls back into the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, Room>>,
    events: RwLock<HashMap<String, EventLog>>,
    tokens: RwLock<HashMap<String, String>>,
    summaries: RwLock<HashMap<String, RoomSummary>>,
    users: RwLock<HashMap<String, User>>,
    metadata: RwLock<Metadata>,
}

impl MemoryStore {
    /// An empty store with blank metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store whose metadata identifies `credentials`.
    pub fn with_credentials(credentials: &Credentials, version: u32) -> Self {
        let store = Self::new();
        store.replace_metadata(Metadata::new(credentials, version));
        store
    }

    /// Drop every room, timeline, token, summary and user. Metadata is left alone.
    pub fn reset(&self) {
        let mut rooms = self.rooms.write();
        let mut events = self.events.write();
        let mut tokens = self.tokens.write();
        let mut summaries = self.summaries.write();
        let mut users = self.users.write();
        rooms.clear();
        events.clear();
        tokens.clear();
        summaries.clear();
        users.clear();
    }

    /// A deep copy of the metadata record.
    pub fn metadata(&self) -> Metadata {
        self.metadata.read().clone()
    }

    pub fn replace_metadata(&self, metadata: Metadata) {
        *self.metadata.write() = metadata;
    }

    /// Mutate metadata in place; `f` reports whether it changed anything.
    pub fn update_metadata<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Metadata) -> bool,
    {
        f(&mut self.metadata.write())
    }

    /// Set the own display name (trimmed) and mirror it onto the cached own
    /// user. Returns whether the value changed.
    pub fn change_display_name(&self, display_name: Option<String>) -> bool {
        let (changed, user_id, display_name) = {
            let mut metadata = self.metadata.write();
            let changed = metadata.set_display_name(display_name);
            (changed, metadata.user_id.clone(), metadata.user_display_name.clone())
        };
        if changed {
            if let Some(user) = self.users.write().get_mut(&user_id) {
                user.display_name = display_name;
            }
        }
        changed
    }

    /// Set the own avatar URL and mirror it onto the cached own user.
    /// Returns whether the value changed.
    pub fn change_avatar_url(&self, avatar_url: Option<String>) -> bool {
        let (changed, user_id, avatar_url) = {
            let mut metadata = self.metadata.write();
            let changed = metadata.set_avatar_url(avatar_url);
            (changed, metadata.user_id.clone(), metadata.user_avatar_url.clone())
        };
        if changed {
            if let Some(user) = self.users.write().get_mut(&user_id) {
                user.avatar_url = avatar_url;
            }
        }
        changed
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.read().keys().cloned().collect()
    }

    pub fn summary_room_ids(&self) -> Vec<String> {
        self.summaries.read().keys().cloned().collect()
    }

    pub fn has_room(&self, room_id: &str) -> bool {
        self.rooms.read().contains_key(room_id)
    }

    /// Number of cached events for a room (0 when unknown).
    pub fn event_count(&self, room_id: &str) -> usize {
        self.events.read().get(room_id).map_or(0, |log| log.len())
    }

    /// A copy of the room's timeline, preserving order.
    pub fn room_log(&self, room_id: &str) -> Option<EventLog> {
        self.events.read().get(room_id).cloned()
    }

    pub fn room_token(&self, room_id: &str) -> Option<String> {
        self.tokens.read().get(room_id).cloned()
    }

    pub fn set_room_token(&self, room_id: &str, token: String) {
        self.tokens.write().insert(room_id.to_string(), token);
    }

    /// Install a timeline read back from storage, creating the room if needed.
    pub fn restore_room_log(&self, room_id: &str, log: EventLog) {
        self.rooms
            .write()
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id));
        self.events.write().insert(room_id.to_string(), log);
    }

    /// Replace a known room's live state. Returns false for unknown rooms.
    pub fn restore_live_state(&self, room_id: &str, state: RoomState) -> bool {
        match self.rooms.write().get_mut(room_id) {
            Some(room) => {
                room.live_state = state;
                true
            }
            None => false,
        }
    }

    pub fn restore_summary(&self, summary: RoomSummary) {
        self.summaries
            .write()
            .insert(summary.room_id.clone(), summary);
    }

    /// Mutate a room's live state in place. Returns false for unknown rooms.
    pub fn update_live_state<F>(&self, room_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut RoomState),
    {
        match self.rooms.write().get_mut(room_id) {
            Some(room) => {
                f(&mut room.live_state);
                true
            }
            None => false,
        }
    }

    /// Locally sent events still waiting for a retry, oldest first.
    pub fn latest_unsent_events(&self, room_id: &str) -> Vec<Event> {
        self.events
            .read()
            .get(room_id)
            .map(|log| {
                log.values()
                    .filter(|e| e.sent_state == SentState::WaitingRetry)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recompute a room's summary from its newest event and live state.
    /// Returns false when the room or its timeline is missing.
    pub fn rebuild_summary(&self, room_id: &str, matrix_id: &str) -> bool {
        let summary = {
            let rooms = self.rooms.read();
            let Some(room) = rooms.get(room_id) else {
                return false;
            };
            let events = self.events.read();
            let Some((_, latest)) = events.get(room_id).and_then(|log| log.last()) else {
                return false;
            };
            let self_user_id = self.metadata.read().user_id.clone();
            RoomSummary::build(matrix_id, room, latest, &room.live_state, &self_user_id)
        };
        self.restore_summary(summary);
        true
    }
}

impl EventStore for MemoryStore {
    fn open(&self) {}

    fn close(&self) {}

    fn clear(&self) {
        self.reset();
        self.metadata.write().event_stream_token = None;
    }

    fn commit(&self) {}

    fn is_ready(&self) -> bool {
        true
    }

    fn is_permanent(&self) -> bool {
        false
    }

    fn disk_usage(&self) -> u64 {
        0
    }

    fn set_listener(&self, _listener: Arc<dyn StoreListener>) {
        tracing::debug!("memory store has no load phase; listener ignored");
    }

    fn event_stream_token(&self) -> Option<String> {
        self.metadata.read().event_stream_token.clone()
    }

    fn set_event_stream_token(&self, token: Option<String>) {
        self.metadata.write().event_stream_token = token;
    }

    fn display_name(&self) -> Option<String> {
        self.metadata.read().user_display_name.clone()
    }

    fn set_display_name(&self, display_name: Option<String>) {
        self.change_display_name(display_name);
    }

    fn avatar_url(&self) -> Option<String> {
        self.metadata.read().user_avatar_url.clone()
    }

    fn set_avatar_url(&self, avatar_url: Option<String>) {
        self.change_avatar_url(avatar_url);
    }

    fn store_user(&self, user: User) {
        if user.user_id.is_empty() {
            return;
        }
        self.users.write().insert(user.user_id.clone(), user);
    }

    fn user(&self, user_id: &str) -> Option<User> {
        self.users.read().get(user_id).cloned()
    }

    fn users(&self) -> Vec<User> {
        self.users.read().values().cloned().collect()
    }

    fn store_room(&self, room: Room) {
        self.rooms.write().insert(room.room_id.clone(), room);
    }

    fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.read().get(room_id).cloned()
    }

    fn rooms(&self) -> Vec<Room> {
        self.rooms.read().values().cloned().collect()
    }

    fn delete_room(&self, room_id: &str) {
        let mut rooms = self.rooms.write();
        let mut events = self.events.write();
        let mut tokens = self.tokens.write();
        let mut summaries = self.summaries.write();
        rooms.remove(room_id);
        events.remove(room_id);
        tokens.remove(room_id);
        summaries.remove(room_id);
    }

    fn store_live_state_for_room(&self, _room_id: &str) {}

    fn store_room_events(&self, room_id: &str, chunk: TokenChunk, direction: Direction) {
        self.rooms
            .write()
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id));

        let mut events = self.events.write();
        let log = events.entry(room_id.to_string()).or_default();

        let new_token = match direction {
            Direction::Forwards => {
                timeline::merge_forwards(log, chunk.chunk);
                chunk.start
            }
            Direction::Backwards if log.is_empty() => {
                timeline::merge_backwards(log, chunk.chunk);
                chunk.start
            }
            Direction::Backwards => {
                timeline::merge_backwards(log, chunk.chunk);
                None
            }
        };

        if let Some(token) = new_token {
            self.tokens.write().insert(room_id.to_string(), token);
        }
    }

    fn store_live_room_event(&self, event: Event) -> bool {
        match self.events.write().get_mut(&event.room_id) {
            Some(log) => {
                log.insert(event.event_id.clone(), event);
                true
            }
            None => {
                tracing::debug!(
                    "dropping live event {} for room {} without a timeline",
                    event.event_id,
                    event.room_id
                );
                false
            }
        }
    }

    fn update_event_content(&self, room_id: &str, event_id: &str, content: Value) -> bool {
        match self
            .events
            .write()
            .get_mut(room_id)
            .and_then(|log| log.get_mut(event_id))
        {
            Some(event) => {
                event.content = content;
                true
            }
            None => false,
        }
    }

    fn delete_event(&self, event: &Event) -> bool {
        self.events
            .write()
            .get_mut(&event.room_id)
            .and_then(|log| log.shift_remove(&event.event_id))
            .is_some()
    }

    fn room_messages(&self, room_id: &str) -> Option<Vec<Event>> {
        self.events
            .read()
            .get(room_id)
            .map(|log| log.values().cloned().collect())
    }

    fn oldest_event(&self, room_id: &str) -> Option<Event> {
        self.events
            .read()
            .get(room_id)
            .and_then(|log| log.first())
            .map(|(_, e)| e.clone())
    }

    fn latest_event(&self, room_id: &str) -> Option<Event> {
        self.events
            .read()
            .get(room_id)
            .and_then(|log| log.last())
            .map(|(_, e)| e.clone())
    }

    fn earlier_messages(
        &self,
        room_id: &str,
        from_token: Option<&str>,
        limit: usize,
    ) -> PageResult {
        let events = self.events.read();
        let Some(log) = events.get(room_id) else {
            return PageResult::UnknownToken;
        };
        let tokens = self.tokens.read();
        timeline::earlier_messages(log, tokens.get(room_id).map(String::as_str), from_token, limit)
    }

    fn store_summary(
        &self,
        matrix_id: &str,
        room_id: &str,
        event: &Event,
        room_state: &RoomState,
        self_user_id: &str,
    ) -> bool {
        let summary = {
            let rooms = self.rooms.read();
            let Some(room) = rooms.get(room_id) else {
                return false;
            };
            let in_timeline = self
                .events
                .read()
                .get(room_id)
                .is_some_and(|log| log.contains_key(&event.event_id));
            if !in_timeline {
                tracing::debug!(
                    "not summarizing room {} around event {} missing from its timeline",
                    room_id,
                    event.event_id
                );
                return false;
            }
            RoomSummary::build(matrix_id, room, event, room_state, self_user_id)
        };
        self.restore_summary(summary);
        true
    }

    fn flush_summary(&self, summary: &RoomSummary) {
        self.rebuild_summary(&summary.room_id, &summary.matrix_id);
    }

    fn flush_summaries(&self) {
        let room_ids = self.room_ids();
        let owners: Vec<(String, String)> = {
            let summaries = self.summaries.read();
            let own_id = self.metadata.read().user_id.clone();
            room_ids
                .into_iter()
                .map(|room_id| {
                    let matrix_id = summaries
                        .get(&room_id)
                        .map_or_else(|| own_id.clone(), |s| s.matrix_id.clone());
                    (room_id, matrix_id)
                })
                .collect()
        };
        for (room_id, matrix_id) in owners {
            self.rebuild_summary(&room_id, &matrix_id);
        }
    }

    fn summary(&self, room_id: &str) -> Option<RoomSummary> {
        self.summaries.read().get(room_id).cloned()
    }

    fn summaries(&self) -> Vec<RoomSummary> {
        self.summaries.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ROOM: &str = "!room:hs";

    fn ev(id: &str) -> Event {
        Event::new(id, ROOM, "m.room.message", "@a:hs", json!({"body": id}))
    }

    fn ids(store: &MemoryStore) -> Vec<String> {
        store
            .room_messages(ROOM)
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.event_id)
            .collect()
    }

    fn forwards(store: &MemoryStore, start: &str, events: Vec<Event>) {
        store.store_room_events(
            ROOM,
            TokenChunk::new(Some(start.to_string()), None, events),
            Direction::Forwards,
        );
    }

    #[test]
    fn forward_chunk_sets_log_and_token() {
        let store = MemoryStore::new();
        forwards(&store, "t", vec![ev("e1"), ev("e2"), ev("e3")]);

        assert_eq!(ids(&store), vec!["e1", "e2", "e3"]);
        assert_eq!(store.room_token(ROOM).as_deref(), Some("t"));
        assert!(store.room(ROOM).is_some(), "room is created on first reference");
    }

    #[test]
    fn backward_chunk_prepends_without_touching_token() {
        let store = MemoryStore::new();
        forwards(&store, "t-live", vec![ev("e3"), ev("e4")]);
        store.store_room_events(
            ROOM,
            TokenChunk::new(Some("t-back".to_string()), None, vec![ev("e2"), ev("e1")]),
            Direction::Backwards,
        );

        assert_eq!(ids(&store), vec!["e1", "e2", "e3", "e4"]);
        assert_eq!(store.room_token(ROOM).as_deref(), Some("t-live"));
    }

    #[test]
    fn backward_chunk_into_empty_room_sets_token() {
        let store = MemoryStore::new();
        store.store_room_events(
            ROOM,
            TokenChunk::new(Some("t0".to_string()), None, vec![ev("e2"), ev("e1")]),
            Direction::Backwards,
        );

        assert_eq!(ids(&store), vec!["e1", "e2"]);
        assert_eq!(store.room_token(ROOM).as_deref(), Some("t0"));
    }

    #[test]
    fn live_event_requires_seeded_room() {
        let store = MemoryStore::new();
        assert!(!store.store_live_room_event(ev("e1")));
        assert!(store.room_messages(ROOM).is_none());

        forwards(&store, "t", vec![ev("e1")]);
        assert!(store.store_live_room_event(ev("e2")));
        assert_eq!(ids(&store), vec!["e1", "e2"]);
    }

    #[test]
    fn update_content_and_delete_event() {
        let store = MemoryStore::new();
        forwards(&store, "t", vec![ev("e1"), ev("e2"), ev("e3")]);

        assert!(store.update_event_content(ROOM, "e2", json!({"body": "edited"})));
        assert!(!store.update_event_content(ROOM, "missing", json!({})));
        assert_eq!(store.room_messages(ROOM).unwrap()[1].content["body"], "edited");

        assert!(store.delete_event(&ev("e2")));
        assert!(!store.delete_event(&ev("e2")));
        assert_eq!(ids(&store), vec!["e1", "e3"]);
    }

    #[test]
    fn delete_room_removes_everything() {
        let store = MemoryStore::new();
        forwards(&store, "t", vec![ev("e1")]);
        let state = RoomState::new();
        assert!(store.store_summary("@me:hs", ROOM, &ev("e1"), &state, "@me:hs"));

        store.delete_room(ROOM);

        assert!(store.room(ROOM).is_none());
        assert!(store.room_messages(ROOM).is_none());
        assert!(store.room_token(ROOM).is_none());
        assert!(store.summary(ROOM).is_none());
    }

    #[test]
    fn summary_requires_event_in_timeline() {
        let store = MemoryStore::new();
        forwards(&store, "t", vec![ev("e1")]);
        let state = RoomState::new();

        assert!(!store.store_summary("@me:hs", ROOM, &ev("ghost"), &state, "@me:hs"));
        assert!(!store.store_summary("@me:hs", "!other:hs", &ev("e1"), &state, "@me:hs"));
        assert!(store.summary(ROOM).is_none());

        assert!(store.store_summary("@me:hs", ROOM, &ev("e1"), &state, "@me:hs"));
        assert_eq!(store.summary(ROOM).unwrap().latest_event.event_id, "e1");
    }

    #[test]
    fn flush_summaries_tracks_latest_event() {
        let store = MemoryStore::new();
        forwards(&store, "t", vec![ev("e1")]);
        let state = RoomState::new();
        store.store_summary("@me:hs", ROOM, &ev("e1"), &state, "@me:hs");

        store.store_live_room_event(ev("e2"));
        store.flush_summaries();

        assert_eq!(store.summary(ROOM).unwrap().latest_event.event_id, "e2");
    }

    #[test]
    fn flush_summaries_covers_rooms_never_summarized() {
        let store = MemoryStore::with_credentials(&Credentials::new("@me:hs", "tok"), 1);
        forwards(&store, "t", vec![ev("e1"), ev("e2")]);
        store.store_room(Room::new("!empty:hs"));
        assert!(store.summary(ROOM).is_none());

        store.flush_summaries();

        let summary = store.summary(ROOM).expect("seeded room should gain a summary");
        assert_eq!(summary.latest_event.event_id, "e2");
        assert_eq!(summary.matrix_id, "@me:hs");
        assert!(store.summary("!empty:hs").is_none());
    }

    #[test]
    fn users_are_cached_and_own_user_follows_profile() {
        let store = MemoryStore::with_credentials(&Credentials::new("@me:hs", "tok"), 1);
        store.store_user(User::new("@me:hs"));
        store.store_user(User::new("@bob:hs"));
        store.store_user(User::new(""));
        assert_eq!(store.users().len(), 2);

        store.set_display_name(Some(" Me ".to_string()));
        store.set_avatar_url(Some("mxc://hs/me".to_string()));

        let me = store.user("@me:hs").unwrap();
        assert_eq!(me.display_name.as_deref(), Some("Me"));
        assert_eq!(me.avatar_url.as_deref(), Some("mxc://hs/me"));
        assert!(store.user("@bob:hs").unwrap().display_name.is_none());
        assert!(!store.change_display_name(Some("Me".to_string())));

        store.clear();
        assert!(store.users().is_empty());
    }

    #[test]
    fn unknown_token_for_unknown_room() {
        let store = MemoryStore::new();
        assert!(store.earlier_messages(ROOM, None, 10).is_unknown());
        forwards(&store, "t", vec![ev("e1")]);
        assert!(store.earlier_messages(ROOM, Some("bogus-token"), 10).is_unknown());
    }

    #[test]
    fn unsent_events_are_listed_oldest_first() {
        let store = MemoryStore::new();
        forwards(&store, "t", vec![ev("e1")]);
        let mut a = Event::local_echo(ROOM, "m.room.message", "@me:hs", json!({"body": "a"}));
        a.sent_state = SentState::WaitingRetry;
        let mut b = Event::local_echo(ROOM, "m.room.message", "@me:hs", json!({"body": "b"}));
        b.sent_state = SentState::WaitingRetry;
        store.store_live_room_event(a.clone());
        store.store_live_room_event(b.clone());

        let unsent: Vec<String> = store
            .latest_unsent_events(ROOM)
            .into_iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(unsent, vec![a.event_id, b.event_id]);
    }

    #[test]
    fn stream_token_lives_in_metadata() {
        let store = MemoryStore::with_credentials(&Credentials::new("@me:hs", "tok"), 1);
        store.set_event_stream_token(Some("s42".to_string()));
        assert_eq!(store.event_stream_token().as_deref(), Some("s42"));
        assert_eq!(store.metadata().event_stream_token.as_deref(), Some("s42"));

        store.clear();
        assert!(store.event_stream_token().is_none());
        assert_eq!(store.metadata().user_id, "@me:hs");
    }
}
