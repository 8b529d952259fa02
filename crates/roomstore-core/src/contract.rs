// ABOUTME: The store contract shared by the in-memory index and the file-backed overlay.
// ABOUTME: Sync and UI collaborators program against EventStore and never see which tier backs it.

use std::sync::Arc;

use serde_json::Value;

use crate::event::{Direction, Event, PageResult, TokenChunk};
use crate::room::Room;
use crate::state::RoomState;
use crate::summary::RoomSummary;
use crate::user::User;

/// Receives store lifecycle notifications, keyed by account id.
pub trait StoreListener: Send + Sync {
    /// The initial load finished and the store can be read.
    fn on_store_ready(&self, account_id: &str);

    /// Persisted data could not be loaded; the store was wiped and rebuilt empty.
    fn on_store_corrupted(&self, account_id: &str);
}

/// Everything a consumer can do with a room/event store.
///
/// Mutations are synchronous against memory and never block on disk; a
/// durable implementation persists them on [`EventStore::commit`]. Operations
/// on unknown rooms are benign no-ops.
pub trait EventStore: Send + Sync {
    // Lifecycle.

    fn open(&self);
    fn close(&self);
    fn clear(&self);
    fn commit(&self);
    fn is_ready(&self) -> bool;
    /// Whether data outlives the process.
    fn is_permanent(&self) -> bool;
    /// Bytes used on disk; advisory only.
    fn disk_usage(&self) -> u64;
    fn set_listener(&self, listener: Arc<dyn StoreListener>);

    // Session metadata.

    fn event_stream_token(&self) -> Option<String>;
    fn set_event_stream_token(&self, token: Option<String>);
    fn display_name(&self) -> Option<String>;
    fn set_display_name(&self, display_name: Option<String>);
    fn avatar_url(&self) -> Option<String>;
    fn set_avatar_url(&self, avatar_url: Option<String>);

    // Users.

    fn store_user(&self, user: User);
    fn user(&self, user_id: &str) -> Option<User>;
    fn users(&self) -> Vec<User>;

    // Rooms.

    fn store_room(&self, room: Room);
    fn room(&self, room_id: &str) -> Option<Room>;
    fn rooms(&self) -> Vec<Room>;
    fn delete_room(&self, room_id: &str);
    /// Signal that the room's live state changed and should be persisted.
    fn store_live_state_for_room(&self, room_id: &str);

    // Timeline.

    fn store_room_events(&self, room_id: &str, chunk: TokenChunk, direction: Direction);
    /// Append a live event. Returns false when the room has no timeline yet.
    fn store_live_room_event(&self, event: Event) -> bool;
    fn update_event_content(&self, room_id: &str, event_id: &str, content: Value) -> bool;
    fn delete_event(&self, event: &Event) -> bool;
    fn room_messages(&self, room_id: &str) -> Option<Vec<Event>>;
    fn oldest_event(&self, room_id: &str) -> Option<Event>;
    fn latest_event(&self, room_id: &str) -> Option<Event>;
    fn earlier_messages(&self, room_id: &str, from_token: Option<&str>, limit: usize)
    -> PageResult;

    // Summaries.

    /// Build the room's summary around `event`. Returns false when the room
    /// is unknown or the event is not in its timeline.
    fn store_summary(
        &self,
        matrix_id: &str,
        room_id: &str,
        event: &Event,
        room_state: &RoomState,
        self_user_id: &str,
    ) -> bool;
    fn flush_summary(&self, summary: &RoomSummary);
    fn flush_summaries(&self);
    fn summary(&self, room_id: &str) -> Option<RoomSummary>;
    fn summaries(&self) -> Vec<RoomSummary>;
}
