// ABOUTME: FileStore, the durable tier: wraps the memory tier and persists it through a background worker.
// ABOUTME: Every mutation is applied to memory, marks the room dirty, and reaches disk on the next commit.

use std::sync::Arc;

use parking_lot::Mutex;
use roomstore_core::{
    Credentials, Direction, Event, EventStore, MemoryStore, PageResult, Room, RoomState,
    RoomSummary, StoreListener, TokenChunk, User,
};
use serde_json::Value;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::dirty::DirtyBatch;
use crate::layout::{Layout, LayoutError};
use crate::persist;
use crate::shared::{Lifecycle, Shared};
use crate::worker::{Task, Worker};

/// Errors that can occur while constructing a FileStore.
#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("failed to start worker thread: {0}")]
    Worker(#[from] std::io::Error),
}

/// A store whose data survives restarts.
///
/// Metadata is checked synchronously in [`FileStore::new`]; room data is
/// loaded on the worker after [`EventStore::open`], and the store reports
/// not-ready until that finishes. A brand new store has nothing to load and
/// is ready immediately.
pub struct FileStore {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl FileStore {
    pub fn new(config: StoreConfig, credentials: Credentials) -> Result<Self, FileStoreError> {
        let shared = Arc::new(Shared::new(config, credentials));
        shared.adopt_or_reset_metadata()?;

        let store = Self {
            shared,
            worker: Mutex::new(None),
        };

        if store.shared.is_new_storage() {
            store.start_worker()?;
            store.shared.set_lifecycle(Lifecycle::Ready);
            tracing::info!(
                "created new store for {} at {}",
                store.shared.account_id(),
                store.shared.layout.root().display()
            );
        }

        Ok(store)
    }

    pub fn layout(&self) -> &Layout {
        &self.shared.layout
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// Whether the store was created from scratch rather than loaded.
    pub fn is_new_storage(&self) -> bool {
        self.shared.is_new_storage()
    }

    /// Rooms waiting for the next commit, without draining them.
    pub fn pending(&self) -> DirtyBatch {
        self.shared.dirty.pending()
    }

    pub fn room_token(&self, room_id: &str) -> Option<String> {
        self.shared.memory.room_token(room_id)
    }

    pub fn latest_unsent_events(&self, room_id: &str) -> Vec<Event> {
        self.shared.memory.latest_unsent_events(room_id)
    }

    /// Mutate a room's live state and mark it for persistence.
    pub fn update_live_state<F>(&self, room_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut RoomState),
    {
        let updated = self.shared.memory.update_live_state(room_id, f);
        if updated {
            self.shared.dirty.mark_state(room_id);
        }
        updated
    }

    fn memory(&self) -> &MemoryStore {
        &self.shared.memory
    }

    fn start_worker(&self) -> std::io::Result<()> {
        let mut slot = self.worker.lock();
        if slot.is_none() {
            *slot = Some(Worker::spawn(Arc::clone(&self.shared))?);
        }
        Ok(())
    }

    fn stop_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }

    fn submit(&self, task: Task) -> bool {
        match self.worker.lock().as_ref() {
            Some(worker) => worker.submit(task),
            None => false,
        }
    }

    /// Write the listed summaries right away instead of waiting for a commit.
    fn save_summaries_now(&self) {
        let rooms = self.shared.dirty.take_summaries();
        if rooms.is_empty() {
            return;
        }
        if !self.submit(Task::SaveSummaries(rooms.clone())) {
            tracing::debug!("no worker to flush summaries, keeping them dirty");
            for room in &rooms {
                self.shared.dirty.mark_summary(room);
            }
        }
    }
}

impl EventStore for FileStore {
    fn open(&self) {
        match self.shared.lifecycle() {
            Lifecycle::Closed => {}
            Lifecycle::Opening | Lifecycle::Ready => {
                tracing::debug!("store for {} already open", self.shared.account_id());
                return;
            }
            Lifecycle::Shutdown => {
                tracing::warn!("store for {} was closed, not reopening", self.shared.account_id());
                return;
            }
        }

        if !self.shared.transition(Lifecycle::Closed, Lifecycle::Opening) {
            return;
        }
        if let Err(e) = self.start_worker() {
            tracing::error!("failed to start worker for {}: {}", self.shared.account_id(), e);
            self.shared.set_lifecycle(Lifecycle::Closed);
            return;
        }
        self.submit(Task::Open);
    }

    fn close(&self) {
        if self.shared.lifecycle() == Lifecycle::Shutdown {
            return;
        }
        tracing::info!("closing store for {}", self.shared.account_id());
        self.shared.set_lifecycle(Lifecycle::Shutdown);
        self.stop_worker();
    }

    fn clear(&self) {
        tracing::info!("clearing store for {}", self.shared.account_id());
        self.stop_worker();
        if let Err(e) = self.shared.rebuild() {
            tracing::error!("failed to clear store for {}: {}", self.shared.account_id(), e);
        }
        self.shared.set_lifecycle(Lifecycle::Closed);
    }

    fn commit(&self) {
        if self.shared.lifecycle() == Lifecycle::Shutdown {
            tracing::debug!("ignoring commit on closed store");
            return;
        }
        if self.worker.lock().is_none() {
            tracing::debug!("commit before open, keeping dirty rooms");
            return;
        }

        let batch = self.shared.dirty.take();
        if batch.is_empty() {
            return;
        }
        tracing::debug!(
            "commit: {} message rooms, {} state rooms, {} summaries, metadata {}",
            batch.messages.len(),
            batch.states.len(),
            batch.summaries.len(),
            batch.metadata
        );

        if !batch.messages.is_empty() {
            self.submit(Task::SaveMessages(batch.messages));
        }
        if !batch.states.is_empty() {
            self.submit(Task::SaveStates(batch.states));
        }
        if batch.metadata {
            self.submit(Task::SaveMetadata(self.memory().metadata()));
        }
        if !batch.summaries.is_empty() {
            self.submit(Task::SaveSummaries(batch.summaries));
        }
    }

    fn is_ready(&self) -> bool {
        self.shared.lifecycle() == Lifecycle::Ready
    }

    fn is_permanent(&self) -> bool {
        true
    }

    fn disk_usage(&self) -> u64 {
        self.shared.layout.disk_usage()
    }

    fn set_listener(&self, listener: Arc<dyn StoreListener>) {
        self.shared.set_listener(listener);
    }

    fn event_stream_token(&self) -> Option<String> {
        self.memory().event_stream_token()
    }

    fn set_event_stream_token(&self, token: Option<String>) {
        tracing::debug!("event stream token set to {:?}", token);
        self.memory().set_event_stream_token(token);
        self.shared.dirty.mark_metadata();
    }

    fn display_name(&self) -> Option<String> {
        self.memory().display_name()
    }

    fn set_display_name(&self, display_name: Option<String>) {
        if self.memory().change_display_name(display_name) {
            self.shared.dirty.mark_metadata();
            self.commit();
        }
    }

    fn avatar_url(&self) -> Option<String> {
        self.memory().avatar_url()
    }

    fn set_avatar_url(&self, avatar_url: Option<String>) {
        if self.memory().change_avatar_url(avatar_url) {
            self.shared.dirty.mark_metadata();
            self.commit();
        }
    }

    fn store_user(&self, user: User) {
        self.memory().store_user(user);
    }

    fn user(&self, user_id: &str) -> Option<User> {
        self.memory().user(user_id)
    }

    fn users(&self) -> Vec<User> {
        self.memory().users()
    }

    fn store_room(&self, room: Room) {
        let room_id = room.room_id.clone();
        self.memory().store_room(room);
        self.shared.dirty.mark_state(&room_id);
    }

    fn room(&self, room_id: &str) -> Option<Room> {
        self.memory().room(room_id)
    }

    fn rooms(&self) -> Vec<Room> {
        self.memory().rooms()
    }

    fn delete_room(&self, room_id: &str) {
        tracing::debug!("deleting room {}", room_id);
        self.memory().delete_room(room_id);
        self.shared.dirty.forget(room_id);

        if !self.submit(Task::DeleteRoomFiles(room_id.to_string())) {
            if let Err(e) = persist::delete_room_files(&self.shared.layout, room_id) {
                tracing::error!("failed to delete files of {}: {}", room_id, e);
            }
        }
    }

    fn store_live_state_for_room(&self, room_id: &str) {
        self.shared.dirty.mark_state(room_id);
    }

    fn store_room_events(&self, room_id: &str, chunk: TokenChunk, direction: Direction) {
        // Paging through old history of an already full room must not
        // rewrite its file: the extra events would be cut on save anyway.
        let should_persist = direction == Direction::Forwards
            || !self.memory().has_room(room_id)
            || self.memory().event_count(room_id) < self.shared.config.max_stored_messages;

        self.memory().store_room_events(room_id, chunk, direction);

        if should_persist {
            self.shared.dirty.mark_messages(room_id);
        } else {
            tracing::debug!("not persisting backward fill of full room {}", room_id);
        }
    }

    fn store_live_room_event(&self, event: Event) -> bool {
        let room_id = event.room_id.clone();
        let stored = self.memory().store_live_room_event(event);
        if stored {
            self.shared.dirty.mark_messages(&room_id);
        }
        stored
    }

    fn update_event_content(&self, room_id: &str, event_id: &str, content: Value) -> bool {
        let updated = self.memory().update_event_content(room_id, event_id, content);
        if updated {
            self.shared.dirty.mark_messages(room_id);
        }
        updated
    }

    fn delete_event(&self, event: &Event) -> bool {
        let deleted = self.memory().delete_event(event);
        if deleted {
            self.shared.dirty.mark_messages(&event.room_id);
        }
        deleted
    }

    fn room_messages(&self, room_id: &str) -> Option<Vec<Event>> {
        self.memory().room_messages(room_id)
    }

    fn oldest_event(&self, room_id: &str) -> Option<Event> {
        self.memory().oldest_event(room_id)
    }

    fn latest_event(&self, room_id: &str) -> Option<Event> {
        self.memory().latest_event(room_id)
    }

    fn earlier_messages(
        &self,
        room_id: &str,
        from_token: Option<&str>,
        limit: usize,
    ) -> PageResult {
        self.memory().earlier_messages(room_id, from_token, limit)
    }

    fn store_summary(
        &self,
        matrix_id: &str,
        room_id: &str,
        event: &Event,
        room_state: &RoomState,
        self_user_id: &str,
    ) -> bool {
        let stored = self
            .memory()
            .store_summary(matrix_id, room_id, event, room_state, self_user_id);
        if stored {
            self.shared.dirty.mark_summary(room_id);
        }
        stored
    }

    fn flush_summary(&self, summary: &RoomSummary) {
        self.memory().flush_summary(summary);
        self.shared.dirty.mark_summary(&summary.room_id);
        self.save_summaries_now();
    }

    fn flush_summaries(&self) {
        self.memory().flush_summaries();
        for room_id in self.memory().summary_room_ids() {
            self.shared.dirty.mark_summary(&room_id);
        }
        self.save_summaries_now();
    }

    fn summary(&self, room_id: &str) -> Option<RoomSummary> {
        self.memory().summary(room_id)
    }

    fn summaries(&self) -> Vec<RoomSummary> {
        self.memory().summaries()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
