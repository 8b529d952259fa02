// ABOUTME: State shared between a FileStore handle and its background worker thread.
// ABOUTME: Owns the memory tier, dirty tracker, lifecycle flag and listener, plus the rebuild-from-scratch path.

use std::sync::Arc;

use parking_lot::Mutex;
use roomstore_core::{Credentials, MemoryStore, Metadata, StoreListener};

use crate::config::StoreConfig;
use crate::dirty::DirtyTracker;
use crate::layout::{Layout, LayoutError};
use crate::metadata::{load_metadata, save_metadata};

/// Where a store is in its open/close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Built but not opened yet (or cleared).
    Closed,
    /// The worker is loading persisted data.
    Opening,
    Ready,
    /// Closed for good; no further work is accepted.
    Shutdown,
}

pub(crate) struct Shared {
    pub config: StoreConfig,
    pub credentials: Credentials,
    pub layout: Layout,
    pub memory: MemoryStore,
    pub dirty: DirtyTracker,
    lifecycle: Mutex<Lifecycle>,
    listener: Mutex<Option<Arc<dyn StoreListener>>>,
    new_storage: Mutex<bool>,
}

impl Shared {
    pub fn new(config: StoreConfig, credentials: Credentials) -> Self {
        let layout = Layout::new(&config.home, &credentials.user_id);
        Self {
            config,
            credentials,
            layout,
            memory: MemoryStore::new(),
            dirty: DirtyTracker::new(),
            lifecycle: Mutex::new(Lifecycle::Closed),
            listener: Mutex::new(None),
            new_storage: Mutex::new(false),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.credentials.user_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        *self.lifecycle.lock() = lifecycle;
    }

    /// Move from `from` to `to` only if the store is currently in `from`.
    pub fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        let mut current = self.lifecycle.lock();
        if *current != from {
            return false;
        }
        *current = to;
        true
    }

    pub fn is_new_storage(&self) -> bool {
        *self.new_storage.lock()
    }

    pub fn set_listener(&self, listener: Arc<dyn StoreListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Tell the listener how the open went. Called without any store lock held.
    pub fn notify_opened(&self, corrupted: bool) {
        let listener = self.listener.lock().clone();
        let Some(listener) = listener else {
            return;
        };
        if corrupted && !self.is_new_storage() {
            tracing::error!("store for {} was corrupted and has been rebuilt", self.account_id());
            listener.on_store_corrupted(self.account_id());
        } else {
            tracing::info!("store for {} is ready", self.account_id());
            listener.on_store_ready(self.account_id());
        }
    }

    /// Adopt the persisted metadata if it belongs to these credentials at the
    /// configured format version. Anything else (missing, unreadable, another
    /// account, another version, a rotated access token) wipes the account
    /// directory and starts a new store.
    pub fn adopt_or_reset_metadata(&self) -> Result<(), LayoutError> {
        let trusted = match load_metadata(&self.layout) {
            Ok(Some(metadata)) => {
                match metadata.verify(&self.credentials, self.config.format_version) {
                    Ok(()) => Some(metadata),
                    Err(mismatch) => {
                        tracing::warn!(
                            "discarding store of {}: {}",
                            self.account_id(),
                            mismatch
                        );
                        None
                    }
                }
            }
            Ok(None) => {
                tracing::info!("no metadata for {}, creating a new store", self.account_id());
                None
            }
            Err(e) => {
                tracing::warn!("unreadable metadata for {}: {}", self.account_id(), e);
                None
            }
        };

        match trusted {
            Some(metadata) => {
                self.memory.replace_metadata(metadata);
                *self.new_storage.lock() = false;
                self.layout.create_dir_tree()
            }
            None => {
                self.rebuild()?;
                *self.new_storage.lock() = true;
                Ok(())
            }
        }
    }

    /// Wipe everything on disk and in memory and start over with fresh
    /// metadata for the current credentials. Safe to repeat.
    pub fn rebuild(&self) -> Result<(), LayoutError> {
        self.layout.wipe()?;
        self.layout.create_dir_tree()?;
        self.reset_memory();
        self.save_metadata_now();
        Ok(())
    }

    /// Empty the memory tier and dirty sets and install fresh metadata.
    pub fn reset_memory(&self) {
        self.memory.reset();
        self.dirty.clear();
        self.memory.replace_metadata(Metadata::new(
            &self.credentials,
            self.config.format_version,
        ));
    }

    pub fn save_metadata_now(&self) {
        if let Err(e) = save_metadata(&self.layout, &self.memory.metadata()) {
            tracing::error!("failed to save metadata for {}: {}", self.account_id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ArtifactKind;
    use std::fs;
    use tempfile::TempDir;

    fn shared(dir: &TempDir, token: &str) -> Shared {
        Shared::new(
            StoreConfig::with_home(dir.path()),
            Credentials::new("@alice:hs", token),
        )
    }

    #[test]
    fn missing_metadata_starts_new_storage() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, "secret");
        shared.adopt_or_reset_metadata().unwrap();

        assert!(shared.is_new_storage());
        let on_disk = load_metadata(&shared.layout).unwrap().unwrap();
        assert_eq!(on_disk.user_id, "@alice:hs");
        assert_eq!(on_disk.version, shared.config.format_version);
    }

    #[test]
    fn matching_metadata_is_adopted() {
        let dir = TempDir::new().unwrap();
        let first = shared(&dir, "secret");
        first.adopt_or_reset_metadata().unwrap();
        first.memory.update_metadata(|m| {
            m.event_stream_token = Some("s42".to_string());
            true
        });
        first.save_metadata_now();

        let second = shared(&dir, "secret");
        second.adopt_or_reset_metadata().unwrap();

        assert!(!second.is_new_storage());
        assert_eq!(second.memory.metadata().event_stream_token.as_deref(), Some("s42"));
    }

    #[test]
    fn rotated_access_token_wipes_the_store() {
        let dir = TempDir::new().unwrap();
        let first = shared(&dir, "old");
        first.adopt_or_reset_metadata().unwrap();
        let stray = first.layout.artifact(ArtifactKind::Tokens, "!r:hs");
        fs::write(&stray, b"\"t\"").unwrap();

        let second = shared(&dir, "new");
        second.adopt_or_reset_metadata().unwrap();

        assert!(second.is_new_storage());
        assert!(!stray.exists());
        assert_eq!(load_metadata(&second.layout).unwrap().unwrap().access_token, "new");
    }

    #[test]
    fn transition_only_from_expected_state() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, "secret");
        assert!(shared.transition(Lifecycle::Closed, Lifecycle::Opening));
        assert!(!shared.transition(Lifecycle::Closed, Lifecycle::Opening));
        assert_eq!(shared.lifecycle(), Lifecycle::Opening);
    }
}
