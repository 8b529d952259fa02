// ABOUTME: Per-room save and load of messages, tokens, state and summaries between memory and disk.
// ABOUTME: Saves truncate history on token boundaries; loads migrate legacy artifacts on first touch.

use std::path::Path;

use roomstore_core::{EventLog, EventStore, MemoryStore, RoomState, RoomSummary};
use thiserror::Error;

use crate::codec::{self, CodecError, Schema};
use crate::config::StoreConfig;
use crate::layout::{ArtifactKind, Layout, LayoutError};
use crate::truncate::retention_start;

/// Errors that can occur while moving one room artifact to or from disk.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Write a room's (possibly truncated) timeline and its pagination token.
/// Rooms without a timeline or token have their files removed instead.
/// Returns the number of events written.
pub fn save_room_messages(
    layout: &Layout,
    memory: &MemoryStore,
    config: &StoreConfig,
    room_id: &str,
) -> Result<usize, PersistError> {
    layout.remove_artifact(ArtifactKind::LegacyMessages, room_id)?;

    let (Some(log), Some(token)) = (memory.room_log(room_id), memory.room_token(room_id)) else {
        layout.remove_artifact(ArtifactKind::Messages, room_id)?;
        layout.remove_artifact(ArtifactKind::Tokens, room_id)?;
        return Ok(0);
    };

    let events: Vec<_> = log.into_values().collect();
    let start = retention_start(&events, config);
    if start > 0 {
        tracing::debug!(
            "reducing stored messages of {} from {} to {}",
            room_id,
            events.len(),
            events.len() - start
        );
    }

    let kept: EventLog = events
        .into_iter()
        .skip(start)
        .map(|e| (e.event_id.clone(), e))
        .collect();

    codec::write_atomic(
        &layout.artifact(ArtifactKind::Messages, room_id),
        &codec::encode(&kept)?,
    )?;
    codec::write_atomic(
        &layout.artifact(ArtifactKind::Tokens, room_id),
        &codec::encode_plain(&token)?,
    )?;

    Ok(kept.len())
}

/// Write a room's live state, or remove it when the room is gone.
pub fn save_room_state(
    layout: &Layout,
    memory: &MemoryStore,
    room_id: &str,
) -> Result<(), PersistError> {
    layout.remove_artifact(ArtifactKind::LegacyState, room_id)?;

    match memory.room(room_id) {
        Some(room) => {
            tracing::debug!(
                "saving state of {} with {} members",
                room_id,
                room.live_state.members.len()
            );
            codec::write_atomic(
                &layout.artifact(ArtifactKind::State, room_id),
                &codec::encode(&room.live_state)?,
            )?;
        }
        None => {
            layout.remove_artifact(ArtifactKind::State, room_id)?;
        }
    }
    Ok(())
}

/// Write a room's summary, or remove it when the room has none.
pub fn save_summary(
    layout: &Layout,
    memory: &MemoryStore,
    room_id: &str,
) -> Result<(), PersistError> {
    match memory.summary(room_id) {
        Some(summary) => codec::write_atomic(
            &layout.artifact(ArtifactKind::Summaries, room_id),
            &codec::encode_plain(&summary)?,
        )?,
        None => {
            layout.remove_artifact(ArtifactKind::Summaries, room_id)?;
        }
    }
    Ok(())
}

/// Remove every file belonging to a room.
pub fn delete_room_files(layout: &Layout, room_id: &str) -> Result<(), PersistError> {
    layout.remove_all_encodings(ArtifactKind::Messages, room_id)?;
    layout.remove_artifact(ArtifactKind::Tokens, room_id)?;
    layout.remove_all_encodings(ArtifactKind::State, room_id)?;
    layout.remove_artifact(ArtifactKind::Summaries, room_id)?;
    Ok(())
}

/// Load a room's timeline into memory, creating the room. Legacy artifacts
/// are rewritten in the current encoding and the legacy file removed.
/// Returns false when the room has no messages artifact at all.
pub fn load_room_messages(
    layout: &Layout,
    memory: &MemoryStore,
    room_id: &str,
) -> Result<bool, PersistError> {
    let Some((log, schema)) = read_current_or_legacy::<EventLog>(layout, ArtifactKind::Messages, room_id)?
    else {
        return Ok(false);
    };

    if schema.is_legacy() {
        migrate(layout, ArtifactKind::Messages, room_id, &log)?;
    }

    memory.restore_room_log(room_id, log);
    Ok(true)
}

/// Load a room's pagination token. A token on the oldest retained event
/// supersedes the stored one, since history may have been cut since the
/// token file was written. Token files for unknown rooms are removed.
pub fn load_room_token(
    layout: &Layout,
    memory: &MemoryStore,
    room_id: &str,
) -> Result<(), PersistError> {
    if !memory.has_room(room_id) {
        tracing::debug!("removing token of unknown room {}", room_id);
        layout.remove_artifact(ArtifactKind::Tokens, room_id)?;
        return Ok(());
    }

    let (stored, _): (Option<String>, Schema) =
        codec::read_artifact(&layout.artifact(ArtifactKind::Tokens, room_id))?;

    if let Some(stored) = stored {
        memory.set_room_token(room_id, stored);
    }
    settle_room_token(memory, room_id);
    Ok(())
}

/// Prefer the oldest event's token over whatever the room has. A room left
/// with no token at all is dropped, since its history cannot be paged.
/// Returns whether the room survived.
pub fn settle_room_token(memory: &MemoryStore, room_id: &str) -> bool {
    if let Some(token) = memory.oldest_event(room_id).and_then(|e| e.token) {
        memory.set_room_token(room_id, token);
        return true;
    }
    if memory.room_token(room_id).is_some() {
        return true;
    }
    tracing::warn!("room {} has no pagination token, dropping it", room_id);
    memory.delete_room(room_id);
    false
}

/// Load a room's live state. State artifacts for rooms that were not
/// created by the message pass are removed.
pub fn load_room_state(
    layout: &Layout,
    memory: &MemoryStore,
    room_id: &str,
) -> Result<(), PersistError> {
    if !memory.has_room(room_id) {
        tracing::debug!("removing state of unknown room {}", room_id);
        layout.remove_all_encodings(ArtifactKind::State, room_id)?;
        return Ok(());
    }

    let Some((state, schema)) =
        read_current_or_legacy::<RoomState>(layout, ArtifactKind::State, room_id)?
    else {
        return Ok(());
    };

    if schema.is_legacy() {
        migrate(layout, ArtifactKind::State, room_id, &state)?;
    }

    memory.restore_live_state(room_id, state);
    Ok(())
}

/// Load a room summary. Summaries do not require the room to exist: invited
/// rooms have a summary before they have a timeline.
pub fn load_summary(
    layout: &Layout,
    memory: &MemoryStore,
    room_id: &str,
) -> Result<(), PersistError> {
    let (summary, _): (RoomSummary, Schema) =
        codec::read_artifact(&layout.artifact(ArtifactKind::Summaries, room_id))?;
    memory.restore_summary(summary);
    Ok(())
}

/// Read the current-encoding artifact, or the legacy one when no current
/// artifact exists. A current artifact shadows and removes a stale legacy one.
fn read_current_or_legacy<T: serde::de::DeserializeOwned>(
    layout: &Layout,
    kind: ArtifactKind,
    room_id: &str,
) -> Result<Option<(T, Schema)>, PersistError> {
    let current = layout.artifact(kind, room_id);
    if exists(&current) {
        let decoded = codec::read_artifact(&current)?;
        if let Some(legacy) = kind.legacy() {
            layout.remove_artifact(legacy, room_id)?;
        }
        return Ok(Some(decoded));
    }

    let Some(legacy) = kind.legacy() else {
        return Ok(None);
    };
    let legacy_path = layout.artifact(legacy, room_id);
    if !exists(&legacy_path) {
        return Ok(None);
    }
    Ok(Some(codec::read_artifact(&legacy_path)?))
}

fn migrate<T: serde::Serialize>(
    layout: &Layout,
    kind: ArtifactKind,
    room_id: &str,
    value: &T,
) -> Result<(), PersistError> {
    codec::write_atomic(&layout.artifact(kind, room_id), &codec::encode(value)?)?;
    if let Some(legacy) = kind.legacy() {
        layout.remove_artifact(legacy, room_id)?;
    }
    tracing::info!("migrated {} of {} to the current encoding", kind.dir_name(), room_id);
    Ok(())
}

fn exists(path: &Path) -> bool {
    path.is_file()
}
