// ABOUTME: The open sequence: messages, then tokens, then state, then summaries, each phase over every room.
// ABOUTME: A phase loads all rooms it can, collects failures, and aborts the sequence if any room failed.

use std::collections::BTreeSet;
use std::fmt;

use roomstore_core::EventStore;
use thiserror::Error;

use crate::layout::{ArtifactKind, LayoutError};
use crate::persist::{self, PersistError};
use crate::shared::Shared;

/// Steps of the open sequence, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Messages,
    Tokens,
    State,
    Summaries,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadPhase::Messages => "messages",
            LoadPhase::Tokens => "tokens",
            LoadPhase::State => "state",
            LoadPhase::Summaries => "summaries",
        };
        f.write_str(name)
    }
}

/// Why the persisted store could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to list {phase} artifacts: {source}")]
    Listing {
        phase: LoadPhase,
        #[source]
        source: LayoutError,
    },

    #[error("{phase} load failed for {} room(s)", .failures.len())]
    Rooms {
        phase: LoadPhase,
        failures: Vec<(String, PersistError)>,
    },
}

/// Load everything persisted for the account into the memory tier.
pub(crate) fn load_all(shared: &Shared) -> Result<(), LoadError> {
    let layout = &shared.layout;
    let memory = &shared.memory;

    let rooms = rooms_with(
        shared,
        LoadPhase::Messages,
        &[ArtifactKind::Messages, ArtifactKind::LegacyMessages],
    )?;
    run_phase(LoadPhase::Messages, &rooms, |room| {
        persist::load_room_messages(layout, memory, room).map(|_| ())
    })?;

    let rooms = rooms_with(shared, LoadPhase::Tokens, &[ArtifactKind::Tokens])?;
    run_phase(LoadPhase::Tokens, &rooms, |room| {
        persist::load_room_token(layout, memory, room)
    })?;
    for room in memory.room_ids() {
        if memory.room_token(&room).is_none() {
            persist::settle_room_token(memory, &room);
        }
    }

    let rooms = rooms_with(
        shared,
        LoadPhase::State,
        &[ArtifactKind::State, ArtifactKind::LegacyState],
    )?;
    run_phase(LoadPhase::State, &rooms, |room| {
        persist::load_room_state(layout, memory, room)
    })?;

    let rooms = rooms_with(shared, LoadPhase::Summaries, &[ArtifactKind::Summaries])?;
    run_phase(LoadPhase::Summaries, &rooms, |room| {
        persist::load_summary(layout, memory, room)
    })?;

    tracing::info!(
        "loaded {} rooms and {} summaries for {}",
        memory.room_ids().len(),
        memory.summaries().len(),
        shared.account_id()
    );
    Ok(())
}

fn rooms_with(
    shared: &Shared,
    phase: LoadPhase,
    kinds: &[ArtifactKind],
) -> Result<Vec<String>, LoadError> {
    let mut rooms = BTreeSet::new();
    for kind in kinds {
        let listed = shared
            .layout
            .list_rooms(*kind)
            .map_err(|source| LoadError::Listing { phase, source })?;
        rooms.extend(listed);
    }
    Ok(rooms.into_iter().collect())
}

fn run_phase<F>(phase: LoadPhase, rooms: &[String], mut load: F) -> Result<(), LoadError>
where
    F: FnMut(&str) -> Result<(), PersistError>,
{
    let started = std::time::Instant::now();
    let mut failures = Vec::new();

    for room in rooms {
        if let Err(e) = load(room) {
            tracing::warn!("failed to load {} of {}: {}", phase, room, e);
            failures.push((room.clone(), e));
        }
    }

    if !failures.is_empty() {
        return Err(LoadError::Rooms { phase, failures });
    }

    tracing::debug!(
        "loaded {} for {} rooms in {} ms",
        phase,
        rooms.len(),
        started.elapsed().as_millis()
    );
    Ok(())
}
