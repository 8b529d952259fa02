// ABOUTME: Background worker thread that performs every disk operation of a FileStore in submission order.
// ABOUTME: Fed by an unbounded channel; shutting down closes the channel, lets queued tasks finish, and joins.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use roomstore_core::Metadata;
use tokio::sync::mpsc;

use crate::load::load_all;
use crate::metadata::save_metadata;
use crate::persist;
use crate::shared::{Lifecycle, Shared};

/// A unit of background work.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Task {
    /// Load the persisted store into memory.
    Open,
    SaveMessages(Vec<String>),
    SaveStates(Vec<String>),
    /// Write this snapshot of the metadata record.
    SaveMetadata(Metadata),
    SaveSummaries(Vec<String>),
    DeleteRoomFiles(String),
}

/// Handle to the worker thread.
pub(crate) struct Worker {
    tx: mpsc::UnboundedSender<Task>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn(shared: Arc<Shared>) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let name = format!("roomstore-{}", shared.account_id());

        let handle = thread::Builder::new().name(name).spawn(move || {
            tracing::debug!("worker started for {}", shared.account_id());
            while let Some(task) = rx.blocking_recv() {
                run_task(&shared, task);
            }
            tracing::debug!("worker stopped for {}", shared.account_id());
        })?;

        Ok(Self { tx, handle })
    }

    /// Queue a task. Returns false if the worker has already stopped.
    pub fn submit(&self, task: Task) -> bool {
        self.tx.send(task).is_ok()
    }

    /// Close the queue and wait for already-queued tasks to finish. When
    /// called from the worker thread itself (a listener closing the store
    /// from inside a callback) the thread is left to wind down on its own.
    pub fn shutdown(self) {
        let Worker { tx, handle } = self;
        drop(tx);

        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }
}

fn run_task(shared: &Shared, task: Task) {
    match task {
        Task::Open => open(shared),
        Task::SaveMessages(rooms) => {
            let started = Instant::now();
            let mut written = 0;
            for room in &rooms {
                match persist::save_room_messages(&shared.layout, &shared.memory, &shared.config, room) {
                    Ok(count) => written += count,
                    Err(e) => tracing::error!("failed to save messages of {}: {}", room, e),
                }
            }
            tracing::debug!(
                "saved {} events in {} rooms in {} ms",
                written,
                rooms.len(),
                started.elapsed().as_millis()
            );
        }
        Task::SaveStates(rooms) => {
            let started = Instant::now();
            for room in &rooms {
                if let Err(e) = persist::save_room_state(&shared.layout, &shared.memory, room) {
                    tracing::error!("failed to save state of {}: {}", room, e);
                }
            }
            tracing::debug!(
                "saved state of {} rooms in {} ms",
                rooms.len(),
                started.elapsed().as_millis()
            );
        }
        Task::SaveMetadata(metadata) => {
            if let Err(e) = save_metadata(&shared.layout, &metadata) {
                tracing::error!("failed to save metadata for {}: {}", shared.account_id(), e);
            }
        }
        Task::SaveSummaries(rooms) => {
            for room in &rooms {
                if let Err(e) = persist::save_summary(&shared.layout, &shared.memory, room) {
                    tracing::error!("failed to save summary of {}: {}", room, e);
                }
            }
            tracing::debug!("saved {} summaries", rooms.len());
        }
        Task::DeleteRoomFiles(room) => {
            if let Err(e) = persist::delete_room_files(&shared.layout, &room) {
                tracing::error!("failed to delete files of {}: {}", room, e);
            }
        }
    }
}

/// Load the store; on any failure, throw everything away and start empty.
fn open(shared: &Shared) {
    let started = Instant::now();
    tracing::info!("opening store for {}", shared.account_id());

    let corrupted = match load_all(shared) {
        Ok(()) => false,
        Err(e) => {
            tracing::error!("failed to load store for {}: {}", shared.account_id(), e);
            if let Err(e) = shared.rebuild() {
                tracing::error!("failed to rebuild store for {}: {}", shared.account_id(), e);
            }
            true
        }
    };

    if !shared.transition(Lifecycle::Opening, Lifecycle::Ready) {
        tracing::debug!("store for {} closed while opening", shared.account_id());
        return;
    }
    tracing::info!(
        "store for {} opened in {} ms",
        shared.account_id(),
        started.elapsed().as_millis()
    );
    shared.notify_opened(corrupted);
}
