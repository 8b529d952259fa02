// ABOUTME: File-backed persistence for roomstore: the durable tier over the in-memory store.
// ABOUTME: Handles layout, artifact encodings, metadata checks, dirty tracking, background commits and recovery.

pub mod codec;
pub mod config;
pub mod dirty;
pub mod file_store;
pub mod layout;
pub mod load;
pub mod metadata;
pub mod persist;
mod shared;
pub mod truncate;
mod worker;

pub use config::{ConfigError, FORMAT_VERSION, StoreConfig};
pub use dirty::DirtyBatch;
pub use file_store::{FileStore, FileStoreError};
pub use layout::{ArtifactKind, Layout};
pub use load::{LoadError, LoadPhase};
pub use shared::Lifecycle;
