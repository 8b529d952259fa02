// ABOUTME: Core library for roomstore, containing room, event, state, summary and user types.
// ABOUTME: Defines the EventStore contract and the in-memory tier every store builds on.

pub mod contract;
pub mod event;
pub mod memory;
pub mod metadata;
pub mod room;
pub mod state;
pub mod summary;
pub mod timeline;
pub mod user;

pub use contract::{EventStore, StoreListener};
pub use event::{Direction, Event, PageResult, SentState, TokenChunk};
pub use memory::MemoryStore;
pub use metadata::{Credentials, Metadata, MetadataMismatch};
pub use room::Room;
pub use state::{Membership, RoomMember, RoomState};
pub use summary::RoomSummary;
pub use timeline::EventLog;
pub use user::User;
