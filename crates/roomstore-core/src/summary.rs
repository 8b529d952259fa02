// ABOUTME: Defines RoomSummary, the denormalized room preview kept for list views.
// ABOUTME: A summary is rebuilt from the room's latest event and state whenever either changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::room::Room;
use crate::state::RoomState;

/// Preview of a room: latest event, the state it was seen with, and the
/// resolved name and topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Account the summary was computed for.
    pub matrix_id: String,
    pub room_id: String,
    pub latest_event: Event,
    pub latest_state: RoomState,
    pub name: String,
    pub topic: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RoomSummary {
    /// Build a summary for `room` around `latest_event`, resolving the name
    /// from `self_user_id`'s point of view.
    pub fn build(
        matrix_id: &str,
        room: &Room,
        latest_event: &Event,
        latest_state: &RoomState,
        self_user_id: &str,
    ) -> Self {
        Self {
            matrix_id: matrix_id.to_string(),
            room_id: room.room_id.clone(),
            latest_event: latest_event.clone(),
            latest_state: latest_state.clone(),
            name: room.display_name(self_user_id),
            topic: room.topic().map(str::to_string),
            updated_at: Utc::now(),
        }
    }
}
