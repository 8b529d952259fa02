// ABOUTME: Defines the protocol event envelope, its send state, and the paginated chunk shapes.
// ABOUTME: Events are immutable facts about a room, except for content which edits may replace.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Prefix used for event ids minted locally before the server echoes them back.
pub const LOCAL_ECHO_PREFIX: &str = "local.";

/// Delivery state of an event. Server-originated events are always `Sent`;
/// locally composed ones move through the other states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentState {
    #[default]
    Sent,
    Sending,
    WaitingRetry,
    Undeliverable,
}

/// A single protocol event belonging to one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub room_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub sender: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub origin_server_ts: i64,
    /// Pagination token attached to this event, if the server handed one out
    /// at this position in the timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub sent_state: SentState,
}

impl Event {
    /// Create a server-side event with empty state key and no token.
    pub fn new(
        event_id: impl Into<String>,
        room_id: impl Into<String>,
        event_type: impl Into<String>,
        sender: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            room_id: room_id.into(),
            event_type: event_type.into(),
            sender: sender.into(),
            content,
            state_key: None,
            origin_server_ts: 0,
            token: None,
            sent_state: SentState::Sent,
        }
    }

    /// Create a locally composed event awaiting delivery. The id is a fresh
    /// ULID so it sorts by creation time and never collides with server ids.
    pub fn local_echo(
        room_id: impl Into<String>,
        event_type: impl Into<String>,
        sender: impl Into<String>,
        content: Value,
    ) -> Self {
        let mut event = Self::new(
            format!("{}{}", LOCAL_ECHO_PREFIX, Ulid::new()),
            room_id,
            event_type,
            sender,
            content,
        );
        event.origin_server_ts = chrono::Utc::now().timestamp_millis();
        event.sent_state = SentState::Sending;
        event
    }

    /// Builder-style setter for the pagination token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builder-style setter for the state key, turning this into a state event.
    pub fn with_state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = Some(state_key.into());
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn is_state_event(&self) -> bool {
        self.state_key.is_some()
    }

    pub fn is_local_echo(&self) -> bool {
        self.event_id.starts_with(LOCAL_ECHO_PREFIX)
    }
}

/// Which way a fetched chunk extends the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Newer events, delivered oldest first.
    Forwards,
    /// Older history, delivered newest first.
    Backwards,
}

/// A paginated slice of a room timeline together with its boundary tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenChunk {
    pub start: Option<String>,
    pub end: Option<String>,
    pub chunk: Vec<Event>,
}

impl TokenChunk {
    pub fn new(start: Option<String>, end: Option<String>, chunk: Vec<Event>) -> Self {
        Self { start, end, chunk }
    }
}

/// Outcome of a cache pagination request.
#[derive(Debug, Clone, PartialEq)]
pub enum PageResult {
    Page(TokenChunk),
    /// The requested token is not inside the cached window; the caller has
    /// to fetch from the network instead.
    UnknownToken,
}

impl PageResult {
    pub fn into_page(self) -> Option<TokenChunk> {
        match self {
            PageResult::Page(page) => Some(page),
            PageResult::UnknownToken => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PageResult::UnknownToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_json_uses_protocol_type_field() {
        let event = Event::new("$e1", "!room:hs", "m.room.message", "@a:hs", json!({"body": "hi"}));
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["type"], "m.room.message");
        assert!(json.get("token").is_none());
        assert!(json.get("state_key").is_none());
    }

    #[test]
    fn event_deserializes_with_missing_optional_fields() {
        let raw = r#"{"event_id":"$e1","room_id":"!r:hs","type":"m.room.message","sender":"@a:hs"}"#;
        let event: Event = serde_json::from_str(raw).expect("deserialize event");
        assert_eq!(event.content, Value::Null);
        assert_eq!(event.sent_state, SentState::Sent);
        assert!(!event.has_token());
    }

    #[test]
    fn local_echo_gets_unique_prefixed_ids() {
        let a = Event::local_echo("!r:hs", "m.room.message", "@me:hs", json!({}));
        let b = Event::local_echo("!r:hs", "m.room.message", "@me:hs", json!({}));
        assert!(a.is_local_echo());
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.sent_state, SentState::Sending);
    }

    #[test]
    fn page_result_unknown_has_no_page() {
        assert!(PageResult::UnknownToken.is_unknown());
        assert!(PageResult::UnknownToken.into_page().is_none());
        let page = PageResult::Page(TokenChunk::default());
        assert!(!page.is_unknown());
        assert!(page.into_page().is_some());
    }
}
