// ABOUTME: Defines RoomState, the current membership and configuration snapshot of a room.
// ABOUTME: The apply() method folds state events into the snapshot, one event type at a time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

/// Membership of a user in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

impl Membership {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "join" => Some(Self::Join),
            "invite" => Some(Self::Invite),
            "leave" => Some(Self::Leave),
            "ban" => Some(Self::Ban),
            "knock" => Some(Self::Knock),
            _ => None,
        }
    }
}

/// A member entry as derived from the latest `m.room.member` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMember {
    pub user_id: String,
    pub membership: Membership,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl RoomMember {
    /// The name to show for this member: display name if set, otherwise the user id.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }
}

/// Current state snapshot of a room. Replaced wholesale on load, updated in
/// place by [`RoomState::apply`] as live state events arrive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub members: BTreeMap<String, RoomMember>,
    pub power_levels: Option<Value>,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub canonical_alias: Option<String>,
    pub aliases: Vec<String>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a state event to this snapshot. Non-state events and unknown
    /// state event types are ignored. Returns whether anything changed.
    pub fn apply(&mut self, event: &Event) -> bool {
        let Some(state_key) = event.state_key.as_deref() else {
            return false;
        };

        match event.event_type.as_str() {
            "m.room.member" => {
                let Some(membership) = event
                    .content
                    .get("membership")
                    .and_then(Value::as_str)
                    .and_then(Membership::parse)
                else {
                    tracing::debug!("ignoring member event {} without membership", event.event_id);
                    return false;
                };
                let member = RoomMember {
                    user_id: state_key.to_string(),
                    membership,
                    display_name: string_field(&event.content, "displayname"),
                    avatar_url: string_field(&event.content, "avatar_url"),
                };
                self.members.insert(state_key.to_string(), member);
                true
            }

            "m.room.name" => {
                self.name = string_field(&event.content, "name").filter(|n| !n.is_empty());
                true
            }

            "m.room.topic" => {
                self.topic = string_field(&event.content, "topic");
                true
            }

            "m.room.canonical_alias" => {
                self.canonical_alias = string_field(&event.content, "alias");
                true
            }

            "m.room.aliases" => {
                self.aliases = event
                    .content
                    .get("aliases")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|a| a.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                true
            }

            "m.room.power_levels" => {
                self.power_levels = Some(event.content.clone());
                true
            }

            _ => false,
        }
    }

    /// Look up a member by user id.
    pub fn member(&self, user_id: &str) -> Option<&RoomMember> {
        self.members.get(user_id)
    }

    /// Members currently joined to the room, in user id order.
    pub fn joined_members(&self) -> impl Iterator<Item = &RoomMember> {
        self.members
            .values()
            .filter(|m| m.membership == Membership::Join)
    }
}

fn string_field(content: &Value, key: &str) -> Option<String> {
    content.get(key).and_then(Value::as_str).map(str::to_string)
}
