//! Dispatch event names and typed payloads.
//!
//! Lifecycle events have a closed, typed payload per name; application events
//! triggered through `sendToUser`/`sendToGroup` carry caller-supplied JSON
//! under a caller-chosen name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::change::ChangeEvent;
use crate::protocol::ServerFrame;

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
    pub const USER_CONNECTED: &'static str = "USER_CONNECTED";
    pub const USER_DISCONNECTED: &'static str = "USER_DISCONNECTED";
    pub const GROUP_JOINED: &'static str = "GROUP_JOINED";
    pub const GROUP_LEFT: &'static str = "GROUP_LEFT";
    pub const DATA_CHANGED: &'static str = "DATA_CHANGED";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConnected {
    pub principal: String,
    pub connection_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDisconnected {
    pub principal: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub principal: String,
    pub group: String,
    pub timestamp: DateTime<Utc>,
}

/// An event routed through the dispatcher.
#[derive(Debug, Clone)]
pub enum HubEvent {
    UserConnected(UserConnected),
    UserDisconnected(UserDisconnected),
    GroupJoined(GroupMembership),
    GroupLeft(GroupMembership),
    DataChanged(ChangeEvent),
    /// Application-defined event with an opaque payload.
    Custom { name: String, data: Value },
}

impl HubEvent {
    pub fn user_connected(principal: &str, connection_id: &str) -> Self {
        Self::UserConnected(UserConnected {
            principal: principal.to_string(),
            connection_id: connection_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn user_disconnected(principal: &str) -> Self {
        Self::UserDisconnected(UserDisconnected {
            principal: principal.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn group_joined(principal: &str, group: &str) -> Self {
        Self::GroupJoined(GroupMembership {
            principal: principal.to_string(),
            group: group.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn group_left(principal: &str, group: &str) -> Self {
        Self::GroupLeft(GroupMembership {
            principal: principal.to_string(),
            group: group.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn custom(name: &str, data: Value) -> Self {
        Self::Custom {
            name: name.to_string(),
            data,
        }
    }

    /// Wire name the event dispatches under.
    pub fn name(&self) -> &str {
        match self {
            Self::UserConnected(_) => EventName::USER_CONNECTED,
            Self::UserDisconnected(_) => EventName::USER_DISCONNECTED,
            Self::GroupJoined(_) => EventName::GROUP_JOINED,
            Self::GroupLeft(_) => EventName::GROUP_LEFT,
            Self::DataChanged(_) => EventName::DATA_CHANGED,
            Self::Custom { name, .. } => name,
        }
    }

    /// Serialized payload for the DISPATCH frame.
    pub fn payload(&self) -> Value {
        let result = match self {
            Self::UserConnected(p) => serde_json::to_value(p),
            Self::UserDisconnected(p) => serde_json::to_value(p),
            Self::GroupJoined(p) | Self::GroupLeft(p) => serde_json::to_value(p),
            Self::DataChanged(p) => serde_json::to_value(p),
            Self::Custom { data, .. } => return data.clone(),
        };
        result.unwrap_or(Value::Null)
    }

    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::dispatch(self.name(), self.payload())
    }
}
