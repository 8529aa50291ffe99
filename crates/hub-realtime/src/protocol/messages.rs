//! Inbound and outbound message types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hub_core::{
    MAX_PAGE_LIMIT, NotificationEvent, NotificationId, NotificationQuery, NotificationRecord,
    PresenceStatus, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Why an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON, or no `type` field.
    #[error("invalid frame: {0}")]
    InvalidFrame(serde_json::Error),

    /// `type` is not one the server handles.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// `data` does not match the message type.
    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        /// Message type.
        kind: &'static str,
        /// Decode failure.
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Payload of `dashboard:refresh`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DashboardRefresh {
    widget_kind: String,
}

/// Payload of `notification:mark_read`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkRead {
    notification_id: NotificationId,
}

/// Payload of `notification:get`. Out-of-range values are clamped, not rejected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetNotifications {
    /// Page size; defaults to 20, clamped to `1..=100`.
    pub limit: Option<i64>,
    /// Records to skip; negative counts as 0.
    pub offset: Option<i64>,
    /// Only unread records.
    pub unread_only: Option<bool>,
}

impl GetNotifications {
    /// Normalized store query.
    pub fn to_query(self) -> NotificationQuery {
        NotificationQuery::new(
            self.limit.map(|l| l.clamp(1, i64::from(MAX_PAGE_LIMIT)) as u32),
            self.offset.map(|o| o.clamp(0, i64::from(u32::MAX)) as u32),
            self.unread_only,
        )
    }
}

/// A decoded client message.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// `activity`: heartbeat, no reply.
    Activity,
    /// `dashboard:refresh`: acknowledge a widget refresh.
    DashboardRefresh {
        /// Widget being refreshed.
        widget_kind: String,
    },
    /// `notification:send`: route an event to its audience.
    Send(NotificationEvent),
    /// `notification:mark_read`.
    MarkRead {
        /// Record to mark.
        notification_id: NotificationId,
    },
    /// `notification:mark_all_read`.
    MarkAllRead,
    /// `notification:get`.
    Get(GetNotifications),
}

impl ClientMessage {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: RawFrame = serde_json::from_str(text).map_err(ProtocolError::InvalidFrame)?;
        let payload = |kind: &'static str| {
            move |source| ProtocolError::InvalidPayload { kind, source }
        };
        let message = match frame.kind.as_str() {
            "activity" => Self::Activity,
            "dashboard:refresh" => {
                let data: DashboardRefresh =
                    serde_json::from_value(frame.data).map_err(payload("dashboard:refresh"))?;
                Self::DashboardRefresh {
                    widget_kind: data.widget_kind,
                }
            }
            "notification:send" => Self::Send(
                serde_json::from_value(frame.data).map_err(payload("notification:send"))?,
            ),
            "notification:mark_read" => {
                let data: MarkRead =
                    serde_json::from_value(frame.data).map_err(payload("notification:mark_read"))?;
                Self::MarkRead {
                    notification_id: data.notification_id,
                }
            }
            "notification:mark_all_read" => Self::MarkAllRead,
            "notification:get" => {
                let data = if frame.data.is_null() {
                    GetNotifications::default()
                } else {
                    serde_json::from_value(frame.data).map_err(payload("notification:get"))?
                };
                Self::Get(data)
            }
            _ => return Err(ProtocolError::UnknownType(frame.kind)),
        };
        Ok(message)
    }

    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::DashboardRefresh { .. } => "dashboard:refresh",
            Self::Send(_) => "notification:send",
            Self::MarkRead { .. } => "notification:mark_read",
            Self::MarkAllRead => "notification:mark_all_read",
            Self::Get(_) => "notification:get",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// A message pushed to a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// A routed notification.
    #[serde(rename = "notification:receive")]
    NotificationReceive(NotificationEvent),
    /// Current unread count for the recipient.
    #[serde(rename = "unread_notification_count")]
    UnreadCount {
        /// Visible unread records.
        count: u64,
    },
    /// Presence change of another user.
    #[serde(rename = "user:status")]
    UserStatus {
        /// Whose status changed.
        user_id: UserId,
        /// New status.
        status: PresenceStatus,
        /// Last observed activity.
        last_activity: Option<DateTime<Utc>>,
    },
    /// Reply to `notification:mark_read`.
    #[serde(rename = "notification:marked_read")]
    MarkedRead {
        /// Record that was marked.
        notification_id: NotificationId,
    },
    /// Reply to `notification:mark_all_read`.
    #[serde(rename = "notification:all_marked_read")]
    AllMarkedRead {
        /// How many records changed.
        count: u64,
    },
    /// Reply to `notification:get`.
    #[serde(rename = "notification:list")]
    List {
        /// One page of records.
        notifications: Vec<NotificationRecord>,
    },
    /// Reply to `dashboard:refresh`.
    #[serde(rename = "dashboard:refresh:response")]
    DashboardRefreshResponse {
        /// Echoed widget kind.
        widget_kind: String,
        /// Server time of the acknowledgement.
        timestamp: DateTime<Utc>,
    },
    /// A request failed; the session stays open.
    #[serde(rename = "notification:error")]
    Error {
        /// What went wrong.
        message: String,
        /// Which operation failed.
        operation: String,
    },
}

impl ServerMessage {
    /// Build a `notification:error`.
    pub fn error(operation: &str, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            operation: operation.to_owned(),
        }
    }

    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotificationReceive(_) => "notification:receive",
            Self::UnreadCount { .. } => "unread_notification_count",
            Self::UserStatus { .. } => "user:status",
            Self::MarkedRead { .. } => "notification:marked_read",
            Self::AllMarkedRead { .. } => "notification:all_marked_read",
            Self::List { .. } => "notification:list",
            Self::DashboardRefreshResponse { .. } => "dashboard:refresh:response",
            Self::Error { .. } => "notification:error",
        }
    }
}

#[derive(Serialize)]
struct Outbound<'a> {
    #[serde(flatten)]
    message: &'a ServerMessage,
    timestamp: DateTime<Utc>,
}

/// Serialize `message` with a send timestamp, ready to share across recipients.
pub fn encode(message: &ServerMessage, at: DateTime<Utc>) -> Result<Arc<String>, serde_json::Error> {
    serde_json::to_string(&Outbound { message, timestamp: at }).map(Arc::new)
}
