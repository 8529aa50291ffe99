//! Domain types shared by the realtime core and its collaborators.
//!
//! Wire-facing structs serialize with camelCase field names to match the
//! browser client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NotificationId, UserId};

/// Default page size for notification listings.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Largest page a client may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Presentation fields carried alongside a session. Never used for authorization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayIdentity {
    /// Account email.
    pub email: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Name of the user's role (e.g. `Admin`).
    pub role_name: String,
}

/// An authenticated user as resolved by the identity collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable user id.
    pub user_id: UserId,
    /// Presentation fields.
    #[serde(flatten)]
    pub display: DisplayIdentity,
}

/// Credentials presented when a transport session opens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandshakePayload {
    /// Bearer token from the query string or `Authorization` header.
    pub token: Option<String>,
    /// Peer address, for logging only.
    pub remote_addr: Option<String>,
}

impl HandshakePayload {
    /// Payload carrying just a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            remote_addr: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Presence
// ─────────────────────────────────────────────────────────────────────────────

/// Derived reachability of a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Active within the online window.
    Online,
    /// Connected but idle past the online window.
    Away,
    /// Not connected, or idle past the away window.
    Offline,
}

impl PresenceStatus {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

/// Presence of one user at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    /// The user.
    pub user_id: UserId,
    /// Derived status.
    pub status: PresenceStatus,
    /// Last observed activity, if the user was ever registered.
    pub last_activity: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

/// Severity of a notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Informational.
    #[default]
    Info,
    /// Something completed successfully.
    Success,
    /// Needs attention.
    Warning,
    /// Something failed.
    Error,
}

impl NotificationKind {
    /// Lowercase wire and storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Parse a stored kind; unknown values fall back to `Info`.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "warning" => Self::Warning,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Lifecycle status of a stored notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Visible to its owner.
    #[default]
    Active,
    /// Hidden from every listing and count.
    Archived,
}

impl NotificationStatus {
    /// Lowercase storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    /// Parse a stored status; anything unrecognized is treated as archived.
    pub fn parse(s: &str) -> Self {
        if s == "active" {
            Self::Active
        } else {
            Self::Archived
        }
    }
}

/// Payload fanned out to sessions as `notification:receive`.
///
/// `id` and `timestamp` are filled in when a client omits them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Notification id.
    #[serde(default = "NotificationId::generate")]
    pub id: NotificationId,
    /// Short heading.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity.
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
    /// Single recipient; takes precedence over `target_role_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    /// Role cohort recipient when no user is targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_role_id: Option<String>,
    /// When the event was produced.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Where a notification event should be delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    /// One user.
    User(UserId),
    /// Every active member of a role.
    Role(String),
    /// Every connected session.
    Everyone,
}

impl NotificationEvent {
    /// Resolve the addressing mode from whichever target field is populated.
    pub fn audience(&self) -> Audience {
        match (&self.target_user_id, &self.target_role_id) {
            (Some(user), _) => Audience::User(user.clone()),
            (None, Some(role)) => Audience::Role(role.clone()),
            (None, None) => Audience::Everyone,
        }
    }
}

/// A notification as persisted by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Record id.
    pub id: NotificationId,
    /// Owner.
    pub user_id: UserId,
    /// Short heading.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Higher sorts first.
    pub priority: i32,
    /// Whether the owner has read it.
    pub is_read: bool,
    /// When it was marked read.
    pub read_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: NotificationStatus,
    /// After this instant the record is invisible.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Whether the record is visible at `now` (active and not expired).
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Active && self.expires_at.is_none_or(|exp| exp > now)
    }

    /// The event pushed to the owner's session for this record.
    pub fn to_event(&self) -> NotificationEvent {
        NotificationEvent {
            id: self.id.clone(),
            title: self.title.clone(),
            message: self.message.clone(),
            kind: self.kind,
            target_user_id: Some(self.user_id.clone()),
            target_role_id: None,
            timestamp: self.created_at,
        }
    }
}

/// Input for creating a stored notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    /// Owner.
    pub user_id: UserId,
    /// Short heading.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity.
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
    /// Higher sorts first.
    #[serde(default)]
    pub priority: i32,
    /// Optional expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Pagination and filter for a notification listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotificationQuery {
    /// Page size, within `1..=MAX_PAGE_LIMIT`.
    pub limit: u32,
    /// Records to skip.
    pub offset: u32,
    /// Only unread records.
    pub unread_only: bool,
}

impl NotificationQuery {
    /// Build a query from optional client values, applying defaults and the page clamp.
    pub fn new(limit: Option<u32>, offset: Option<u32>, unread_only: Option<bool>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
            unread_only: unread_only.unwrap_or(false),
        }
    }
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}
