//! Notification repository over the `notifications` table.
//!
//! Every read and write takes the owner and "now" explicitly. A row is
//! visible when `status = 'active'` and it has no expiry or expires after
//! now; invisible rows are never returned, counted, or mutated.

use chrono::{DateTime, SecondsFormat, Utc};
use hub_core::{
    NotificationId, NotificationKind, NotificationQuery, NotificationRecord, NotificationStatus,
    UserId,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::{Result, StoreError};

const COLUMNS: &str = "id, user_id, title, message, kind, priority, is_read, read_at, status, \
                       expires_at, created_at";

const VISIBLE: &str = "status = 'active' AND (expires_at IS NULL OR expires_at > :now)";

/// Format a timestamp the way it is stored.
pub(crate) fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow(format!("bad timestamp {raw:?}: {e}")))
}

/// Raw column values of one `notifications` row.
struct NotificationRow {
    id: String,
    user_id: String,
    title: String,
    message: String,
    kind: String,
    priority: i32,
    is_read: bool,
    read_at: Option<String>,
    status: String,
    expires_at: Option<String>,
    created_at: String,
}

impl NotificationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            message: row.get(3)?,
            kind: row.get(4)?,
            priority: row.get(5)?,
            is_read: row.get(6)?,
            read_at: row.get(7)?,
            status: row.get(8)?,
            expires_at: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<NotificationRecord> {
        Ok(NotificationRecord {
            id: NotificationId::from_string(self.id),
            user_id: UserId::from_string(self.user_id),
            title: self.title,
            message: self.message,
            kind: NotificationKind::parse(&self.kind),
            priority: self.priority,
            is_read: self.is_read,
            read_at: self.read_at.as_deref().map(from_db_time).transpose()?,
            status: NotificationStatus::parse(&self.status),
            expires_at: self.expires_at.as_deref().map(from_db_time).transpose()?,
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

/// Notification repository; stateless, every method takes `&Connection`.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Insert a fully formed record.
    pub fn insert(conn: &Connection, record: &NotificationRecord) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO notifications (id, user_id, title, message, kind, priority, is_read,
                 read_at, status, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.as_str(),
                record.user_id.as_str(),
                record.title,
                record.message,
                record.kind.as_str(),
                record.priority,
                record.is_read,
                record.read_at.map(to_db_time),
                record.status.as_str(),
                record.expires_at.map(to_db_time),
                to_db_time(record.created_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch a record by id regardless of owner or visibility.
    pub fn get(conn: &Connection, id: &NotificationId) -> Result<Option<NotificationRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM notifications WHERE id = ?1");
        conn.query_row(&sql, params![id.as_str()], NotificationRow::from_row)
            .optional()?
            .map(NotificationRow::into_record)
            .transpose()
    }

    /// Mark one visible record owned by `user` read. Returns whether it matched.
    ///
    /// An already-read record still matches; its `read_at` is kept.
    pub fn mark_read(
        conn: &Connection,
        id: &NotificationId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, :now)
             WHERE id = :id AND user_id = :user AND {VISIBLE}"
        );
        let changed = conn.execute(
            &sql,
            rusqlite::named_params! {
                ":now": to_db_time(now),
                ":id": id.as_str(),
                ":user": user.as_str(),
            },
        )?;
        Ok(changed > 0)
    }

    /// Mark every visible unread record owned by `user` read. Returns the count.
    pub fn mark_all_read(conn: &Connection, user: &UserId, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "UPDATE notifications SET is_read = 1, read_at = :now
             WHERE user_id = :user AND is_read = 0 AND {VISIBLE}"
        );
        let changed = conn.execute(
            &sql,
            rusqlite::named_params! { ":now": to_db_time(now), ":user": user.as_str() },
        )?;
        Ok(changed as u64)
    }

    /// One page of `user`'s visible records, priority descending then newest first.
    pub fn list(
        conn: &Connection,
        user: &UserId,
        query: NotificationQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>> {
        let unread_clause = if query.unread_only { "AND is_read = 0" } else { "" };
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications
             WHERE user_id = :user AND {VISIBLE} {unread_clause}
             ORDER BY priority DESC, created_at DESC, id DESC
             LIMIT :limit OFFSET :offset"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::named_params! {
                ":user": user.as_str(),
                ":now": to_db_time(now),
                ":limit": query.limit,
                ":offset": query.offset,
            },
            NotificationRow::from_row,
        )?;
        rows.map(|row| row.map_err(StoreError::from).and_then(NotificationRow::into_record))
            .collect()
    }

    /// Number of `user`'s visible unread records.
    pub fn count_unread(conn: &Connection, user: &UserId, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM notifications WHERE user_id = :user AND is_read = 0 AND {VISIBLE}"
        );
        let count: i64 = conn.query_row(
            &sql,
            rusqlite::named_params! { ":user": user.as_str(), ":now": to_db_time(now) },
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Move a record owned by `user` to `archived`. Returns whether it matched.
    pub fn archive(conn: &Connection, id: &NotificationId, user: &UserId) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE notifications SET status = 'archived' WHERE id = ?1 AND user_id = ?2",
            params![id.as_str(), user.as_str()],
        )?;
        Ok(changed > 0)
    }
}
