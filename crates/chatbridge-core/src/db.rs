//! SQLite persistence for chat messages.

use crate::Result;
use chatbridge_types::{ChatEvent, RoomId, StoredMessage};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Page size used when a caller gives no limit for room or sender queries.
pub const DEFAULT_LIMIT: usize = 10;

/// SQLite-based message store.
pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                sender TEXT NOT NULL,
                body TEXT NOT NULL,
                target TEXT,
                private INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL,
                room_id TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room_id);
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender);
            "#,
        )?;
        Ok(())
    }

    /// Persist a message event. Other event kinds are not stored and return
    /// `None`.
    pub fn save_message(&self, event: &ChatEvent) -> Result<Option<i64>> {
        let ChatEvent::Message {
            sender,
            body,
            target,
            is_private,
            room_id,
            timestamp,
        } = event
        else {
            return Ok(None);
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO messages (sender, body, target, private, timestamp, room_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                sender,
                body,
                target,
                is_private,
                timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                room_id.as_str(),
            ],
        )?;
        let rowid = conn.last_insert_rowid();
        debug!(target: "chatbridge::store", "Stored message {} from {} in room {}", rowid, sender, room_id);
        Ok(Some(rowid))
    }

    /// Get a message by rowid.
    pub fn get(&self, rowid: i64) -> Result<Option<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let message = conn
            .query_row(
                "SELECT rowid, * FROM messages WHERE rowid = ?1",
                params![rowid],
                Self::row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Delete a message. Returns whether a row was removed.
    pub fn delete(&self, rowid: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM messages WHERE rowid = ?1", params![rowid])?;
        Ok(removed > 0)
    }

    /// All messages, newest first, optionally capped.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT rowid, * FROM messages ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![sql_limit(limit)], Self::row_to_message)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Most recent messages in a room.
    pub fn list_by_room(&self, room: &RoomId, limit: Option<usize>) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT rowid, * FROM messages WHERE room_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![room.as_str(), sql_limit(Some(limit.unwrap_or(DEFAULT_LIMIT)))],
            Self::row_to_message,
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Most recent messages by one sender.
    pub fn list_by_sender(&self, sender: &str, limit: Option<usize>) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT rowid, * FROM messages WHERE sender = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![sender, sql_limit(Some(limit.unwrap_or(DEFAULT_LIMIT)))],
            Self::row_to_message,
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<StoredMessage> {
        let timestamp: String = row.get("timestamp")?;
        let room_id: String = row.get("room_id")?;

        Ok(StoredMessage {
            rowid: row.get("rowid")?,
            sender: row.get("sender")?,
            body: row.get("body")?,
            target: row.get("target")?,
            is_private: row.get("private")?,
            room_id: RoomId::new(room_id),
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }
}

/// SQLite reads a negative LIMIT as "no limit".
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn message(sender: &str, body: &str, room: &str, minutes_ago: i64) -> ChatEvent {
        ChatEvent::Message {
            sender: sender.to_string(),
            body: body.to_string(),
            target: None,
            is_private: false,
            room_id: RoomId::from(room),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_save_and_get() {
        let store = MessageStore::open_in_memory().unwrap();
        let event = ChatEvent::Message {
            sender: "alice".to_string(),
            body: "psst".to_string(),
            target: Some("bob".to_string()),
            is_private: true,
            room_id: RoomId::from("101"),
            timestamp: Utc::now(),
        };

        let rowid = store.save_message(&event).unwrap().unwrap();
        let stored = store.get(rowid).unwrap().unwrap();
        assert_eq!(stored.rowid, rowid);
        assert_eq!(stored.sender, "alice");
        assert_eq!(stored.body, "psst");
        assert_eq!(stored.target.as_deref(), Some("bob"));
        assert!(stored.is_private);
        assert_eq!(stored.room_id.as_str(), "101");
    }

    #[test]
    fn test_non_message_events_are_not_stored() {
        let store = MessageStore::open_in_memory().unwrap();
        let event = ChatEvent::UserLeft {
            username: "bob".to_string(),
            room_id: RoomId::from("101"),
            timestamp: Utc::now(),
        };
        assert_eq!(store.save_message(&event).unwrap(), None);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete() {
        let store = MessageStore::open_in_memory().unwrap();
        let rowid = store.save_message(&message("bob", "hi", "101", 0)).unwrap().unwrap();

        assert!(store.delete(rowid).unwrap());
        assert!(!store.delete(rowid).unwrap());
        assert!(store.get(rowid).unwrap().is_none());
    }

    #[test]
    fn test_list_by_room_newest_first_with_default_limit() {
        let store = MessageStore::open_in_memory().unwrap();
        for i in 0..12 {
            store
                .save_message(&message("bob", &format!("m{}", i), "101", 12 - i))
                .unwrap();
        }
        store.save_message(&message("bob", "elsewhere", "202", 0)).unwrap();

        let recent = store.list_by_room(&RoomId::from("101"), None).unwrap();
        assert_eq!(recent.len(), DEFAULT_LIMIT);
        assert_eq!(recent[0].body, "m11");
        assert!(recent.iter().all(|m| m.room_id.as_str() == "101"));

        let two = store.list_by_room(&RoomId::from("101"), Some(2)).unwrap();
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn test_list_by_sender_and_all() {
        let store = MessageStore::open_in_memory().unwrap();
        store.save_message(&message("alice", "a1", "101", 3)).unwrap();
        store.save_message(&message("bob", "b1", "101", 2)).unwrap();
        store.save_message(&message("alice", "a2", "202", 1)).unwrap();

        let alice = store.list_by_sender("alice", None).unwrap();
        let bodies: Vec<_> = alice.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["a2", "a1"]);

        assert_eq!(store.list(None).unwrap().len(), 3);
        assert_eq!(store.list(Some(1)).unwrap()[0].body, "a2");
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("messages.db");
        {
            let store = MessageStore::open(&path).unwrap();
            store.save_message(&message("bob", "hi", "101", 0)).unwrap();
        }
        let reopened = MessageStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
