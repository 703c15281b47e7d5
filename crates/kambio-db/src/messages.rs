use anyhow::Result;
use rusqlite::Connection;

use crate::models::MessageRow;
use crate::{Database, OptionalExt};

const MESSAGE_COLUMNS: &str =
    "id, listing_id, sender_id, sender_username, recipient_id, content, read, timestamp, deleted_by";

impl Database {
    pub fn insert_message(&self, message: &MessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, listing_id, sender_id, sender_username,
                     recipient_id, content, read, timestamp, deleted_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    message.id,
                    message.listing_id,
                    message.sender_id,
                    message.sender_username,
                    message.recipient_id,
                    message.content,
                    message.read,
                    message.timestamp,
                    serde_json::to_string(&message.deleted_by)?,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], map_message).optional()
        })
    }

    /// The two-way thread between `viewer` and `other` on one listing,
    /// oldest first. Messages the viewer soft-deleted stay hidden; they are
    /// still in the table for admin reads.
    pub fn thread(
        &self,
        listing_id: &str,
        viewer: &str,
        other: &str,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE listing_id = ?1
                   AND ((sender_id = ?2 AND recipient_id = ?3)
                     OR (sender_id = ?3 AND recipient_id = ?2))
                 ORDER BY timestamp ASC"
            );
            let rows = query_messages(conn, &sql, rusqlite::params![listing_id, viewer, other])?;
            Ok(rows.into_iter().filter(|m| !m.deleted_for(viewer)).collect())
        })
    }

    /// Mark everything `other` sent to `viewer` on this listing as read.
    pub fn mark_thread_read(&self, listing_id: &str, viewer: &str, other: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET read = 1
                 WHERE listing_id = ?1 AND sender_id = ?2 AND recipient_id = ?3 AND read = 0",
                rusqlite::params![listing_id, other, viewer],
            )?;
            Ok(())
        })
    }

    /// Per-viewer soft delete: append `viewer` to the message's exclusion
    /// list. Returns false when already hidden for them.
    pub fn soft_delete_message(&self, id: &str, viewer: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let raw: String = conn.query_row(
                "SELECT deleted_by FROM messages WHERE id = ?1",
                [id],
                |row| row.get(0),
            )?;
            let mut deleted_by: Vec<String> = serde_json::from_str(&raw)?;
            if deleted_by.iter().any(|u| u == viewer) {
                return Ok(false);
            }
            deleted_by.push(viewer.to_string());
            conn.execute(
                "UPDATE messages SET deleted_by = ?1 WHERE id = ?2",
                rusqlite::params![serde_json::to_string(&deleted_by)?, id],
            )?;
            Ok(true)
        })
    }

    /// Soft-delete an entire thread for one viewer. Returns how many messages
    /// were newly hidden.
    pub fn soft_delete_thread(
        &self,
        listing_id: &str,
        viewer: &str,
        other: &str,
    ) -> Result<usize> {
        let ids: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages
                 WHERE listing_id = ?1
                   AND ((sender_id = ?2 AND recipient_id = ?3)
                     OR (sender_id = ?3 AND recipient_id = ?2))",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![listing_id, viewer, other], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })?;

        let mut hidden = 0;
        for id in &ids {
            if self.soft_delete_message(id, viewer)? {
                hidden += 1;
            }
        }
        Ok(hidden)
    }

    /// Every message the user sent or received, newest last. Soft-delete
    /// filtering is the caller's concern (admin reads want everything).
    pub fn messages_involving(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE sender_id = ?1 OR recipient_id = ?1
                 ORDER BY timestamp ASC"
            );
            query_messages(conn, &sql, [user_id])
        })
    }

    pub fn unread_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn latest_unread(&self, user_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE recipient_id = ?1 AND read = 0
                 ORDER BY timestamp DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([user_id], map_message).optional()
        })
    }

    pub fn list_all_messages(&self) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY timestamp ASC");
            query_messages(conn, &sql, [])
        })
    }

    pub fn count_messages_sent(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE sender_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn query_messages<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    let deleted_by: String = row.get(8)?;
    Ok(MessageRow {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        recipient_id: row.get(4)?,
        content: row.get(5)?,
        read: row.get(6)?,
        timestamp: row.get(7)?,
        deleted_by: serde_json::from_str(&deleted_by).unwrap_or_default(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::now_str;

    pub(crate) fn test_message(id: &str, listing: &str, from: &str, to: &str) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            listing_id: listing.to_string(),
            sender_id: from.to_string(),
            sender_username: from.to_string(),
            recipient_id: to.to_string(),
            content: format!("msg {id}"),
            read: false,
            timestamp: now_str(),
            deleted_by: vec![],
        }
    }

    #[test]
    fn soft_delete_hides_from_viewer_only() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&test_message("m1", "l1", "u1", "u2")).unwrap();
        db.insert_message(&test_message("m2", "l1", "u2", "u1")).unwrap();

        assert!(db.soft_delete_message("m1", "u1").unwrap());
        assert!(!db.soft_delete_message("m1", "u1").unwrap());

        let for_u1 = db.thread("l1", "u1", "u2").unwrap();
        assert_eq!(for_u1.len(), 1);
        assert_eq!(for_u1[0].id, "m2");

        // Counterpart still sees everything, and so does the admin read.
        let for_u2 = db.thread("l1", "u2", "u1").unwrap();
        assert_eq!(for_u2.len(), 2);
        assert_eq!(db.list_all_messages().unwrap().len(), 2);
    }

    #[test]
    fn thread_soft_delete_hides_whole_conversation() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&test_message("m1", "l1", "u1", "u2")).unwrap();
        db.insert_message(&test_message("m2", "l1", "u2", "u1")).unwrap();
        db.insert_message(&test_message("m3", "l2", "u1", "u2")).unwrap();

        let hidden = db.soft_delete_thread("l1", "u1", "u2").unwrap();
        assert_eq!(hidden, 2);

        assert!(db.thread("l1", "u1", "u2").unwrap().is_empty());
        assert_eq!(db.thread("l2", "u1", "u2").unwrap().len(), 1);
    }

    #[test]
    fn unread_tracking() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&test_message("m1", "l1", "u2", "u1")).unwrap();
        db.insert_message(&test_message("m2", "l1", "u2", "u1")).unwrap();

        assert_eq!(db.unread_count("u1").unwrap(), 2);
        let latest = db.latest_unread("u1").unwrap().unwrap();
        assert_eq!(latest.listing_id, "l1");

        db.mark_thread_read("l1", "u1", "u2").unwrap();
        assert_eq!(db.unread_count("u1").unwrap(), 0);
        assert!(db.latest_unread("u1").unwrap().is_none());
    }
}
