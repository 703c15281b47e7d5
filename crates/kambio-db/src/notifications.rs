use anyhow::Result;

use crate::models::NotificationRow;
use crate::Database;

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, content, read, created_at";

impl Database {
    pub fn insert_notification(&self, notification: &NotificationRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, kind, content, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    notification.id,
                    notification.user_id,
                    notification.kind,
                    notification.content,
                    notification.read,
                    notification.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn notifications_for_user(&self, user_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 ORDER BY created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Scoped to the owner so one user cannot mark another's notification.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_notification(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id],
            )?;
            Ok(n > 0)
        })
    }
}

fn map_notification(row: &rusqlite::Row) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        content: row.get(3)?,
        read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::now_str;

    pub(crate) fn test_notification(id: &str, user_id: &str, kind: &str) -> NotificationRow {
        NotificationRow {
            id: id.to_string(),
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            content: format!("notification {id}"),
            read: false,
            created_at: now_str(),
        }
    }

    #[test]
    fn read_and_delete_are_owner_scoped() {
        let db = Database::open_in_memory().unwrap();
        db.insert_notification(&test_notification("n1", "u1", "message")).unwrap();

        assert!(!db.mark_notification_read("n1", "u2").unwrap());
        assert!(db.mark_notification_read("n1", "u1").unwrap());
        assert!(db.notifications_for_user("u1").unwrap()[0].read);

        assert!(!db.delete_notification("n1", "u2").unwrap());
        assert!(db.delete_notification("n1", "u1").unwrap());
        assert!(db.notifications_for_user("u1").unwrap().is_empty());
    }
}
