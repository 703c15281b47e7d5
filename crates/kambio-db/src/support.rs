use anyhow::Result;
use chrono::{DateTime, Utc};
use kambio_types::models::SupportMessage;
use rusqlite::Connection;

use crate::models::ConversationRow;
use crate::{Database, OptionalExt, now_str};

const CONVERSATION_COLUMNS: &str = "id, user_id, user_name, user_email, messages, status, \
     unread_admin, unread_user, created_at, updated_at, last_activity, \
     is_typing_user, is_typing_admin";

impl Database {
    pub fn insert_conversation(&self, conversation: &ConversationRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO support_conversations (id, user_id, user_name, user_email,
                     messages, status, unread_admin, unread_user, created_at, updated_at,
                     last_activity, is_typing_user, is_typing_admin)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    conversation.id,
                    conversation.user_id,
                    conversation.user_name,
                    conversation.user_email,
                    serde_json::to_string(&conversation.messages)?,
                    conversation.status,
                    conversation.unread_admin,
                    conversation.unread_user,
                    conversation.created_at,
                    conversation.updated_at,
                    conversation.last_activity,
                    conversation.is_typing_user,
                    conversation.is_typing_admin,
                ],
            )?;
            Ok(())
        })
    }

    /// Each user has at most one support conversation.
    pub fn conversation_by_user(&self, user_id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM support_conversations WHERE user_id = ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([user_id], map_conversation).optional()
        })
    }

    /// A user message lands in the conversation, bumps the admin-side unread
    /// counter and reopens the conversation if the desk had closed it.
    pub fn append_user_message(
        &self,
        user_id: &str,
        message: &SupportMessage,
    ) -> Result<ConversationRow> {
        self.modify_conversation(user_id, |conversation| {
            conversation.messages.push(message.clone());
            conversation.unread_admin += 1;
            conversation.status = "open".to_string();
        })
    }

    pub fn append_admin_message(
        &self,
        user_id: &str,
        message: &SupportMessage,
    ) -> Result<ConversationRow> {
        self.modify_conversation(user_id, |conversation| {
            conversation.messages.push(message.clone());
            conversation.unread_user += 1;
        })
    }

    /// Welcome, reopen and follow-up notices. They count as unread for the
    /// user but do not count as activity for the idle timer.
    pub fn append_system_message(
        &self,
        user_id: &str,
        message: &SupportMessage,
    ) -> Result<ConversationRow> {
        let last_activity = self
            .conversation_by_user(user_id)?
            .map(|c| c.last_activity)
            .unwrap_or_else(now_str);
        self.modify_conversation(user_id, |conversation| {
            conversation.messages.push(message.clone());
            conversation.unread_user += 1;
            conversation.last_activity = last_activity;
        })
    }

    /// Close with a parting notice appended in the same write.
    pub fn close_conversation(
        &self,
        user_id: &str,
        closing: &SupportMessage,
    ) -> Result<ConversationRow> {
        self.modify_conversation(user_id, |conversation| {
            conversation.messages.push(closing.clone());
            conversation.unread_user += 1;
            conversation.status = "closed".to_string();
            conversation.is_typing_user = false;
            conversation.is_typing_admin = false;
        })
    }

    /// Keepalive from the user's socket: counts as activity for the idle timer.
    pub fn touch_support_activity(&self, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE support_conversations SET last_activity = ?1 WHERE user_id = ?2",
                rusqlite::params![now_str(), user_id],
            )?;
            Ok(())
        })
    }

    pub fn mark_support_read_by_admin(&self, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE support_conversations SET unread_admin = 0 WHERE user_id = ?1",
                [user_id],
            )?;
            Ok(())
        })
    }

    pub fn mark_support_read_by_user(&self, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE support_conversations SET unread_user = 0 WHERE user_id = ?1",
                [user_id],
            )?;
            Ok(())
        })
    }

    pub fn set_support_typing(&self, user_id: &str, by_admin: bool, typing: bool) -> Result<()> {
        let column = if by_admin {
            "is_typing_admin"
        } else {
            "is_typing_user"
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                &format!("UPDATE support_conversations SET {column} = ?1 WHERE user_id = ?2"),
                rusqlite::params![typing, user_id],
            )?;
            Ok(())
        })
    }

    /// Desk overview, most recently active first.
    pub fn list_conversations(&self) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM support_conversations
                 ORDER BY last_activity DESC"
            );
            query_conversations(conn, &sql, [])
        })
    }

    pub fn unread_conversation_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM support_conversations WHERE unread_admin > 0",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Open conversations whose last activity predates `cutoff`.
    pub fn idle_open_conversations(&self, cutoff: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM support_conversations
                 WHERE status = 'open' AND last_activity < ?1"
            );
            query_conversations(conn, &sql, [cutoff])
        })
    }

    /// Open conversations idle for a while but not yet abandoned: last
    /// activity inside the (lower, upper] window.
    pub fn followup_candidates(&self, lower: &str, upper: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM support_conversations
                 WHERE status = 'open' AND last_activity >= ?1 AND last_activity < ?2"
            );
            query_conversations(conn, &sql, [lower, upper])
        })
    }

    /// Drop embedded messages older than `cutoff` from every conversation.
    /// Returns (user_id, removed) per conversation that shrank.
    pub fn prune_support_messages(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(String, usize)>> {
        self.with_conn_mut(|conn| {
            let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM support_conversations");
            let conversations = query_conversations(conn, &sql, [])?;

            let mut pruned = Vec::new();
            for mut conversation in conversations {
                let before = conversation.messages.len();
                conversation.messages.retain(|m| m.timestamp >= cutoff);
                let removed = before - conversation.messages.len();
                if removed == 0 {
                    continue;
                }
                conn.execute(
                    "UPDATE support_conversations SET messages = ?1 WHERE id = ?2",
                    rusqlite::params![
                        serde_json::to_string(&conversation.messages)?,
                        conversation.id
                    ],
                )?;
                pruned.push((conversation.user_id, removed));
            }
            Ok(pruned)
        })
    }

    /// Read-modify-write on the single row under the connection lock, then
    /// stamp the activity clocks.
    fn modify_conversation<F>(&self, user_id: &str, mutate: F) -> Result<ConversationRow>
    where
        F: FnOnce(&mut ConversationRow),
    {
        self.with_conn_mut(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM support_conversations WHERE user_id = ?1"
            );
            let mut conversation = conn
                .prepare(&sql)?
                .query_row([user_id], map_conversation)
                .optional()?
                .ok_or_else(|| anyhow::anyhow!("no support conversation for user {user_id}"))?;

            let now = now_str();
            conversation.updated_at = now.clone();
            conversation.last_activity = now;
            mutate(&mut conversation);

            conn.execute(
                "UPDATE support_conversations
                 SET messages = ?1, status = ?2, unread_admin = ?3, unread_user = ?4,
                     updated_at = ?5, last_activity = ?6, is_typing_user = ?7,
                     is_typing_admin = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    serde_json::to_string(&conversation.messages)?,
                    conversation.status,
                    conversation.unread_admin,
                    conversation.unread_user,
                    conversation.updated_at,
                    conversation.last_activity,
                    conversation.is_typing_user,
                    conversation.is_typing_admin,
                    conversation.id,
                ],
            )?;
            Ok(conversation)
        })
    }
}

fn query_conversations<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ConversationRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_conversation)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_conversation(row: &rusqlite::Row) -> rusqlite::Result<ConversationRow> {
    let messages: String = row.get(4)?;
    Ok(ConversationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        user_email: row.get(3)?,
        messages: serde_json::from_str(&messages).unwrap_or_default(),
        status: row.get(5)?,
        unread_admin: row.get(6)?,
        unread_user: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        last_activity: row.get(10)?,
        is_typing_user: row.get(11)?,
        is_typing_admin: row.get(12)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    pub(crate) fn test_conversation(id: &str, user_id: &str) -> ConversationRow {
        let now = now_str();
        ConversationRow {
            id: id.to_string(),
            user_id: user_id.to_string(),
            user_name: "alice".to_string(),
            user_email: "alice@example.com".to_string(),
            messages: vec![SupportMessage::system("welcome")],
            status: "open".to_string(),
            unread_admin: 0,
            unread_user: 1,
            created_at: now.clone(),
            updated_at: now.clone(),
            last_activity: now,
            is_typing_user: false,
            is_typing_admin: false,
        }
    }

    #[test]
    fn user_message_reopens_and_bumps_admin_unread() {
        let db = Database::open_in_memory().unwrap();
        let mut conversation = test_conversation("c1", "u1");
        conversation.status = "closed".to_string();
        db.insert_conversation(&conversation).unwrap();

        let msg = SupportMessage::from_user(Uuid::new_v4(), "still need help");
        let updated = db.append_user_message("u1", &msg).unwrap();

        assert_eq!(updated.status, "open");
        assert_eq!(updated.unread_admin, 1);
        assert_eq!(updated.messages.len(), 2);
        assert_eq!(db.unread_conversation_count().unwrap(), 1);

        db.mark_support_read_by_admin("u1").unwrap();
        assert_eq!(db.unread_conversation_count().unwrap(), 0);
    }

    #[test]
    fn close_appends_notice_and_clears_typing() {
        let db = Database::open_in_memory().unwrap();
        let mut conversation = test_conversation("c1", "u1");
        conversation.is_typing_user = true;
        db.insert_conversation(&conversation).unwrap();

        let updated = db
            .close_conversation("u1", &SupportMessage::system("closing due to inactivity"))
            .unwrap();
        assert_eq!(updated.status, "closed");
        assert!(!updated.is_typing_user);
        assert_eq!(updated.messages.len(), 2);
    }

    #[test]
    fn idle_and_followup_windows() {
        let db = Database::open_in_memory().unwrap();

        let mut stale = test_conversation("c1", "u1");
        stale.last_activity = (Utc::now() - Duration::minutes(90)).to_rfc3339();
        db.insert_conversation(&stale).unwrap();

        let mut fresh = test_conversation("c2", "u2");
        fresh.user_email = "bob@example.com".to_string();
        db.insert_conversation(&fresh).unwrap();

        let cutoff = (Utc::now() - Duration::minutes(30)).to_rfc3339();
        let idle = db.idle_open_conversations(&cutoff).unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].user_id, "u1");

        let lower = (Utc::now() - Duration::hours(2)).to_rfc3339();
        let upper = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let followups = db.followup_candidates(&lower, &upper).unwrap();
        assert_eq!(followups.len(), 1);
        assert_eq!(followups[0].user_id, "u1");
    }

    #[test]
    fn pruning_drops_only_old_messages() {
        let db = Database::open_in_memory().unwrap();
        let mut conversation = test_conversation("c1", "u1");
        let mut old = SupportMessage::system("old");
        old.timestamp = Utc::now() - Duration::minutes(10);
        conversation.messages.insert(0, old);
        db.insert_conversation(&conversation).unwrap();

        let pruned = db
            .prune_support_messages(Utc::now() - Duration::minutes(5))
            .unwrap();
        assert_eq!(pruned, vec![("u1".to_string(), 1)]);

        let remaining = db.conversation_by_user("u1").unwrap().unwrap();
        assert_eq!(remaining.messages.len(), 1);
        assert_eq!(remaining.messages[0].body, "welcome");
    }
}
