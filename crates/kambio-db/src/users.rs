use anyhow::Result;
use rusqlite::Connection;

use crate::models::UserRow;
use crate::{Database, OptionalExt, now_str};

const USER_COLUMNS: &str = "id, username, email, password, country, languages, role, \
     member_number, rating, total_ratings, last_seen, is_online, \
     location_sharing_enabled, latitude, longitude, blocked_users, created_at";

impl Database {
    pub fn insert_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, country, languages, role,
                     member_number, rating, total_ratings, last_seen, is_online,
                     location_sharing_enabled, latitude, longitude, blocked_users, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    user.id,
                    user.username,
                    user.email,
                    user.password,
                    user.country,
                    serde_json::to_string(&user.languages)?,
                    user.role,
                    user.member_number,
                    user.rating,
                    user.total_ratings,
                    user.last_seen,
                    user.is_online,
                    user.location_sharing_enabled,
                    user.latitude,
                    user.longitude,
                    serde_json::to_string(&user.blocked_users)?,
                    user.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], map_user).optional()
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([email], map_user).optional()
        })
    }

    /// Case-insensitive username collision check.
    pub fn username_taken(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE lower(username) = lower(?1)",
                [username],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Allocate the next member number. Numbers are '#K%05d', sequential
    /// from 1000.
    pub fn next_member_number(&self) -> Result<String> {
        self.with_conn(|conn| {
            let last: Option<String> = conn
                .query_row(
                    "SELECT member_number FROM users ORDER BY member_number DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let next = last
                .as_deref()
                .and_then(|n| n.strip_prefix("#K"))
                .and_then(|n| n.parse::<u32>().ok())
                .map(|n| n + 1)
                .unwrap_or(1000);

            Ok(format!("#K{next:05}"))
        })
    }

    /// Refresh presence on an authenticated request.
    pub fn touch_seen(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET last_seen = ?1, is_online = 1 WHERE id = ?2",
                rusqlite::params![now_str(), id],
            )?;
            Ok(())
        })
    }

    pub fn set_online(&self, id: &str, online: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?1 WHERE id = ?2",
                rusqlite::params![online, id],
            )?;
            Ok(())
        })
    }

    /// Disabling sharing always clears the stored coordinates.
    pub fn set_location_sharing(
        &self,
        id: &str,
        enabled: bool,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<()> {
        let (lat, lng) = if enabled {
            (latitude, longitude)
        } else {
            (None, None)
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET location_sharing_enabled = ?1, latitude = ?2, longitude = ?3
                 WHERE id = ?4",
                rusqlite::params![enabled, lat, lng, id],
            )?;
            Ok(())
        })
    }

    /// Add `target` to the blocker's exclusion list.
    /// Returns false if already blocked.
    pub fn block_user(&self, blocker: &str, target: &str) -> Result<bool> {
        self.update_blocklist(blocker, |list| {
            if list.iter().any(|id| id == target) {
                false
            } else {
                list.push(target.to_string());
                true
            }
        })
    }

    /// Returns false if `target` was not blocked.
    pub fn unblock_user(&self, blocker: &str, target: &str) -> Result<bool> {
        self.update_blocklist(blocker, |list| {
            let before = list.len();
            list.retain(|id| id != target);
            list.len() != before
        })
    }

    fn update_blocklist<F>(&self, user_id: &str, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<String>) -> bool,
    {
        self.with_conn_mut(|conn| {
            let raw: String = conn.query_row(
                "SELECT blocked_users FROM users WHERE id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            let mut list: Vec<String> = serde_json::from_str(&raw)?;

            let changed = mutate(&mut list);
            if changed {
                conn.execute(
                    "UPDATE users SET blocked_users = ?1 WHERE id = ?2",
                    rusqlite::params![serde_json::to_string(&list)?, user_id],
                )?;
            }
            Ok(changed)
        })
    }

    pub fn update_user_rating(&self, user_id: &str, average: f64, total: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET rating = ?1, total_ratings = ?2 WHERE id = ?3",
                rusqlite::params![average, total, user_id],
            )?;
            Ok(())
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC");
            query_users(conn, &sql, [])
        })
    }

    pub fn users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();
            let rows = stmt
                .query_map(params.as_slice(), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Remove a user and everything keyed to them. Returns false when the
    /// user did not exist.
    pub fn delete_user_cascade(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM listings WHERE user_id = ?1", [id])?;
            tx.execute(
                "DELETE FROM messages WHERE sender_id = ?1 OR recipient_id = ?1",
                [id],
            )?;
            tx.execute("DELETE FROM notifications WHERE user_id = ?1", [id])?;
            let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }
}

fn query_users<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<UserRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_user)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_user(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    let languages: String = row.get(5)?;
    let blocked: String = row.get(15)?;
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        country: row.get(4)?,
        languages: serde_json::from_str(&languages).unwrap_or_default(),
        role: row.get(6)?,
        member_number: row.get(7)?,
        rating: row.get(8)?,
        total_ratings: row.get(9)?,
        last_seen: row.get(10)?,
        is_online: row.get(11)?,
        location_sharing_enabled: row.get(12)?,
        latitude: row.get(13)?,
        longitude: row.get(14)?,
        blocked_users: serde_json::from_str(&blocked).unwrap_or_default(),
        created_at: row.get(16)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_user(id: &str, username: &str) -> UserRow {
        UserRow {
            id: id.to_string(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "$argon2id$fake".to_string(),
            country: "Turkey".to_string(),
            languages: vec!["en".to_string()],
            role: "user".to_string(),
            member_number: format!("#K{:05}-{id}", 1000 + id.len()),
            rating: 0.0,
            total_ratings: 0,
            last_seen: None,
            is_online: false,
            location_sharing_enabled: false,
            latitude: None,
            longitude: None,
            blocked_users: vec![],
            created_at: now_str(),
        }
    }

    #[test]
    fn insert_and_fetch_user() {
        let db = Database::open_in_memory().unwrap();
        let user = test_user("u1", "alice");
        db.insert_user(&user).unwrap();

        let fetched = db.get_user_by_id("u1").unwrap().unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.languages, vec!["en".to_string()]);
        assert!(db.get_user_by_email("alice@example.com").unwrap().is_some());
        assert!(db.get_user_by_id("nope").unwrap().is_none());
    }

    #[test]
    fn username_check_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&test_user("u1", "alice")).unwrap();
        assert!(db.username_taken("ALICE").unwrap());
        assert!(!db.username_taken("bob").unwrap());
    }

    #[test]
    fn member_numbers_are_sequential() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.next_member_number().unwrap(), "#K01000");

        let mut user = test_user("u1", "alice");
        user.member_number = "#K01000".to_string();
        db.insert_user(&user).unwrap();
        assert_eq!(db.next_member_number().unwrap(), "#K01001");
    }

    #[test]
    fn block_and_unblock() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&test_user("u1", "alice")).unwrap();

        assert!(db.block_user("u1", "u2").unwrap());
        assert!(!db.block_user("u1", "u2").unwrap()); // already blocked

        let user = db.get_user_by_id("u1").unwrap().unwrap();
        assert_eq!(user.blocked_users, vec!["u2".to_string()]);

        assert!(db.unblock_user("u1", "u2").unwrap());
        assert!(!db.unblock_user("u1", "u2").unwrap());
    }

    #[test]
    fn disabling_location_sharing_clears_coordinates() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&test_user("u1", "alice")).unwrap();

        db.set_location_sharing("u1", true, Some(41.0), Some(29.0))
            .unwrap();
        let user = db.get_user_by_id("u1").unwrap().unwrap();
        assert_eq!(user.latitude, Some(41.0));

        db.set_location_sharing("u1", false, Some(41.0), Some(29.0))
            .unwrap();
        let user = db.get_user_by_id("u1").unwrap().unwrap();
        assert!(user.latitude.is_none());
        assert!(!user.location_sharing_enabled);
    }
}
