use anyhow::Result;
use rusqlite::Connection;

use crate::models::ExchangeRow;
use crate::{Database, OptionalExt};

const EXCHANGE_COLUMNS: &str = "id, listing_id, user1_id, user2_id, user1_confirmed, \
     user2_confirmed, initiated_at, deadline, status";

impl Database {
    pub fn insert_exchange(&self, exchange: &ExchangeRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO exchange_confirmations (id, listing_id, user1_id, user2_id,
                     user1_confirmed, user2_confirmed, initiated_at, deadline, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    exchange.id,
                    exchange.listing_id,
                    exchange.user1_id,
                    exchange.user2_id,
                    exchange.user1_confirmed,
                    exchange.user2_confirmed,
                    exchange.initiated_at,
                    exchange.deadline,
                    exchange.status,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_exchange(&self, id: &str) -> Result<Option<ExchangeRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {EXCHANGE_COLUMNS} FROM exchange_confirmations WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], map_exchange).optional()
        })
    }

    /// A pair gets one live handshake per listing: a pending or already
    /// confirmed row blocks re-initiation, but other pairs are unaffected.
    pub fn find_open_exchange(
        &self,
        listing_id: &str,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<ExchangeRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {EXCHANGE_COLUMNS} FROM exchange_confirmations
                 WHERE listing_id = ?1 AND status IN ('pending', 'confirmed')
                   AND ((user1_id = ?2 AND user2_id = ?3)
                     OR (user1_id = ?3 AND user2_id = ?2))"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row(rusqlite::params![listing_id, user_a, user_b], map_exchange)
                .optional()
        })
    }

    /// Set one party's flag and, when both flags are now set, flip a pending
    /// row to confirmed in the same locked write. Returns the updated row so
    /// callers never act on a stale snapshot.
    pub fn confirm_party(&self, id: &str, first_party: bool) -> Result<Option<ExchangeRow>> {
        let column = if first_party {
            "user1_confirmed"
        } else {
            "user2_confirmed"
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                &format!("UPDATE exchange_confirmations SET {column} = 1 WHERE id = ?1"),
                [id],
            )?;
            conn.execute(
                "UPDATE exchange_confirmations SET status = 'confirmed'
                 WHERE id = ?1 AND status = 'pending'
                   AND user1_confirmed = 1 AND user2_confirmed = 1",
                [id],
            )?;
            let sql = format!("SELECT {EXCHANGE_COLUMNS} FROM exchange_confirmations WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], map_exchange).optional()
        })
    }

    pub fn set_exchange_status(&self, id: &str, status: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE exchange_confirmations SET status = ?1 WHERE id = ?2",
                rusqlite::params![status, id],
            )?;
            Ok(())
        })
    }

    pub fn exchanges_for_user(&self, user_id: &str) -> Result<Vec<ExchangeRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {EXCHANGE_COLUMNS} FROM exchange_confirmations
                 WHERE user1_id = ?1 OR user2_id = ?1
                 ORDER BY initiated_at DESC"
            );
            query_exchanges(conn, &sql, [user_id])
        })
    }

    /// Ratings are gated on this: the pair must have completed the handshake
    /// on that listing.
    pub fn find_confirmed_exchange(
        &self,
        listing_id: &str,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<ExchangeRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {EXCHANGE_COLUMNS} FROM exchange_confirmations
                 WHERE listing_id = ?1 AND status = 'confirmed'
                   AND ((user1_id = ?2 AND user2_id = ?3)
                     OR (user1_id = ?3 AND user2_id = ?2))"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row(rusqlite::params![listing_id, user_a, user_b], map_exchange)
                .optional()
        })
    }

    /// Housekeeping: pending handshakes past their deadline lapse. Returns
    /// the rows that were flipped so callers can notify both parties.
    pub fn expire_exchanges(&self, now: &str) -> Result<Vec<ExchangeRow>> {
        self.with_conn_mut(|conn| {
            let sql = format!(
                "SELECT {EXCHANGE_COLUMNS} FROM exchange_confirmations
                 WHERE status = 'pending' AND deadline < ?1"
            );
            let overdue = query_exchanges(conn, &sql, [now])?;

            for exchange in &overdue {
                conn.execute(
                    "UPDATE exchange_confirmations SET status = 'expired' WHERE id = ?1",
                    [&exchange.id],
                )?;
            }
            Ok(overdue)
        })
    }
}

fn query_exchanges<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ExchangeRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_exchange)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_exchange(row: &rusqlite::Row) -> rusqlite::Result<ExchangeRow> {
    Ok(ExchangeRow {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        user1_id: row.get(2)?,
        user2_id: row.get(3)?,
        user1_confirmed: row.get(4)?,
        user2_confirmed: row.get(5)?,
        initiated_at: row.get(6)?,
        deadline: row.get(7)?,
        status: row.get(8)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::now_str;

    pub(crate) fn test_exchange(id: &str, listing: &str, owner: &str, other: &str) -> ExchangeRow {
        ExchangeRow {
            id: id.to_string(),
            listing_id: listing.to_string(),
            user1_id: owner.to_string(),
            user2_id: other.to_string(),
            user1_confirmed: false,
            user2_confirmed: false,
            initiated_at: now_str(),
            deadline: (chrono::Utc::now() + chrono::Duration::hours(12)).to_rfc3339(),
            status: "pending".to_string(),
        }
    }

    #[test]
    fn open_lookup_is_scoped_to_the_pair() {
        let db = Database::open_in_memory().unwrap();
        db.insert_exchange(&test_exchange("e1", "l1", "u1", "u2")).unwrap();

        assert!(db.find_open_exchange("l1", "u1", "u2").unwrap().is_some());
        assert!(db.find_open_exchange("l1", "u2", "u1").unwrap().is_some());

        // Another interested party on the same listing is not blocked.
        assert!(db.find_open_exchange("l1", "u1", "u3").unwrap().is_none());
        assert!(db.find_open_exchange("l2", "u1", "u2").unwrap().is_none());
    }

    #[test]
    fn settled_statuses_gate_the_open_lookup() {
        let db = Database::open_in_memory().unwrap();
        let mut done = test_exchange("e1", "l1", "u1", "u2");
        done.status = "confirmed".to_string();
        db.insert_exchange(&done).unwrap();

        // A confirmed handshake still blocks re-initiation for the pair.
        assert!(db.find_open_exchange("l1", "u1", "u2").unwrap().is_some());

        let mut lapsed = test_exchange("e2", "l2", "u1", "u2");
        lapsed.status = "expired".to_string();
        db.insert_exchange(&lapsed).unwrap();
        let mut dropped = test_exchange("e3", "l3", "u1", "u2");
        dropped.status = "cancelled".to_string();
        db.insert_exchange(&dropped).unwrap();

        assert!(db.find_open_exchange("l2", "u1", "u2").unwrap().is_none());
        assert!(db.find_open_exchange("l3", "u1", "u2").unwrap().is_none());
    }

    #[test]
    fn one_confirmation_leaves_the_handshake_pending() {
        let db = Database::open_in_memory().unwrap();
        db.insert_exchange(&test_exchange("e1", "l1", "u1", "u2")).unwrap();

        let row = db.confirm_party("e1", true).unwrap().unwrap();
        assert!(row.user1_confirmed);
        assert!(!row.user2_confirmed);
        assert_eq!(row.status, "pending");
    }

    #[test]
    fn second_confirmation_settles_in_the_same_write() {
        let db = Database::open_in_memory().unwrap();
        db.insert_exchange(&test_exchange("e1", "l1", "u1", "u2")).unwrap();

        db.confirm_party("e1", true).unwrap();
        let row = db.confirm_party("e1", false).unwrap().unwrap();

        // The returned row already reflects the settled state, so two racing
        // confirms can never both observe a pending counterpart.
        assert!(row.user1_confirmed && row.user2_confirmed);
        assert_eq!(row.status, "confirmed");
    }

    #[test]
    fn confirming_twice_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.insert_exchange(&test_exchange("e1", "l1", "u1", "u2")).unwrap();

        db.confirm_party("e1", true).unwrap();
        let row = db.confirm_party("e1", true).unwrap().unwrap();
        assert!(row.user1_confirmed);
        assert!(!row.user2_confirmed);
        assert_eq!(row.status, "pending");
    }

    #[test]
    fn confirmed_lookup_matches_either_direction() {
        let db = Database::open_in_memory().unwrap();
        let mut exchange = test_exchange("e1", "l1", "u1", "u2");
        exchange.status = "confirmed".to_string();
        db.insert_exchange(&exchange).unwrap();

        assert!(db.find_confirmed_exchange("l1", "u1", "u2").unwrap().is_some());
        assert!(db.find_confirmed_exchange("l1", "u2", "u1").unwrap().is_some());
        assert!(db.find_confirmed_exchange("l1", "u1", "u3").unwrap().is_none());
    }

    #[test]
    fn expiry_flips_only_overdue_pending_rows() {
        let db = Database::open_in_memory().unwrap();
        let mut overdue = test_exchange("e1", "l1", "u1", "u2");
        overdue.deadline = (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        db.insert_exchange(&overdue).unwrap();
        db.insert_exchange(&test_exchange("e2", "l2", "u1", "u2")).unwrap();

        let expired = db.expire_exchanges(&now_str()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "e1");

        assert_eq!(db.get_exchange("e1").unwrap().unwrap().status, "expired");
        assert_eq!(db.get_exchange("e2").unwrap().unwrap().status, "pending");
    }
}
