use anyhow::Result;
use rusqlite::Connection;

use crate::models::ListingRow;
use crate::{Database, OptionalExt};

const LISTING_COLUMNS: &str = "id, user_id, username, from_currency, from_amount, to_currency, \
     to_amount, country, city, description, status, latitude, longitude, created_at, expires_at";

impl Database {
    pub fn insert_listing(&self, listing: &ListingRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO listings (id, user_id, username, from_currency, from_amount,
                     to_currency, to_amount, country, city, description, status,
                     latitude, longitude, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                rusqlite::params![
                    listing.id,
                    listing.user_id,
                    listing.username,
                    listing.from_currency,
                    listing.from_amount,
                    listing.to_currency,
                    listing.to_amount,
                    listing.country,
                    listing.city,
                    listing.description,
                    listing.status,
                    listing.latitude,
                    listing.longitude,
                    listing.created_at,
                    listing.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_listing(&self, id: &str) -> Result<Option<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], map_listing).optional()
        })
    }

    /// Browse listings with optional filters, newest first. Listings owned by
    /// anyone in `exclude_owners` (the viewer's blocklist) are dropped.
    pub fn list_listings(
        &self,
        status: &str,
        country: Option<&str>,
        from_currency: Option<&str>,
        to_currency: Option<&str>,
        exclude_owners: &[String],
    ) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE status = ?1");
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(status.to_string())];

            for (column, value) in [
                ("country", country),
                ("from_currency", from_currency),
                ("to_currency", to_currency),
            ] {
                if let Some(v) = value {
                    params.push(Box::new(v.to_string()));
                    sql.push_str(&format!(" AND {column} = ?{}", params.len()));
                }
            }

            for owner in exclude_owners {
                params.push(Box::new(owner.clone()));
                sql.push_str(&format!(" AND user_id != ?{}", params.len()));
            }

            sql.push_str(" ORDER BY created_at DESC");

            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt
                .query_map(refs.as_slice(), map_listing)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn listings_by_user(&self, user_id: &str) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {LISTING_COLUMNS} FROM listings WHERE user_id = ?1 ORDER BY created_at DESC"
            );
            query_listings(conn, &sql, [user_id])
        })
    }

    /// Candidates for the nearby scan: only listings that carry coordinates.
    pub fn listings_with_coords(&self, status: &str) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {LISTING_COLUMNS} FROM listings
                 WHERE status = ?1 AND latitude IS NOT NULL AND longitude IS NOT NULL"
            );
            query_listings(conn, &sql, [status])
        })
    }

    /// Owner edit: rewrites the offer fields, leaves status and expiry alone.
    pub fn update_listing(&self, listing: &ListingRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE listings SET from_currency = ?1, from_amount = ?2, to_currency = ?3,
                     to_amount = ?4, country = ?5, city = ?6, description = ?7,
                     latitude = ?8, longitude = ?9
                 WHERE id = ?10",
                rusqlite::params![
                    listing.from_currency,
                    listing.from_amount,
                    listing.to_currency,
                    listing.to_amount,
                    listing.country,
                    listing.city,
                    listing.description,
                    listing.latitude,
                    listing.longitude,
                    listing.id,
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_listing_status(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE listings SET status = ?1 WHERE id = ?2",
                rusqlite::params![status, id],
            )?;
            Ok(n > 0)
        })
    }

    pub fn republish_listing(&self, id: &str, expires_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE listings SET status = 'active', expires_at = ?1 WHERE id = ?2",
                rusqlite::params![expires_at, id],
            )?;
            Ok(())
        })
    }

    /// Housekeeping: flip active listings past their expiry. Returns the
    /// number of listings expired.
    pub fn expire_listings(&self, now: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE listings SET status = 'expired'
                 WHERE status = 'active' AND expires_at < ?1",
                [now],
            )?;
            Ok(n)
        })
    }

    pub fn list_all_listings(&self) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {LISTING_COLUMNS} FROM listings ORDER BY created_at DESC");
            query_listings(conn, &sql, [])
        })
    }

    /// Admin hard delete. Returns false when the listing did not exist.
    pub fn delete_listing(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM listings WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn count_listings_by_user(&self, user_id: &str, status: Option<&str>) -> Result<i64> {
        self.with_conn(|conn| {
            let count = match status {
                Some(s) => conn.query_row(
                    "SELECT COUNT(*) FROM listings WHERE user_id = ?1 AND status = ?2",
                    rusqlite::params![user_id, s],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM listings WHERE user_id = ?1",
                    [user_id],
                    |row| row.get(0),
                )?,
            };
            Ok(count)
        })
    }
}

fn query_listings<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ListingRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_listing)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_listing(row: &rusqlite::Row) -> rusqlite::Result<ListingRow> {
    Ok(ListingRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        from_currency: row.get(3)?,
        from_amount: row.get(4)?,
        to_currency: row.get(5)?,
        to_amount: row.get(6)?,
        country: row.get(7)?,
        city: row.get(8)?,
        description: row.get(9)?,
        status: row.get(10)?,
        latitude: row.get(11)?,
        longitude: row.get(12)?,
        created_at: row.get(13)?,
        expires_at: row.get(14)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::now_str;
    use crate::users::tests::test_user;

    pub(crate) fn test_listing(id: &str, user_id: &str, status: &str) -> ListingRow {
        ListingRow {
            id: id.to_string(),
            user_id: user_id.to_string(),
            username: "alice".to_string(),
            from_currency: "EUR".to_string(),
            from_amount: 100.0,
            to_currency: "TRY".to_string(),
            to_amount: Some(3500.0),
            country: "Turkey".to_string(),
            city: "Istanbul".to_string(),
            description: "cash meetup".to_string(),
            status: status.to_string(),
            latitude: None,
            longitude: None,
            created_at: now_str(),
            expires_at: (chrono::Utc::now() + chrono::Duration::hours(12)).to_rfc3339(),
        }
    }

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&test_user("u1", "alice")).unwrap();
        db
    }

    #[test]
    fn filters_and_blocklist_exclusion() {
        let db = seeded_db();
        db.insert_user(&test_user("u2", "bob")).unwrap();

        db.insert_listing(&test_listing("l1", "u1", "active")).unwrap();
        let mut other = test_listing("l2", "u2", "active");
        other.from_currency = "USD".to_string();
        db.insert_listing(&other).unwrap();

        let all = db.list_listings("active", None, None, None, &[]).unwrap();
        assert_eq!(all.len(), 2);

        let eur_only = db
            .list_listings("active", None, Some("EUR"), None, &[])
            .unwrap();
        assert_eq!(eur_only.len(), 1);
        assert_eq!(eur_only[0].id, "l1");

        let without_blocked = db
            .list_listings("active", None, None, None, &["u2".to_string()])
            .unwrap();
        assert_eq!(without_blocked.len(), 1);
        assert_eq!(without_blocked[0].id, "l1");
    }

    #[test]
    fn expire_job_only_touches_overdue_active_listings() {
        let db = seeded_db();

        let mut overdue = test_listing("l1", "u1", "active");
        overdue.expires_at = (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        db.insert_listing(&overdue).unwrap();

        db.insert_listing(&test_listing("l2", "u1", "active")).unwrap();

        let mut closed = test_listing("l3", "u1", "closed");
        closed.expires_at = overdue.expires_at.clone();
        db.insert_listing(&closed).unwrap();

        let expired = db.expire_listings(&now_str()).unwrap();
        assert_eq!(expired, 1);

        assert_eq!(db.get_listing("l1").unwrap().unwrap().status, "expired");
        assert_eq!(db.get_listing("l2").unwrap().unwrap().status, "active");
        assert_eq!(db.get_listing("l3").unwrap().unwrap().status, "closed");
    }

    #[test]
    fn republish_resets_status_and_expiry() {
        let db = seeded_db();
        let mut listing = test_listing("l1", "u1", "expired");
        listing.expires_at = (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        db.insert_listing(&listing).unwrap();

        let new_expiry = (chrono::Utc::now() + chrono::Duration::hours(12)).to_rfc3339();
        db.republish_listing("l1", &new_expiry).unwrap();

        let fetched = db.get_listing("l1").unwrap().unwrap();
        assert_eq!(fetched.status, "active");
        assert_eq!(fetched.expires_at, new_expiry);
    }
}
