use anyhow::Result;
use rusqlite::Connection;

use crate::models::RatingRow;
use crate::{Database, OptionalExt};

const RATING_COLUMNS: &str =
    "id, rated_user_id, rater_id, rater_username, listing_id, rating, comment, created_at";

impl Database {
    pub fn insert_rating(&self, rating: &RatingRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO ratings (id, rated_user_id, rater_id, rater_username,
                     listing_id, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    rating.id,
                    rating.rated_user_id,
                    rating.rater_id,
                    rating.rater_username,
                    rating.listing_id,
                    rating.rating,
                    rating.comment,
                    rating.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// One rating per rater per listing.
    pub fn find_rating(&self, rater_id: &str, listing_id: &str) -> Result<Option<RatingRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {RATING_COLUMNS} FROM ratings WHERE rater_id = ?1 AND listing_id = ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row(rusqlite::params![rater_id, listing_id], map_rating)
                .optional()
        })
    }

    pub fn ratings_for_user(&self, rated_user_id: &str) -> Result<Vec<RatingRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {RATING_COLUMNS} FROM ratings
                 WHERE rated_user_id = ?1 ORDER BY created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([rated_user_id], map_rating)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Average and count over everything this user has received, for
    /// recomputing the denormalized score on the user row.
    pub fn rating_stats(&self, rated_user_id: &str) -> Result<(f64, i64)> {
        self.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT COALESCE(AVG(rating), 0), COUNT(*) FROM ratings WHERE rated_user_id = ?1",
                [rated_user_id],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?)),
            )?;
            Ok(stats)
        })
    }
}

fn map_rating(row: &rusqlite::Row) -> rusqlite::Result<RatingRow> {
    Ok(RatingRow {
        id: row.get(0)?,
        rated_user_id: row.get(1)?,
        rater_id: row.get(2)?,
        rater_username: row.get(3)?,
        listing_id: row.get(4)?,
        rating: row.get(5)?,
        comment: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_str;

    fn test_rating(id: &str, rated: &str, rater: &str, listing: &str, score: i64) -> RatingRow {
        RatingRow {
            id: id.to_string(),
            rated_user_id: rated.to_string(),
            rater_id: rater.to_string(),
            rater_username: rater.to_string(),
            listing_id: listing.to_string(),
            rating: score,
            comment: None,
            created_at: now_str(),
        }
    }

    #[test]
    fn duplicate_rating_for_listing_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_rating(&test_rating("r1", "u1", "u2", "l1", 5)).unwrap();

        assert!(db.find_rating("u2", "l1").unwrap().is_some());
        assert!(db.find_rating("u2", "l2").unwrap().is_none());

        // UNIQUE(rater_id, listing_id) backs the handler-level check.
        assert!(db.insert_rating(&test_rating("r2", "u1", "u2", "l1", 3)).is_err());
    }

    #[test]
    fn stats_average_received_ratings() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.rating_stats("u1").unwrap(), (0.0, 0));

        db.insert_rating(&test_rating("r1", "u1", "u2", "l1", 5)).unwrap();
        db.insert_rating(&test_rating("r2", "u1", "u3", "l2", 4)).unwrap();
        db.insert_rating(&test_rating("r3", "u9", "u2", "l3", 1)).unwrap();

        let (average, total) = db.rating_stats("u1").unwrap();
        assert_eq!(total, 2);
        assert!((average - 4.5).abs() < f64::EPSILON);
    }
}
