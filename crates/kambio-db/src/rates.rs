use anyhow::Result;
use rusqlite::Connection;

use crate::models::RateSnapshotRow;
use crate::{Database, OptionalExt};

const SNAPSHOT_COLUMNS: &str = "id, base, rates, recorded_at";

impl Database {
    pub fn insert_rate_snapshot(&self, snapshot: &RateSnapshotRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO rate_snapshots (id, base, rates, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    snapshot.id,
                    snapshot.base,
                    serde_json::to_string(&snapshot.rates)?,
                    snapshot.recorded_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn latest_rate_snapshot(&self) -> Result<Option<RateSnapshotRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM rate_snapshots
                 ORDER BY recorded_at DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([], map_snapshot).optional()
        })
    }

    /// History points from `since` onwards, oldest first.
    pub fn rate_snapshots_since(&self, since: &str) -> Result<Vec<RateSnapshotRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM rate_snapshots
                 WHERE recorded_at >= ?1 ORDER BY recorded_at ASC"
            );
            query_snapshots(conn, &sql, [since])
        })
    }

    /// The newest snapshot strictly older than `before`, used as the
    /// comparison baseline for trend arrows.
    pub fn rate_snapshot_before(&self, before: &str) -> Result<Option<RateSnapshotRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM rate_snapshots
                 WHERE recorded_at < ?1 ORDER BY recorded_at DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([before], map_snapshot).optional()
        })
    }

    /// Housekeeping: drop history older than the retention cutoff.
    pub fn prune_rate_history(&self, cutoff: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM rate_snapshots WHERE recorded_at < ?1",
                [cutoff],
            )?;
            Ok(n)
        })
    }
}

fn query_snapshots<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<RateSnapshotRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_snapshot)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_snapshot(row: &rusqlite::Row) -> rusqlite::Result<RateSnapshotRow> {
    let rates: String = row.get(2)?;
    Ok(RateSnapshotRow {
        id: row.get(0)?,
        base: row.get(1)?,
        rates: serde_json::from_str(&rates).unwrap_or_default(),
        recorded_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn snapshot_at(id: &str, hours_ago: i64, try_rate: f64) -> RateSnapshotRow {
        let mut rates = HashMap::new();
        rates.insert("TRY".to_string(), try_rate);
        rates.insert("USD".to_string(), 1.08);
        RateSnapshotRow {
            id: id.to_string(),
            base: "EUR".to_string(),
            rates,
            recorded_at: (Utc::now() - Duration::hours(hours_ago)).to_rfc3339(),
        }
    }

    #[test]
    fn latest_and_baseline_lookups() {
        let db = Database::open_in_memory().unwrap();
        db.insert_rate_snapshot(&snapshot_at("s1", 48, 34.0)).unwrap();
        db.insert_rate_snapshot(&snapshot_at("s2", 1, 35.5)).unwrap();

        let latest = db.latest_rate_snapshot().unwrap().unwrap();
        assert_eq!(latest.id, "s2");
        assert_eq!(latest.rates["TRY"], 35.5);

        let day_ago = (Utc::now() - Duration::hours(24)).to_rfc3339();
        let baseline = db.rate_snapshot_before(&day_ago).unwrap().unwrap();
        assert_eq!(baseline.id, "s1");
    }

    #[test]
    fn history_window_and_pruning() {
        let db = Database::open_in_memory().unwrap();
        db.insert_rate_snapshot(&snapshot_at("s1", 24 * 40, 33.0)).unwrap();
        db.insert_rate_snapshot(&snapshot_at("s2", 24 * 2, 34.0)).unwrap();
        db.insert_rate_snapshot(&snapshot_at("s3", 1, 35.0)).unwrap();

        let week_ago = (Utc::now() - Duration::days(7)).to_rfc3339();
        let recent = db.rate_snapshots_since(&week_ago).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "s2"); // oldest first

        let cutoff = (Utc::now() - Duration::days(30)).to_rfc3339();
        assert_eq!(db.prune_rate_history(&cutoff).unwrap(), 1);
        assert!(db.rate_snapshot_before(&week_ago).unwrap().is_none());
    }
}
