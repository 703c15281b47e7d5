use anyhow::Result;

use crate::models::ReportRow;
use crate::{Database, OptionalExt};

const REPORT_COLUMNS: &str =
    "id, listing_id, reporter_id, reporter_username, reason, description, status, created_at";

impl Database {
    pub fn insert_report(&self, report: &ReportRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reports (id, listing_id, reporter_id, reporter_username,
                     reason, description, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    report.id,
                    report.listing_id,
                    report.reporter_id,
                    report.reporter_username,
                    report.reason,
                    report.description,
                    report.status,
                    report.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// A user can flag any given listing only once.
    pub fn find_report(&self, reporter_id: &str, listing_id: &str) -> Result<Option<ReportRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REPORT_COLUMNS} FROM reports WHERE reporter_id = ?1 AND listing_id = ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row(rusqlite::params![reporter_id, listing_id], map_report)
                .optional()
        })
    }

    pub fn list_reports(&self) -> Result<Vec<ReportRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {REPORT_COLUMNS} FROM reports ORDER BY created_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], map_report)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn reports_for_listing(&self, listing_id: &str) -> Result<Vec<ReportRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {REPORT_COLUMNS} FROM reports
                 WHERE listing_id = ?1 ORDER BY created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([listing_id], map_report)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Settle every open report against a listing once a moderator acts on it.
    pub fn resolve_reports_for_listing(&self, listing_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE reports SET status = 'resolved'
                 WHERE listing_id = ?1 AND status = 'pending'",
                [listing_id],
            )?;
            Ok(n)
        })
    }
}

fn map_report(row: &rusqlite::Row) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        reporter_id: row.get(2)?,
        reporter_username: row.get(3)?,
        reason: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_str;

    fn test_report(id: &str, listing: &str, reporter: &str) -> ReportRow {
        ReportRow {
            id: id.to_string(),
            listing_id: listing.to_string(),
            reporter_id: reporter.to_string(),
            reporter_username: reporter.to_string(),
            reason: "scam".to_string(),
            description: None,
            status: "pending".to_string(),
            created_at: now_str(),
        }
    }

    #[test]
    fn one_report_per_listing_per_user() {
        let db = Database::open_in_memory().unwrap();
        db.insert_report(&test_report("r1", "l1", "u1")).unwrap();

        assert!(db.find_report("u1", "l1").unwrap().is_some());
        assert!(db.find_report("u2", "l1").unwrap().is_none());
        assert!(db.insert_report(&test_report("r2", "l1", "u1")).is_err());
    }

    #[test]
    fn moderation_resolves_all_pending_reports() {
        let db = Database::open_in_memory().unwrap();
        db.insert_report(&test_report("r1", "l1", "u1")).unwrap();
        db.insert_report(&test_report("r2", "l1", "u2")).unwrap();
        db.insert_report(&test_report("r3", "l2", "u1")).unwrap();

        assert_eq!(db.reports_for_listing("l1").unwrap().len(), 2);
        assert_eq!(db.resolve_reports_for_listing("l1").unwrap(), 2);

        let reports = db.list_reports().unwrap();
        let pending: Vec<_> = reports.iter().filter(|r| r.status == "pending").collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].listing_id, "l2");
    }
}
