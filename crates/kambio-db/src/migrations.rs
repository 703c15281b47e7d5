use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                       TEXT PRIMARY KEY,
            username                 TEXT NOT NULL UNIQUE,
            email                    TEXT NOT NULL UNIQUE,
            password                 TEXT NOT NULL,
            country                  TEXT NOT NULL DEFAULT '',
            languages                TEXT NOT NULL DEFAULT '[]',
            role                     TEXT NOT NULL DEFAULT 'user',
            member_number            TEXT NOT NULL UNIQUE,
            rating                   REAL NOT NULL DEFAULT 0,
            total_ratings            INTEGER NOT NULL DEFAULT 0,
            last_seen                TEXT,
            is_online                INTEGER NOT NULL DEFAULT 0,
            location_sharing_enabled INTEGER NOT NULL DEFAULT 0,
            latitude                 REAL,
            longitude                REAL,
            blocked_users            TEXT NOT NULL DEFAULT '[]',
            created_at               TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS listings (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            username        TEXT NOT NULL,
            from_currency   TEXT NOT NULL,
            from_amount     REAL NOT NULL,
            to_currency     TEXT NOT NULL,
            to_amount       REAL,
            country         TEXT NOT NULL,
            city            TEXT NOT NULL,
            description     TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'active',
            latitude        REAL,
            longitude       REAL,
            created_at      TEXT NOT NULL,
            expires_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_listings_status
            ON listings(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_listings_user
            ON listings(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            listing_id      TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            sender_username TEXT NOT NULL,
            recipient_id    TEXT NOT NULL,
            content         TEXT NOT NULL,
            read            INTEGER NOT NULL DEFAULT 0,
            timestamp       TEXT NOT NULL,
            deleted_by      TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_messages_listing
            ON messages(listing_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_recipient
            ON messages(recipient_id, read);

        CREATE TABLE IF NOT EXISTS exchange_confirmations (
            id              TEXT PRIMARY KEY,
            listing_id      TEXT NOT NULL,
            user1_id        TEXT NOT NULL,
            user2_id        TEXT NOT NULL,
            user1_confirmed INTEGER NOT NULL DEFAULT 0,
            user2_confirmed INTEGER NOT NULL DEFAULT 0,
            initiated_at    TEXT NOT NULL,
            deadline        TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending'
        );

        CREATE INDEX IF NOT EXISTS idx_exchanges_listing
            ON exchange_confirmations(listing_id, status);

        CREATE TABLE IF NOT EXISTS ratings (
            id              TEXT PRIMARY KEY,
            rated_user_id   TEXT NOT NULL,
            rater_id        TEXT NOT NULL,
            rater_username  TEXT NOT NULL,
            listing_id      TEXT NOT NULL,
            rating          INTEGER NOT NULL,
            comment         TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE(rater_id, listing_id)
        );

        CREATE INDEX IF NOT EXISTS idx_ratings_rated
            ON ratings(rated_user_id, created_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            kind        TEXT NOT NULL,
            content     TEXT NOT NULL,
            read        INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);

        CREATE TABLE IF NOT EXISTS reports (
            id                TEXT PRIMARY KEY,
            listing_id        TEXT NOT NULL,
            reporter_id       TEXT NOT NULL,
            reporter_username TEXT NOT NULL,
            reason            TEXT NOT NULL,
            description       TEXT,
            status            TEXT NOT NULL DEFAULT 'pending',
            created_at        TEXT NOT NULL,
            UNIQUE(reporter_id, listing_id)
        );

        -- One conversation per user; messages embedded as an ordered JSON
        -- list, mirroring the document shape the support desk works with.
        CREATE TABLE IF NOT EXISTS support_conversations (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL UNIQUE,
            user_name       TEXT NOT NULL,
            user_email      TEXT NOT NULL,
            messages        TEXT NOT NULL DEFAULT '[]',
            status          TEXT NOT NULL DEFAULT 'open',
            unread_admin    INTEGER NOT NULL DEFAULT 0,
            unread_user     INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            last_activity   TEXT NOT NULL,
            is_typing_user  INTEGER NOT NULL DEFAULT 0,
            is_typing_admin INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS rate_snapshots (
            id          TEXT PRIMARY KEY,
            base        TEXT NOT NULL,
            rates       TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rate_snapshots_recorded
            ON rate_snapshots(recorded_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
