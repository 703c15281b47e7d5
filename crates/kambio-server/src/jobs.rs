//! Periodic housekeeping: listing and exchange expiry, support desk
//! auto-close / follow-ups / message retention, rate history rotation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use kambio_db::models::NotificationRow;
use kambio_db::{Database, now_str};
use kambio_gateway::registry::SupportRegistry;
use kambio_types::events::SupportEvent;
use kambio_types::models::{SenderKind, SupportMessage};

const LISTING_EXPIRY_INTERVAL: Duration = Duration::from_secs(30 * 60);
const EXCHANGE_EXPIRY_INTERVAL: Duration = Duration::from_secs(30 * 60);
const SUPPORT_AUTOCLOSE_INTERVAL: Duration = Duration::from_secs(5 * 60);
const SUPPORT_FOLLOWUP_INTERVAL: Duration = Duration::from_secs(30 * 60);
const SUPPORT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const RATE_ROTATION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// A conversation idle for this long gets auto-closed.
const SUPPORT_IDLE_MINUTES: i64 = 30;
/// Follow-up window: last activity between 1 and 2 hours ago.
const FOLLOWUP_LOWER_HOURS: i64 = 2;
const FOLLOWUP_UPPER_HOURS: i64 = 1;
/// Support messages are ephemeral and dropped after this long.
const SUPPORT_RETENTION_MINUTES: i64 = 5;
/// Rate snapshots are kept for this many days.
const RATE_RETENTION_DAYS: i64 = 30;

const AUTOCLOSE_TEXT: &str =
    "This conversation was closed due to inactivity. Send a message to reopen it.";
const FOLLOWUP_TEXT: &str =
    "Are you still there? Our team will reply as soon as possible.";

pub fn spawn_all(db: Arc<Database>, registry: SupportRegistry) {
    tokio::spawn(expire_listings(db.clone()));
    tokio::spawn(expire_exchanges(db.clone()));
    tokio::spawn(close_idle_support(db.clone(), registry.clone()));
    tokio::spawn(support_followups(db.clone(), registry.clone()));
    tokio::spawn(prune_support_messages(db.clone(), registry));
    tokio::spawn(rotate_rate_history(db));
}

async fn expire_listings(db: Arc<Database>) {
    let mut interval = tokio::time::interval(LISTING_EXPIRY_INTERVAL);
    loop {
        interval.tick().await;
        match db.expire_listings(&now_str()) {
            Ok(0) => {}
            Ok(n) => info!("Expired {} listings", n),
            Err(e) => warn!("Listing expiry failed: {}", e),
        }
    }
}

async fn expire_exchanges(db: Arc<Database>) {
    let mut interval = tokio::time::interval(EXCHANGE_EXPIRY_INTERVAL);
    loop {
        interval.tick().await;
        let expired = match db.expire_exchanges(&now_str()) {
            Ok(expired) => expired,
            Err(e) => {
                warn!("Exchange expiry failed: {}", e);
                continue;
            }
        };
        if expired.is_empty() {
            continue;
        }
        info!("Expired {} exchange confirmations", expired.len());

        for exchange in expired {
            for party in [&exchange.user1_id, &exchange.user2_id] {
                let notification = NotificationRow {
                    id: Uuid::new_v4().to_string(),
                    user_id: party.clone(),
                    kind: "exchange".to_string(),
                    content: "An exchange confirmation expired before both parties confirmed."
                        .to_string(),
                    read: false,
                    created_at: now_str(),
                };
                if let Err(e) = db.insert_notification(&notification) {
                    warn!("Failed to notify {} of expired exchange: {}", party, e);
                }
            }
        }
    }
}

async fn close_idle_support(db: Arc<Database>, registry: SupportRegistry) {
    let mut interval = tokio::time::interval(SUPPORT_AUTOCLOSE_INTERVAL);
    loop {
        interval.tick().await;
        let cutoff = (Utc::now() - chrono::Duration::minutes(SUPPORT_IDLE_MINUTES)).to_rfc3339();
        let idle = match db.idle_open_conversations(&cutoff) {
            Ok(idle) => idle,
            Err(e) => {
                warn!("Idle conversation scan failed: {}", e);
                continue;
            }
        };

        for conversation in idle {
            let notice = SupportMessage::system(AUTOCLOSE_TEXT);
            if let Err(e) = db.close_conversation(&conversation.user_id, &notice) {
                warn!("Failed to auto-close conversation for {}: {}", conversation.user_id, e);
                continue;
            }
            info!("Auto-closed idle support conversation for {}", conversation.user_id);

            if let Ok(user_id) = conversation.user_id.parse::<Uuid>() {
                registry
                    .send_to_user(user_id, SupportEvent::ConversationClosed { message: notice })
                    .await;
            }
        }
    }
}

async fn support_followups(db: Arc<Database>, registry: SupportRegistry) {
    let mut interval = tokio::time::interval(SUPPORT_FOLLOWUP_INTERVAL);
    loop {
        interval.tick().await;
        let now = Utc::now();
        let lower = (now - chrono::Duration::hours(FOLLOWUP_LOWER_HOURS)).to_rfc3339();
        let upper = (now - chrono::Duration::hours(FOLLOWUP_UPPER_HOURS)).to_rfc3339();
        let candidates = match db.followup_candidates(&lower, &upper) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Follow-up scan failed: {}", e);
                continue;
            }
        };

        for conversation in candidates {
            // Only nudge when the user is the one waiting for an answer.
            let waiting = conversation
                .messages
                .last()
                .map(|m| matches!(m.sender_type, SenderKind::User))
                .unwrap_or(false);
            if !waiting {
                continue;
            }

            let nudge = SupportMessage::system(FOLLOWUP_TEXT);
            if let Err(e) = db.append_system_message(&conversation.user_id, &nudge) {
                warn!("Failed to store follow-up for {}: {}", conversation.user_id, e);
                continue;
            }
            info!("Sent support follow-up to {}", conversation.user_id);

            if let Ok(user_id) = conversation.user_id.parse::<Uuid>() {
                registry
                    .send_to_user(user_id, SupportEvent::FollowUp { message: nudge })
                    .await;
            }
        }
    }
}

async fn prune_support_messages(db: Arc<Database>, registry: SupportRegistry) {
    let mut interval = tokio::time::interval(SUPPORT_PRUNE_INTERVAL);
    loop {
        interval.tick().await;
        let cutoff = Utc::now() - chrono::Duration::minutes(SUPPORT_RETENTION_MINUTES);
        let pruned = match db.prune_support_messages(cutoff) {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!("Support message pruning failed: {}", e);
                continue;
            }
        };

        for (user_id, count) in pruned {
            info!("Pruned {} support messages for {}", count, user_id);
            if let Ok(user_id) = user_id.parse::<Uuid>() {
                registry
                    .send_to_user(user_id, SupportEvent::MessagesPruned { count })
                    .await;
            }
        }
    }
}

async fn rotate_rate_history(db: Arc<Database>) {
    let mut interval = tokio::time::interval(RATE_ROTATION_INTERVAL);
    loop {
        interval.tick().await;
        let cutoff = (Utc::now() - chrono::Duration::days(RATE_RETENTION_DAYS)).to_rfc3339();
        match db.prune_rate_history(&cutoff) {
            Ok(0) => {}
            Ok(n) => info!("Rotated out {} rate snapshots", n),
            Err(e) => warn!("Rate history rotation failed: {}", e),
        }
    }
}
