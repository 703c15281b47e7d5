//! Database row types — these map directly to SQLite rows.
//! Distinct from kambio-types API models to keep the DB layer independent.
//! Timestamps stay RFC 3339 strings here; parsing happens at the API edge.

use kambio_types::models::SupportMessage;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub country: String,
    pub languages: Vec<String>,
    pub role: String,
    pub member_number: String,
    pub rating: f64,
    pub total_ratings: i64,
    pub last_seen: Option<String>,
    pub is_online: bool,
    pub location_sharing_enabled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub blocked_users: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ListingRow {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub from_currency: String,
    pub from_amount: f64,
    pub to_currency: String,
    pub to_amount: Option<f64>,
    pub country: String,
    pub city: String,
    pub description: String,
    pub status: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub listing_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub recipient_id: String,
    pub content: String,
    pub read: bool,
    pub timestamp: String,
    pub deleted_by: Vec<String>,
}

impl MessageRow {
    pub fn deleted_for(&self, user_id: &str) -> bool {
        self.deleted_by.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeRow {
    pub id: String,
    pub listing_id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub user1_confirmed: bool,
    pub user2_confirmed: bool,
    pub initiated_at: String,
    pub deadline: String,
    pub status: String,
}

impl ExchangeRow {
    pub fn involves(&self, user_id: &str) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }
}

#[derive(Debug, Clone)]
pub struct RatingRow {
    pub id: String,
    pub rated_user_id: String,
    pub rater_id: String,
    pub rater_username: String,
    pub listing_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub content: String,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub id: String,
    pub listing_id: String,
    pub reporter_id: String,
    pub reporter_username: String,
    pub reason: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub messages: Vec<SupportMessage>,
    pub status: String,
    pub unread_admin: i64,
    pub unread_user: i64,
    pub created_at: String,
    pub updated_at: String,
    pub last_activity: String,
    pub is_typing_user: bool,
    pub is_typing_admin: bool,
}

#[derive(Debug, Clone)]
pub struct RateSnapshotRow {
    pub id: String,
    pub base: String,
    pub rates: std::collections::HashMap<String, f64>,
    pub recorded_at: String,
}
