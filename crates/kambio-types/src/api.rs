use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationStatus, ExchangeStatus, ListingStatus, Role, SupportMessage};

// -- JWT Claims --

/// JWT claims shared across kambio-api (REST middleware) and kambio-gateway
/// (WebSocket authentication). Canonical definition lives here in kambio-types
/// to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub country: String,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub country: String,
    pub languages: Vec<String>,
    pub role: Role,
    pub member_number: String,
    pub rating: f64,
    pub total_ratings: i64,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub location_sharing_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_location: Option<GeoPoint>,
    pub blocked_users: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UserStatusResponse {
    pub user_id: Uuid,
    pub username: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UserStatsResponse {
    pub total_listings: i64,
    pub active_listings: i64,
    pub messages_sent: i64,
    pub total_ratings: i64,
    pub average_rating: f64,
}

#[derive(Debug, Deserialize)]
pub struct LocationSharingRequest {
    pub enabled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct BlockedUser {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct PeerLocation {
    pub user_id: Uuid,
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
}

// -- Listings --

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub from_currency: String,
    pub from_amount: f64,
    pub to_currency: String,
    pub to_amount: Option<f64>,
    pub country: String,
    pub city: String,
    pub description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub from_currency: String,
    pub from_amount: f64,
    pub to_currency: String,
    pub to_amount: Option<f64>,
    pub country: String,
    pub city: String,
    pub description: String,
    pub status: ListingStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Only set on nearby queries, in kilometers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Only set on my-listings queries, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub country: Option<String>,
    pub from_currency: Option<String>,
    pub to_currency: Option<String>,
    #[serde(default = "ListingQuery::default_status")]
    pub status: ListingStatus,
}

impl ListingQuery {
    fn default_status() -> ListingStatus {
        ListingStatus::Active
    }
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "NearbyQuery::default_radius")]
    pub radius: f64,
}

impl NearbyQuery {
    fn default_radius() -> f64 {
        75.0
    }
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub listing_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub recipient_id: Uuid,
    pub content: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ChatSummary {
    pub listing_id: Uuid,
    pub other_user_id: Uuid,
    pub other_username: String,
    pub listing_from_currency: Option<String>,
    pub listing_to_currency: Option<String>,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct LatestUnread {
    pub listing_id: Uuid,
    pub sender_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
    pub latest_unread: Option<LatestUnread>,
}

// -- Exchange confirmations --

#[derive(Debug, Deserialize)]
pub struct InitiateExchangeRequest {
    pub listing_id: Uuid,
    pub other_user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ListingSummary {
    pub from_currency: String,
    pub from_amount: f64,
    pub to_currency: String,
    pub to_amount: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub user1_confirmed: bool,
    pub user2_confirmed: bool,
    pub initiated_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: ExchangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmExchangeResponse {
    pub status: ExchangeStatus,
}

// -- Ratings --

#[derive(Debug, Deserialize)]
pub struct CreateRatingRequest {
    pub rated_user_id: Uuid,
    pub listing_id: Uuid,
    pub rating: i64,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RatingResponse {
    pub id: Uuid,
    pub rated_user_id: Uuid,
    pub rater_id: Uuid,
    pub rater_username: String,
    pub listing_id: Uuid,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// -- Reports --

#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub listing_id: Uuid,
    pub reason: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub reporter_id: Uuid,
    pub reporter_username: String,
    pub reason: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// -- Admin --

#[derive(Debug, Deserialize)]
pub struct RemoveListingRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminChatSummary {
    pub listing_id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub total_messages: i64,
    pub deleted_by: Vec<Uuid>,
}

// -- Support --

#[derive(Debug, Deserialize)]
pub struct SupportMessageRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub typing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportConversationResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub messages: Vec<SupportMessage>,
    pub status: ConversationStatus,
    pub unread_admin: i64,
    pub unread_user: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_typing_user: bool,
    pub is_typing_admin: bool,
}

// -- Exchange rates --

#[derive(Debug, Deserialize)]
pub struct PublishRatesRequest {
    pub base: String,
    pub rates: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct RateSnapshotResponse {
    pub base: String,
    pub rates: HashMap<String, f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    pub amount: f64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub amount: f64,
    pub from: String,
    pub to: String,
    pub converted_amount: f64,
    pub rate: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RateHistoryQuery {
    pub currency: String,
    #[serde(default = "RateHistoryQuery::default_days")]
    pub days: i64,
}

impl RateHistoryQuery {
    fn default_days() -> i64 {
        7
    }
}

#[derive(Debug, Serialize)]
pub struct RatePoint {
    pub recorded_at: DateTime<Utc>,
    pub rate: f64,
}

#[derive(Debug, Serialize)]
pub struct RateHistoryResponse {
    pub currency: String,
    pub base: String,
    pub days: i64,
    pub points: Vec<RatePoint>,
    pub change_percentage: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Self::Up
        } else if change < 0.0 {
            Self::Down
        } else {
            Self::Stable
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RateChangesQuery {
    pub currencies: String,
}

#[derive(Debug, Serialize)]
pub struct RateChange {
    pub current_rate: f64,
    pub change_percentage: f64,
    pub trend: Trend,
}

#[derive(Debug, Serialize)]
pub struct RateChangesResponse {
    pub base: String,
    pub changes: HashMap<String, RateChange>,
    pub recorded_at: DateTime<Utc>,
}
