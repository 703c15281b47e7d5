//! Row -> API response mapping. DB rows carry ids and timestamps as strings;
//! corrupt values are logged and replaced with defaults rather than failing
//! the whole response.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use kambio_db::models::{
    ConversationRow, ExchangeRow, ListingRow, MessageRow, NotificationRow, RatingRow, ReportRow,
};
use kambio_types::api::{
    ExchangeResponse, GeoPoint, ListingResponse, MessageResponse, NotificationResponse,
    RatingResponse, ReportResponse, SupportConversationResponse, UserProfile,
};
use kambio_types::models::{ConversationStatus, ExchangeStatus, ListingStatus, Role};

pub fn parse_uuid(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", context, raw, e);
        Uuid::default()
    })
}

pub fn parse_ts(raw: &str, context: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", context, raw, e);
        DateTime::default()
    })
}

pub fn user_profile(row: &kambio_db::models::UserRow) -> UserProfile {
    let current_location = match (row.latitude, row.longitude) {
        (Some(latitude), Some(longitude)) if row.location_sharing_enabled => {
            Some(GeoPoint { latitude, longitude })
        }
        _ => None,
    };

    UserProfile {
        id: parse_uuid(&row.id, "user id"),
        username: row.username.clone(),
        email: row.email.clone(),
        country: row.country.clone(),
        languages: row.languages.clone(),
        role: row.role.parse::<Role>().unwrap_or(Role::User),
        member_number: row.member_number.clone(),
        rating: row.rating,
        total_ratings: row.total_ratings,
        last_seen: row.last_seen.as_deref().map(|ts| parse_ts(ts, "last_seen")),
        is_online: row.is_online,
        location_sharing_enabled: row.location_sharing_enabled,
        current_location,
        blocked_users: row
            .blocked_users
            .iter()
            .map(|id| parse_uuid(id, "blocked user id"))
            .collect(),
        created_at: parse_ts(&row.created_at, "user created_at"),
    }
}

pub fn listing_response(row: &ListingRow) -> ListingResponse {
    ListingResponse {
        id: parse_uuid(&row.id, "listing id"),
        user_id: parse_uuid(&row.user_id, "listing user_id"),
        username: row.username.clone(),
        from_currency: row.from_currency.clone(),
        from_amount: row.from_amount,
        to_currency: row.to_currency.clone(),
        to_amount: row.to_amount,
        country: row.country.clone(),
        city: row.city.clone(),
        description: row.description.clone(),
        status: row.status.parse::<ListingStatus>().unwrap_or_else(|e| {
            warn!("Corrupt listing status on '{}': {}", row.id, e);
            ListingStatus::Closed
        }),
        latitude: row.latitude,
        longitude: row.longitude,
        created_at: parse_ts(&row.created_at, "listing created_at"),
        expires_at: parse_ts(&row.expires_at, "listing expires_at"),
        distance: None,
        time_remaining: None,
    }
}

pub fn message_response(row: &MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "message id"),
        listing_id: parse_uuid(&row.listing_id, "message listing_id"),
        sender_id: parse_uuid(&row.sender_id, "message sender_id"),
        sender_username: row.sender_username.clone(),
        recipient_id: parse_uuid(&row.recipient_id, "message recipient_id"),
        content: row.content.clone(),
        read: row.read,
        timestamp: parse_ts(&row.timestamp, "message timestamp"),
    }
}

pub fn exchange_response(row: &ExchangeRow) -> ExchangeResponse {
    ExchangeResponse {
        id: parse_uuid(&row.id, "exchange id"),
        listing_id: parse_uuid(&row.listing_id, "exchange listing_id"),
        user1_id: parse_uuid(&row.user1_id, "exchange user1_id"),
        user2_id: parse_uuid(&row.user2_id, "exchange user2_id"),
        user1_confirmed: row.user1_confirmed,
        user2_confirmed: row.user2_confirmed,
        initiated_at: parse_ts(&row.initiated_at, "exchange initiated_at"),
        deadline: parse_ts(&row.deadline, "exchange deadline"),
        status: row.status.parse::<ExchangeStatus>().unwrap_or_else(|e| {
            warn!("Corrupt exchange status on '{}': {}", row.id, e);
            ExchangeStatus::Cancelled
        }),
        listing: None,
        other_username: None,
    }
}

pub fn rating_response(row: &RatingRow) -> RatingResponse {
    RatingResponse {
        id: parse_uuid(&row.id, "rating id"),
        rated_user_id: parse_uuid(&row.rated_user_id, "rating rated_user_id"),
        rater_id: parse_uuid(&row.rater_id, "rating rater_id"),
        rater_username: row.rater_username.clone(),
        listing_id: parse_uuid(&row.listing_id, "rating listing_id"),
        rating: row.rating,
        comment: row.comment.clone(),
        created_at: parse_ts(&row.created_at, "rating created_at"),
    }
}

pub fn notification_response(row: &NotificationRow) -> NotificationResponse {
    NotificationResponse {
        id: parse_uuid(&row.id, "notification id"),
        user_id: parse_uuid(&row.user_id, "notification user_id"),
        kind: row.kind.clone(),
        content: row.content.clone(),
        read: row.read,
        created_at: parse_ts(&row.created_at, "notification created_at"),
    }
}

pub fn report_response(row: &ReportRow) -> ReportResponse {
    ReportResponse {
        id: parse_uuid(&row.id, "report id"),
        listing_id: parse_uuid(&row.listing_id, "report listing_id"),
        reporter_id: parse_uuid(&row.reporter_id, "report reporter_id"),
        reporter_username: row.reporter_username.clone(),
        reason: row.reason.clone(),
        description: row.description.clone(),
        status: row.status.clone(),
        created_at: parse_ts(&row.created_at, "report created_at"),
    }
}

pub fn conversation_response(row: &ConversationRow) -> SupportConversationResponse {
    SupportConversationResponse {
        id: parse_uuid(&row.id, "conversation id"),
        user_id: parse_uuid(&row.user_id, "conversation user_id"),
        user_name: row.user_name.clone(),
        user_email: row.user_email.clone(),
        messages: row.messages.clone(),
        status: if row.status == "closed" {
            ConversationStatus::Closed
        } else {
            ConversationStatus::Open
        },
        unread_admin: row.unread_admin,
        unread_user: row.unread_user,
        created_at: parse_ts(&row.created_at, "conversation created_at"),
        updated_at: parse_ts(&row.updated_at, "conversation updated_at"),
        last_activity: parse_ts(&row.last_activity, "conversation last_activity"),
        is_typing_user: row.is_typing_user,
        is_typing_admin: row.is_typing_admin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_values_fall_back_to_defaults() {
        assert_eq!(parse_uuid("not-a-uuid", "test"), Uuid::default());
        assert_eq!(parse_ts("not-a-time", "test"), DateTime::<Utc>::default());

        let valid = Uuid::new_v4();
        assert_eq!(parse_uuid(&valid.to_string(), "test"), valid);
    }

    #[test]
    fn location_is_withheld_unless_sharing_is_on() {
        let mut row = kambio_db::models::UserRow {
            id: Uuid::new_v4().to_string(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: "hash".into(),
            country: "Turkey".into(),
            languages: vec![],
            role: "user".into(),
            member_number: "#K01000".into(),
            rating: 0.0,
            total_ratings: 0,
            last_seen: None,
            is_online: false,
            location_sharing_enabled: false,
            latitude: Some(41.0),
            longitude: Some(29.0),
            blocked_users: vec![],
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        assert!(user_profile(&row).current_location.is_none());

        row.location_sharing_enabled = true;
        let profile = user_profile(&row);
        assert_eq!(profile.current_location.unwrap().latitude, 41.0);
    }
}
