use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use kambio_db::models::{MessageRow, NotificationRow, RateSnapshotRow};
use kambio_db::now_str;
use kambio_types::api::{
    AdminChatSummary, Claims, PublishRatesRequest, RateSnapshotResponse, RemoveListingRequest,
    ReportResponse, SupportConversationResponse, SupportMessageRequest, TypingRequest,
    UserProfile,
};
use kambio_types::events::SupportEvent;
use kambio_types::models::SupportMessage;

use crate::auth::AppState;
use crate::convert::{
    conversation_response, listing_response, message_response, parse_ts, parse_uuid,
    report_response, user_profile,
};

const CLOSED_BY_ADMIN_TEXT: &str = "This conversation has been closed by our support team.";

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_users()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let users: Vec<UserProfile> = rows.iter().map(user_profile).collect();
    Ok(Json(users))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if user_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let deleted = state
        .db
        .delete_user_cascade(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_listings(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_all_listings()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let listings: Vec<_> = rows.iter().map(listing_response).collect();
    Ok(Json(listings))
}

/// Moderation takedown: removes the listing, tells the owner why, and
/// settles any open reports against it.
pub async fn remove_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<RemoveListingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let lid = listing_id.to_string();
    let listing = state
        .db
        .get_listing(&lid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let reason = req
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "a violation of our guidelines".to_string());

    state
        .db
        .insert_notification(&NotificationRow {
            id: Uuid::new_v4().to_string(),
            user_id: listing.user_id.clone(),
            kind: "moderation".to_string(),
            content: format!(
                "Your {} -> {} listing was removed: {}",
                listing.from_currency, listing.to_currency, reason
            ),
            read: false,
            created_at: now_str(),
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .db
        .resolve_reports_for_listing(&lid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .db
        .delete_listing(&lid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_reports(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_reports()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let reports: Vec<ReportResponse> = rows.iter().map(report_response).collect();
    Ok(Json(reports))
}

pub async fn listing_reports(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .reports_for_listing(&listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let reports: Vec<ReportResponse> = rows.iter().map(report_response).collect();
    Ok(Json(reports))
}

/// Raw message log, soft-deleted messages included.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_all_messages()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<_> = rows.iter().map(message_response).collect();
    Ok(Json(messages))
}

/// Every marketplace thread, soft-deleted messages included. Moderation
/// needs the full picture.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_all_messages()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(summarize_all_chats(&rows)))
}

pub async fn publish_rates(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<PublishRatesRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.base.is_empty() || req.rates.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.rates.values().any(|r| *r <= 0.0) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let snapshot = RateSnapshotRow {
        id: Uuid::new_v4().to_string(),
        base: req.base.clone(),
        rates: req.rates.clone(),
        recorded_at: now_str(),
    };

    state
        .db
        .insert_rate_snapshot(&snapshot)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(RateSnapshotResponse {
            base: snapshot.base,
            rates: snapshot.rates,
            recorded_at: parse_ts(&snapshot.recorded_at, "snapshot recorded_at"),
        }),
    ))
}

// -- Support desk --

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_conversations()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let conversations: Vec<SupportConversationResponse> =
        rows.iter().map(conversation_response).collect();
    Ok(Json(conversations))
}

pub async fn unread_conversations(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let count = state
        .db
        .unread_conversation_count()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "unread_conversations": count })))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let conversation = state
        .db
        .conversation_by_user(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(conversation_response(&conversation)))
}

/// Reply into a user's conversation and push it to their socket.
pub async fn reply(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SupportMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let body = req.message.trim();
    if body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let uid = user_id.to_string();
    if state
        .db
        .conversation_by_user(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    let message = SupportMessage::from_admin(claims.sub, body);
    state
        .db
        .append_admin_message(&uid, &message)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .db
        .mark_support_read_by_admin(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .registry
        .send_to_user(user_id, SupportEvent::NewAdminMessage { message: message.clone() })
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn close_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = user_id.to_string();
    let conversation = state
        .db
        .conversation_by_user(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if conversation.status == "closed" {
        return Err(StatusCode::CONFLICT);
    }

    let closing = SupportMessage::system(CLOSED_BY_ADMIN_TEXT);
    state
        .db
        .close_conversation(&uid, &closing)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .registry
        .send_to_user(user_id, SupportEvent::ConversationClosed { message: closing })
        .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .db
        .mark_support_read_by_admin(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_typing(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<TypingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .db
        .set_support_typing(&user_id.to_string(), true, req.typing)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .registry
        .send_to_user(user_id, SupportEvent::AdminTyping { typing: req.typing })
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Group the whole message table into per-(listing, pair) summaries,
/// newest first.
fn summarize_all_chats(rows: &[MessageRow]) -> Vec<AdminChatSummary> {
    // Key the pair in a stable order so both directions collapse together.
    let mut threads: HashMap<(String, String, String), (MessageRow, i64, Vec<String>)> =
        HashMap::new();

    for row in rows {
        let (a, b) = if row.sender_id <= row.recipient_id {
            (row.sender_id.clone(), row.recipient_id.clone())
        } else {
            (row.recipient_id.clone(), row.sender_id.clone())
        };
        let entry = threads
            .entry((row.listing_id.clone(), a, b))
            .or_insert_with(|| (row.clone(), 0, vec![]));

        if row.timestamp >= entry.0.timestamp {
            entry.0 = row.clone();
        }
        entry.1 += 1;
        for viewer in &row.deleted_by {
            if !entry.2.contains(viewer) {
                entry.2.push(viewer.clone());
            }
        }
    }

    let mut summaries: Vec<AdminChatSummary> = threads
        .into_iter()
        .map(|((listing_id, user1, user2), (last, total, deleted_by))| AdminChatSummary {
            listing_id: parse_uuid(&listing_id, "listing id"),
            user1_id: parse_uuid(&user1, "user id"),
            user2_id: parse_uuid(&user2, "user id"),
            last_message: last.content.clone(),
            last_message_time: parse_ts(&last.timestamp, "message timestamp"),
            total_messages: total,
            deleted_by: deleted_by
                .iter()
                .map(|id| parse_uuid(id, "user id"))
                .collect(),
        })
        .collect();

    summaries.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(listing: &str, from: &str, to: &str, ts: &str, deleted_by: Vec<String>) -> MessageRow {
        MessageRow {
            id: Uuid::new_v4().to_string(),
            listing_id: listing.to_string(),
            sender_id: from.to_string(),
            sender_username: "x".into(),
            recipient_id: to.to_string(),
            content: format!("at {ts}"),
            read: false,
            timestamp: ts.to_string(),
            deleted_by,
        }
    }

    #[test]
    fn both_directions_collapse_into_one_thread() {
        let l = Uuid::new_v4().to_string();
        let u1 = Uuid::new_v4().to_string();
        let u2 = Uuid::new_v4().to_string();

        let rows = vec![
            msg(&l, &u1, &u2, "2026-08-01T10:00:00+00:00", vec![]),
            msg(&l, &u2, &u1, "2026-08-01T11:00:00+00:00", vec![u1.clone()]),
        ];

        let summaries = summarize_all_chats(&rows);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_messages, 2);
        assert_eq!(summaries[0].last_message, "at 2026-08-01T11:00:00+00:00");
        assert_eq!(summaries[0].deleted_by.len(), 1);
    }
}
