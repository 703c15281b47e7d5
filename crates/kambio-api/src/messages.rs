use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use kambio_db::models::{MessageRow, NotificationRow, UserRow};
use kambio_db::now_str;
use kambio_types::api::{
    ChatSummary, Claims, LatestUnread, MessageResponse, SendMessageRequest, UnreadCountResponse,
};
use kambio_types::models::ListingStatus;

use crate::auth::AppState;
use crate::convert::{message_response, parse_ts, parse_uuid};

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.recipient_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let listing = state
        .db
        .get_listing(&req.listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if listing.status != ListingStatus::Active.as_str() {
        return Err(StatusCode::CONFLICT);
    }

    // Every thread has the listing owner on one side.
    let sender_id = claims.sub.to_string();
    let recipient_id = req.recipient_id.to_string();
    if listing.user_id != sender_id && listing.user_id != recipient_id {
        return Err(StatusCode::FORBIDDEN);
    }

    let recipient = state
        .db
        .get_user_by_id(&recipient_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let sender = state
        .db
        .get_user_by_id(&sender_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // A block in either direction kills the thread.
    if recipient.blocked_users.iter().any(|b| *b == sender_id)
        || sender.blocked_users.iter().any(|b| *b == recipient_id)
    {
        return Err(StatusCode::FORBIDDEN);
    }

    let message = MessageRow {
        id: Uuid::new_v4().to_string(),
        listing_id: req.listing_id.to_string(),
        sender_id,
        sender_username: claims.username.clone(),
        recipient_id: recipient_id.clone(),
        content,
        read: false,
        timestamp: now_str(),
        deleted_by: vec![],
    };

    // Run blocking DB writes off the async runtime
    let db = state.db.clone();
    let stored = message.clone();
    let notify = NotificationRow {
        id: Uuid::new_v4().to_string(),
        user_id: recipient_id,
        kind: "message".to_string(),
        content: format!("New message from {}", claims.username),
        read: false,
        created_at: now_str(),
    };
    tokio::task::spawn_blocking(move || {
        db.insert_message(&stored)?;
        db.insert_notification(&notify)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(message_response(&message))))
}

/// Fetch a thread and mark the other side's messages as read.
pub async fn get_thread(
    State(state): State<AppState>,
    Path((listing_id, other_user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let viewer = claims.sub.to_string();
    let other = other_user_id.to_string();
    let lid = listing_id.to_string();

    let rows = state
        .db
        .thread(&lid, &viewer, &other)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .db
        .mark_thread_read(&lid, &viewer, &other)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<MessageResponse> = rows.iter().map(message_response).collect();
    Ok(Json(messages))
}

/// Inbox overview: one entry per (listing, counterpart) pair.
pub async fn chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let viewer = claims.sub.to_string();

    // Run blocking DB reads off the async runtime
    let db = state.db.clone();
    let viewer_clone = viewer.clone();
    let rows = tokio::task::spawn_blocking(move || db.messages_involving(&viewer_clone))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut summaries = summarize_chats(&viewer, &rows);

    // Threads whose last message is the viewer's own carry no counterpart
    // name yet; look those up in one batched read.
    let missing: Vec<String> = summaries
        .iter()
        .filter(|s| s.other_username.is_empty())
        .map(|s| s.other_user_id.to_string())
        .collect();
    if !missing.is_empty() {
        let counterparts = state
            .db
            .users_by_ids(&missing)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        fill_missing_usernames(&mut summaries, &counterparts);
    }

    // Attach the traded pair so the inbox can label each thread.
    for summary in &mut summaries {
        if let Some(listing) = state
            .db
            .get_listing(&summary.listing_id.to_string())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            summary.listing_from_currency = Some(listing.from_currency);
            summary.listing_to_currency = Some(listing.to_currency);
        }
    }

    Ok(Json(summaries))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let viewer = claims.sub.to_string();
    let count = state
        .db
        .unread_count(&viewer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let latest = state
        .db
        .latest_unread(&viewer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(UnreadCountResponse {
        unread_count: count,
        latest_unread: latest.map(|m| LatestUnread {
            listing_id: parse_uuid(&m.listing_id, "message listing_id"),
            sender_id: parse_uuid(&m.sender_id, "message sender_id"),
        }),
    }))
}

/// Hide one message for the caller. The counterpart keeps their copy.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let viewer = claims.sub.to_string();
    let message = state
        .db
        .get_message(&message_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if message.sender_id != viewer && message.recipient_id != viewer {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .soft_delete_message(&message.id, &viewer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_thread(
    State(state): State<AppState>,
    Path((listing_id, other_user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    // Threads with the support team stay visible.
    let other = state
        .db
        .get_user_by_id(&other_user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if other.role == "admin" {
        return Err(StatusCode::FORBIDDEN);
    }

    let hidden = state
        .db
        .soft_delete_thread(
            &listing_id.to_string(),
            &claims.sub.to_string(),
            &other_user_id.to_string(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "hidden": hidden })))
}

/// Group a user's messages into per-(listing, counterpart) summaries,
/// newest thread first. Messages the viewer soft-deleted are skipped.
fn summarize_chats(viewer: &str, rows: &[MessageRow]) -> Vec<ChatSummary> {
    let mut threads: HashMap<(String, String), (MessageRow, i64)> = HashMap::new();

    for row in rows {
        if row.deleted_for(viewer) {
            continue;
        }
        let other = if row.sender_id == viewer {
            row.recipient_id.clone()
        } else {
            row.sender_id.clone()
        };
        let key = (row.listing_id.clone(), other);

        let entry = threads
            .entry(key)
            .or_insert_with(|| (row.clone(), 0));
        if row.timestamp >= entry.0.timestamp {
            entry.0 = row.clone();
        }
        if row.recipient_id == viewer && !row.read {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<ChatSummary> = threads
        .into_iter()
        .map(|((listing_id, other_id), (last, unread))| {
            let other_username = if last.sender_id == other_id {
                last.sender_username.clone()
            } else {
                // Last message is ours; the grouping key still names the peer.
                String::new()
            };
            ChatSummary {
                listing_id: parse_uuid(&listing_id, "listing id"),
                other_user_id: parse_uuid(&other_id, "user id"),
                other_username,
                listing_from_currency: None,
                listing_to_currency: None,
                last_message: last.content.clone(),
                last_message_time: parse_ts(&last.timestamp, "message timestamp"),
                unread_count: unread,
            }
        })
        .collect();

    summaries.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    summaries
}

fn fill_missing_usernames(summaries: &mut [ChatSummary], counterparts: &[UserRow]) {
    for summary in summaries.iter_mut().filter(|s| s.other_username.is_empty()) {
        if let Some(user) = counterparts
            .iter()
            .find(|u| u.id == summary.other_user_id.to_string())
        {
            summary.other_username = user.username.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, listing: &str, from: &str, to: &str, ts: &str, read: bool) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            listing_id: listing.to_string(),
            sender_id: from.to_string(),
            sender_username: format!("user-{from}"),
            recipient_id: to.to_string(),
            content: format!("msg {id}"),
            read,
            timestamp: ts.to_string(),
            deleted_by: vec![],
        }
    }

    #[test]
    fn chats_group_by_listing_and_counterpart() {
        let viewer = Uuid::new_v4().to_string();
        let peer_a = Uuid::new_v4().to_string();
        let peer_b = Uuid::new_v4().to_string();
        let l1 = Uuid::new_v4().to_string();
        let l2 = Uuid::new_v4().to_string();

        let rows = vec![
            msg("m1", &l1, &peer_a, &viewer, "2026-08-01T10:00:00+00:00", false),
            msg("m2", &l1, &viewer, &peer_a, "2026-08-01T11:00:00+00:00", true),
            msg("m3", &l2, &peer_b, &viewer, "2026-08-02T09:00:00+00:00", false),
        ];

        let summaries = summarize_chats(&viewer, &rows);
        assert_eq!(summaries.len(), 2);

        // Newest thread first.
        assert_eq!(summaries[0].other_user_id.to_string(), peer_b);
        assert_eq!(summaries[0].unread_count, 1);
        assert_eq!(summaries[1].last_message, "msg m2");
        assert_eq!(summaries[1].unread_count, 1);
    }

    #[test]
    fn counterpart_names_are_backfilled_when_the_viewer_spoke_last() {
        let viewer = Uuid::new_v4().to_string();
        let peer = Uuid::new_v4().to_string();
        let listing = Uuid::new_v4().to_string();

        // Viewer sent the last (and only) message, so the summary starts
        // without a counterpart name.
        let rows = vec![msg("m1", &listing, &viewer, &peer, "2026-08-01T10:00:00+00:00", true)];
        let mut summaries = summarize_chats(&viewer, &rows);
        assert_eq!(summaries[0].other_username, "");

        let counterpart = UserRow {
            id: peer.clone(),
            username: "esra".to_string(),
            email: "esra@example.com".to_string(),
            password: "hash".to_string(),
            country: "TR".to_string(),
            languages: vec![],
            role: "user".to_string(),
            member_number: "#K01000".to_string(),
            rating: 0.0,
            total_ratings: 0,
            last_seen: None,
            is_online: false,
            location_sharing_enabled: false,
            latitude: None,
            longitude: None,
            blocked_users: vec![],
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        };
        fill_missing_usernames(&mut summaries, &[counterpart]);
        assert_eq!(summaries[0].other_username, "esra");
    }

    #[test]
    fn soft_deleted_messages_are_excluded_from_summaries() {
        let viewer = Uuid::new_v4().to_string();
        let peer = Uuid::new_v4().to_string();
        let listing = Uuid::new_v4().to_string();

        let mut hidden = msg("m1", &listing, &peer, &viewer, "2026-08-01T10:00:00+00:00", false);
        hidden.deleted_by = vec![viewer.clone()];

        assert!(summarize_chats(&viewer, &[hidden.clone()]).is_empty());

        // The peer still sees the thread.
        let summaries = summarize_chats(&peer, &[hidden]);
        assert_eq!(summaries.len(), 1);
    }
}
