use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use kambio_types::api::{
    BlockedUser, Claims, LocationSharingRequest, PeerLocation, UserStatsResponse,
    UserStatusResponse,
};
use kambio_types::models::ListingStatus;

use crate::auth::AppState;
use crate::convert::{parse_ts, parse_uuid, user_profile};

/// A user counts as online if their last authenticated request was recent.
const PRESENCE_WINDOW_MINUTES: i64 = 5;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(user_profile(&user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state
        .db
        .get_user_by_id(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(user_profile(&user)))
}

pub async fn user_status(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state
        .db
        .get_user_by_id(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let last_seen = user.last_seen.as_deref().map(|ts| parse_ts(ts, "last_seen"));
    // A live support socket or a recent authenticated request both count.
    let is_online = state.registry.user_connected(user_id).await
        || last_seen
            .map(|ts| Utc::now() - ts < Duration::minutes(PRESENCE_WINDOW_MINUTES))
            .unwrap_or(false);

    Ok(Json(UserStatusResponse {
        user_id,
        username: user.username,
        is_online,
        last_seen,
    }))
}

pub async fn user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = user_id.to_string();
    let user = state
        .db
        .get_user_by_id(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let total_listings = state
        .db
        .count_listings_by_user(&uid, None)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let active_listings = state
        .db
        .count_listings_by_user(&uid, Some(ListingStatus::Active.as_str()))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let messages_sent = state
        .db
        .count_messages_sent(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(UserStatsResponse {
        total_listings,
        active_listings,
        messages_sent,
        total_ratings: user.total_ratings,
        average_rating: user.rating,
    }))
}

pub async fn set_location_sharing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LocationSharingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.enabled && (req.latitude.is_none() || req.longitude.is_none()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .db
        .set_location_sharing(&claims.sub.to_string(), req.enabled, req.latitude, req.longitude)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "enabled": req.enabled })))
}

/// Locations of chat partners who share theirs, for the meetup map.
pub async fn peer_locations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = claims.sub.to_string();
    let messages = state
        .db
        .messages_involving(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut peer_ids: Vec<String> = messages
        .iter()
        .map(|m| {
            if m.sender_id == uid {
                m.recipient_id.clone()
            } else {
                m.sender_id.clone()
            }
        })
        .collect();
    peer_ids.sort();
    peer_ids.dedup();

    let peers = state
        .db
        .users_by_ids(&peer_ids)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let locations: Vec<PeerLocation> = peers
        .iter()
        .filter(|u| u.location_sharing_enabled)
        .filter_map(|u| {
            Some(PeerLocation {
                user_id: parse_uuid(&u.id, "user id"),
                username: u.username.clone(),
                latitude: u.latitude?,
                longitude: u.longitude?,
            })
        })
        .collect();

    Ok(Json(locations))
}

pub async fn block_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if user_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }
    if state
        .db
        .get_user_by_id(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    let blocked = state
        .db
        .block_user(&claims.sub.to_string(), &user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "blocked": blocked })))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let unblocked = state
        .db
        .unblock_user(&claims.sub.to_string(), &user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !unblocked {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(serde_json::json!({ "blocked": false })))
}

pub async fn blocked_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let blocked = state
        .db
        .users_by_ids(&user.blocked_users)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let response: Vec<BlockedUser> = blocked
        .iter()
        .map(|u| BlockedUser {
            id: parse_uuid(&u.id, "user id"),
            username: u.username.clone(),
        })
        .collect();

    Ok(Json(response))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let deleted = state
        .db
        .delete_user_cascade(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}
