use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use kambio_gateway::connection::{REOPEN_TEXT, ensure_conversation};
use kambio_types::api::{Claims, SupportMessageRequest, TypingRequest};
use kambio_types::events::SupportEvent;
use kambio_types::models::SupportMessage;

use crate::auth::AppState;
use crate::convert::conversation_response;

/// Fetch the caller's support conversation, creating it on first contact.
/// Reading it clears the caller's unread counter.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = claims.sub.to_string();
    let user = state
        .db
        .get_user_by_id(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    ensure_conversation(&state.db, claims.sub, &user.username, &user.email)
        .map_err(|e| { error!("Failed to open conversation: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    state
        .db
        .mark_support_read_by_user(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let conversation = state
        .db
        .conversation_by_user(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(conversation_response(&conversation)))
}

/// REST fallback for posting a support message; mirrors the WebSocket
/// Message command, including the reopen flow.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SupportMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let body = req.message.trim();
    if body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let uid = claims.sub.to_string();
    let user = state
        .db
        .get_user_by_id(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    ensure_conversation(&state.db, claims.sub, &user.username, &user.email)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let was_closed = state
        .db
        .conversation_by_user(&uid)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(|c| c.status == "closed")
        .unwrap_or(false);

    let message = SupportMessage::from_user(claims.sub, body);
    state
        .db
        .append_user_message(&uid, &message)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if was_closed {
        let reopen = SupportMessage::system(REOPEN_TEXT);
        state
            .db
            .append_system_message(&uid, &reopen)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        state
            .registry
            .send_to_user(claims.sub, SupportEvent::Welcome { message: reopen })
            .await;
    }

    state
        .registry
        .broadcast_to_admins(SupportEvent::NewUserMessage {
            user_id: claims.sub,
            message: message.clone(),
        })
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .db
        .mark_support_read_by_user(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_typing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TypingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .db
        .set_support_typing(&claims.sub.to_string(), false, req.typing)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .registry
        .broadcast_to_admins(SupportEvent::UserTyping {
            user_id: claims.sub,
            typing: req.typing,
        })
        .await;

    Ok(StatusCode::NO_CONTENT)
}
