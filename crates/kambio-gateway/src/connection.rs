use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use kambio_db::models::ConversationRow;
use kambio_db::{Database, now_str};
use kambio_types::events::{SupportCommand, SupportEvent};
use kambio_types::models::SupportMessage;

use crate::registry::SupportRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub const WELCOME_TEXT: &str =
    "Welcome to Kambio support! Describe your issue and our team will get back to you shortly.";
pub const REOPEN_TEXT: &str = "This conversation has been reopened. How can we help?";

/// Handle a pre-authenticated user WebSocket on their own support
/// conversation. The JWT was validated at the HTTP upgrade layer.
pub async fn handle_user_connection(
    socket: WebSocket,
    registry: SupportRegistry,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
    email: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to support", username, user_id);

    // First contact creates the conversation with a system greeting.
    let greeting = match ensure_conversation(&db, user_id, &username, &email) {
        Ok(greeting) => greeting,
        Err(e) => {
            warn!("Failed to open conversation for {}: {}", user_id, e);
            return;
        }
    };
    if let Some(message) = greeting {
        let welcome = SupportEvent::Welcome { message };
        if send_event(&mut sender, &welcome).await.is_err() {
            return;
        }
    }

    let (conn_id, mut user_rx) = registry.register_user(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let registry_recv = registry.clone();
    let db_recv = db.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<SupportCommand>(&text) {
                    Ok(cmd) => {
                        handle_user_command(&registry_recv, &db_recv, user_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            truncate_for_log(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister_user(user_id, conn_id).await;

    // Leave no stuck typing indicator behind.
    if let Err(e) = db.set_support_typing(&user_id.to_string(), false, false) {
        warn!("Failed to clear typing flag for {}: {}", user_id, e);
    }
    if let Err(e) = db.set_online(&user_id.to_string(), false) {
        warn!("Failed to clear online flag for {}: {}", user_id, e);
    }
    registry
        .broadcast_to_admins(SupportEvent::UserTyping {
            user_id,
            typing: false,
        })
        .await;

    info!("{} ({}) disconnected from support", username, user_id);
}

/// Admin sockets watch the whole desk: they receive every user message and
/// typing indicator. Replies go through the REST admin endpoints.
pub async fn handle_admin_connection(
    socket: WebSocket,
    registry: SupportRegistry,
    admin_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("admin {} ({}) connected to support desk", username, admin_id);

    let (conn_id, mut admin_rx) = registry.register_admin(admin_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = admin_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let registry_recv = registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(SupportCommand::Ping) = serde_json::from_str::<SupportCommand>(&text) {
                        registry_recv
                            .send_to_admin(admin_id, SupportEvent::Pong)
                            .await;
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister_admin(admin_id, conn_id).await;
    info!("admin {} ({}) disconnected from support desk", username, admin_id);
}

async fn handle_user_command(
    registry: &SupportRegistry,
    db: &Database,
    user_id: Uuid,
    cmd: SupportCommand,
) {
    let uid = user_id.to_string();
    match cmd {
        SupportCommand::Message { body } => {
            let body = body.trim();
            if body.is_empty() {
                return;
            }

            let was_closed = match db.conversation_by_user(&uid) {
                Ok(Some(c)) => c.status == "closed",
                Ok(None) => false,
                Err(e) => {
                    warn!("Support lookup failed for {}: {}", user_id, e);
                    return;
                }
            };

            let message = SupportMessage::from_user(user_id, body);
            if let Err(e) = db.append_user_message(&uid, &message) {
                warn!("Failed to store support message from {}: {}", user_id, e);
                return;
            }

            if was_closed {
                let reopen = SupportMessage::system(REOPEN_TEXT);
                if let Err(e) = db.append_system_message(&uid, &reopen) {
                    warn!("Failed to store reopen notice for {}: {}", user_id, e);
                } else {
                    registry
                        .send_to_user(user_id, SupportEvent::Welcome { message: reopen })
                        .await;
                }
            }

            registry
                .send_to_user(user_id, SupportEvent::MessageSent { message: message.clone() })
                .await;
            registry
                .broadcast_to_admins(SupportEvent::NewUserMessage { user_id, message })
                .await;
        }

        SupportCommand::Typing { typing } => {
            if let Err(e) = db.set_support_typing(&uid, false, typing) {
                warn!("Failed to set typing flag for {}: {}", user_id, e);
                return;
            }
            registry
                .broadcast_to_admins(SupportEvent::UserTyping { user_id, typing })
                .await;
        }

        SupportCommand::Ping => {
            // Application-level keepalive counts as activity for the idle timer.
            if let Err(e) = db.touch_support_activity(&uid) {
                warn!("Failed to refresh activity for {}: {}", user_id, e);
            }
            registry.send_to_user(user_id, SupportEvent::Pong).await;
        }
    }
}

/// Create the conversation on first contact. Returns the greeting to push,
/// if one was just written. Shared with the REST support endpoints.
pub fn ensure_conversation(
    db: &Database,
    user_id: Uuid,
    username: &str,
    email: &str,
) -> anyhow::Result<Option<SupportMessage>> {
    let uid = user_id.to_string();
    if db.conversation_by_user(&uid)?.is_some() {
        return Ok(None);
    }

    let greeting = SupportMessage::system(WELCOME_TEXT);
    let now = now_str();
    db.insert_conversation(&ConversationRow {
        id: Uuid::new_v4().to_string(),
        user_id: uid,
        user_name: username.to_string(),
        user_email: email.to_string(),
        messages: vec![greeting.clone()],
        status: "open".to_string(),
        unread_admin: 0,
        unread_user: 1,
        created_at: now.clone(),
        updated_at: now.clone(),
        last_activity: now,
        is_typing_user: false,
        is_typing_admin: false,
    })?;
    Ok(Some(greeting))
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &SupportEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}

/// Cap rejected frames in the log, backing off to a char boundary so
/// multi-byte input cannot panic the slice.
fn truncate_for_log(text: &str) -> &str {
    if text.len() <= 200 {
        return text;
    }
    let mut end = 200;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_truncation_respects_char_boundaries() {
        let short = "hello";
        assert_eq!(truncate_for_log(short), short);

        // 67 three-byte chars = 201 bytes; byte 200 lands mid-char, so the
        // cut has to back off to byte 198.
        let multibyte = "€".repeat(67);
        let cut = truncate_for_log(&multibyte);
        assert_eq!(cut.len(), 198);
        assert_eq!(cut.chars().count(), 66);
    }
}
