use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SupportMessage;

/// Events pushed over the support-desk WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SupportEvent {
    /// First contact (or reopening a closed conversation): the system greeting.
    Welcome { message: SupportMessage },

    /// Echo back to the author that their message was stored.
    MessageSent { message: SupportMessage },

    /// A user posted a support message (fanned out to all connected admins).
    NewUserMessage { user_id: Uuid, message: SupportMessage },

    /// An admin replied to the user's conversation.
    NewAdminMessage { message: SupportMessage },

    /// Typing indicators, in both directions.
    AdminTyping { typing: bool },
    UserTyping { user_id: Uuid, typing: bool },

    /// The conversation was auto-closed for inactivity.
    ConversationClosed { message: SupportMessage },

    /// Scheduled nudge for a conversation the desk hasn't answered.
    FollowUp { message: SupportMessage },

    /// The retention job dropped old messages from the conversation.
    MessagesPruned { count: usize },

    /// Reply to a client-level Ping.
    Pong,
}

/// Commands sent FROM client TO server over the support WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SupportCommand {
    /// Post a message into the caller's conversation.
    Message { body: String },

    /// Toggle the caller's typing indicator.
    Typing { typing: bool },

    /// Application-level keepalive; also refreshes last_activity.
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SupportEvent::UserTyping {
            user_id: Uuid::nil(),
            typing: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"UserTyping""#));

        let back: SupportEvent = serde_json::from_str(&json).unwrap();
        match back {
            SupportEvent::UserTyping { typing, .. } => assert!(typing),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn commands_parse_from_client_json() {
        let cmd: SupportCommand =
            serde_json::from_str(r#"{"type":"Message","data":{"body":"hi"}}"#).unwrap();
        match cmd {
            SupportCommand::Message { body } => assert_eq!(body, "hi"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
