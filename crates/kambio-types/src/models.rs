use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Listing lifecycle. `Expired` and `Closed` listings reject new messages
/// and exchange initiations; only `Expired` listings can be republished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Expired,
    Archived,
    Closed,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Archived => "archived",
            Self::Closed => "closed",
        }
    }
}

impl std::str::FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "archived" => Ok(Self::Archived),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown listing status: {other}")),
        }
    }
}

/// Two-party handshake lifecycle. `Confirmed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Pending,
    Confirmed,
    Expired,
    Cancelled,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ExchangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown exchange status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Who authored a support message. System-generated messages (welcome,
/// auto-close, follow-up) use `Admin` with the reserved "system" sender id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    User,
    Admin,
}

/// A single message embedded in a support conversation. Stored as part of
/// the conversation's JSON message list, mirroring the document shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportMessage {
    pub id: Uuid,
    pub sender_id: String,
    pub sender_type: SenderKind,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl SupportMessage {
    pub fn from_user(user_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id: user_id.to_string(),
            sender_type: SenderKind::User,
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_admin(admin_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id: admin_id.to_string(),
            sender_type: SenderKind::Admin,
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id: "system".to_string(),
            sender_type: SenderKind::Admin,
            body: body.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_status_round_trips() {
        for s in ["active", "expired", "archived", "closed"] {
            let parsed: ListingStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("deleted".parse::<ListingStatus>().is_err());
    }

    #[test]
    fn system_messages_carry_admin_sender_type() {
        let msg = SupportMessage::system("hello");
        assert_eq!(msg.sender_id, "system");
        assert_eq!(msg.sender_type, SenderKind::Admin);
    }
}
