use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::warn;
use uuid::Uuid;

use kambio_db::{Database, models::UserRow, now_str};
use kambio_gateway::registry::SupportRegistry;
use kambio_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use kambio_types::models::Role;

use crate::convert::user_profile;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub registry: SupportRegistry,
    /// Accounts registered with this email get the admin role.
    pub admin_email: Option<String>,
}

/// Usernames that would be confusing or abusable in chats and listings.
const RESERVED_USERNAMES: &[&str] = &[
    "admin",
    "administrator",
    "kambio",
    "moderator",
    "root",
    "support",
    "system",
];

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if let Err(reason) = validate_username(&req.username) {
        warn!("Rejected registration for '{}': {}", req.username, reason);
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if !req.email.contains('@') {
        return Err(StatusCode::BAD_REQUEST);
    }

    if state
        .db
        .username_taken(&req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    {
        return Err(StatusCode::CONFLICT);
    }
    if state
        .db
        .get_user_by_email(&req.email)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    let role = match &state.admin_email {
        Some(admin_email) if admin_email.eq_ignore_ascii_case(&req.email) => Role::Admin,
        _ => Role::User,
    };

    let member_number = state
        .db
        .next_member_number()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let user_id = Uuid::new_v4();
    let user = UserRow {
        id: user_id.to_string(),
        username: req.username.clone(),
        email: req.email,
        password: password_hash,
        country: req.country,
        languages: req.languages,
        role: role.as_str().to_string(),
        member_number,
        rating: 0.0,
        total_ratings: 0,
        last_seen: Some(now_str()),
        is_online: true,
        location_sharing_enabled: false,
        latitude: None,
        longitude: None,
        blocked_users: vec![],
        created_at: now_str(),
    };

    state
        .db
        .insert_user(&user)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, user_id, &req.username, role)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user_profile(&user),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state
        .db
        .get_user_by_email(&req.email)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    state
        .db
        .touch_seen(&user.id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let user_id: Uuid = user.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let role = user.role.parse::<Role>().unwrap_or(Role::User);

    let token = create_token(&state.jwt_secret, user_id, &user.username, role)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut profile = user_profile(&user);
    profile.is_online = true;

    Ok(Json(AuthResponse {
        token,
        user: profile,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Usernames are lowercase handles: 3-20 chars, a-z / 0-9 / underscore.
fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.len() < 3 || username.len() > 20 {
        return Err("must be 3-20 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err("only lowercase letters, digits and underscores allowed");
    }
    if RESERVED_USERNAMES.contains(&username) {
        return Err("reserved username");
    }
    // The brand name is off limits even as part of a handle.
    if username.contains("kambio") {
        return Err("reserved username");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(validate_username("alice_99").is_ok());
        assert!(validate_username("ab").is_err()); // too short
        assert!(validate_username("Alice").is_err()); // uppercase
        assert!(validate_username("alice!").is_err()); // punctuation
        assert!(validate_username("admin").is_err()); // reserved
        assert!(validate_username("kambio_fan").is_err()); // brand substring
        assert!(validate_username("thekambio1").is_err());
        assert!(validate_username(&"a".repeat(21)).is_err()); // too long
    }
}
