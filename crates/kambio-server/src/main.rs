mod jobs;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use kambio_api::auth::{self, AppState, AppStateInner};
use kambio_api::middleware::{require_admin, require_auth};
use kambio_api::{admin, exchanges, listings, messages, notifications, rates, ratings, reports, support, users};
use kambio_gateway::connection;
use kambio_gateway::registry::SupportRegistry;
use kambio_types::api::Claims;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kambio=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("KAMBIO_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("KAMBIO_DB_PATH").unwrap_or_else(|_| "kambio.db".into());
    let host = std::env::var("KAMBIO_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("KAMBIO_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let admin_email = std::env::var("KAMBIO_ADMIN_EMAIL").ok();

    // Init database
    let db = Arc::new(kambio_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = SupportRegistry::new();
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        registry: registry.clone(),
        admin_email,
    });

    // Background jobs: listing/exchange expiry, support desk housekeeping,
    // rate history retention.
    jobs::spawn_all(db.clone(), registry.clone());

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/rates", get(rates::current_rates))
        .route("/rates/convert", get(rates::convert))
        .route("/rates/history", get(rates::rate_history))
        .route("/rates/changes", get(rates::rate_changes))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users/me", get(users::get_me))
        .route("/users/me", delete(users::delete_account))
        .route("/users/me/location-sharing", put(users::set_location_sharing))
        .route("/users/blocked", get(users::blocked_users))
        .route("/users/locations", get(users::peer_locations))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}/status", get(users::user_status))
        .route("/users/{user_id}/stats", get(users::user_stats))
        .route("/users/{user_id}/ratings", get(ratings::user_ratings))
        .route("/users/{user_id}/block", post(users::block_user))
        .route("/users/{user_id}/block", delete(users::unblock_user))
        .route("/listings", post(listings::create_listing))
        .route("/listings", get(listings::list_listings))
        .route("/listings/my", get(listings::my_listings))
        .route("/listings/nearby", get(listings::nearby_listings))
        .route("/listings/{listing_id}", get(listings::get_listing))
        .route("/listings/{listing_id}", put(listings::update_listing))
        .route("/listings/{listing_id}", delete(listings::close_listing))
        .route("/listings/{listing_id}/republish", post(listings::republish_listing))
        .route("/messages", post(messages::send_message))
        .route("/messages/chats", get(messages::chats))
        .route("/messages/unread-count", get(messages::unread_count))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/messages/{listing_id}/{other_user_id}", get(messages::get_thread))
        .route("/messages/{listing_id}/{other_user_id}", delete(messages::delete_thread))
        .route("/exchanges", post(exchanges::initiate_exchange))
        .route("/exchanges", get(exchanges::my_exchanges))
        .route("/exchanges/{exchange_id}/confirm", post(exchanges::confirm_exchange))
        .route("/exchanges/{exchange_id}/cancel", post(exchanges::cancel_exchange))
        .route("/ratings", post(ratings::create_rating))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read))
        .route("/notifications/{notification_id}", delete(notifications::delete_notification))
        .route("/reports", post(reports::create_report))
        .route("/support/conversation", get(support::get_conversation))
        .route("/support/messages", post(support::send_message))
        .route("/support/read", post(support::mark_read))
        .route("/support/typing", post(support::set_typing))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{user_id}", delete(admin::delete_user))
        .route("/admin/listings", get(admin::list_listings))
        .route("/admin/listings/{listing_id}", delete(admin::remove_listing))
        .route("/admin/messages", get(admin::list_messages))
        .route("/admin/reports", get(admin::list_reports))
        .route("/admin/listings/{listing_id}/reports", get(admin::listing_reports))
        .route("/admin/chats", get(admin::list_chats))
        .route("/admin/rates", put(admin::publish_rates))
        .route("/admin/support", get(admin::list_conversations))
        .route("/admin/support/unread", get(admin::unread_conversations))
        .route("/admin/support/{user_id}", get(admin::get_conversation))
        .route("/admin/support/{user_id}/messages", post(admin::reply))
        .route("/admin/support/{user_id}/close", post(admin::close_conversation))
        .route("/admin/support/{user_id}/read", post(admin::mark_read))
        .route("/admin/support/{user_id}/typing", post(admin::set_typing))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws/support", get(ws_support_user))
        .route("/ws/support/admin", get(ws_support_admin))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Kambio server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsAuth {
    token: String,
}

/// WebSockets can't carry an Authorization header from browsers, so the JWT
/// rides in the query string and is validated before the upgrade.
fn authenticate_ws(state: &AppState, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

async fn ws_support_user(
    State(state): State<AppState>,
    Query(auth): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = authenticate_ws(&state, &auth.token).ok_or(StatusCode::UNAUTHORIZED)?;

    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_user_connection(
            socket,
            state.registry.clone(),
            state.db.clone(),
            claims.sub,
            user.username,
            user.email,
        )
    }))
}

async fn ws_support_admin(
    State(state): State<AppState>,
    Query(auth): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = authenticate_ws(&state, &auth.token).ok_or(StatusCode::UNAUTHORIZED)?;
    if !claims.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_admin_connection(
            socket,
            state.registry.clone(),
            claims.sub,
            claims.username,
        )
    }))
}
