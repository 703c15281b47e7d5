use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use kambio_db::models::{ExchangeRow, NotificationRow};
use kambio_db::now_str;
use kambio_types::api::{
    Claims, ConfirmExchangeResponse, ExchangeResponse, InitiateExchangeRequest, ListingSummary,
};
use kambio_types::models::{ExchangeStatus, ListingStatus};

use crate::auth::AppState;
use crate::convert::exchange_response;

/// Both parties have 12 hours to confirm before the handshake lapses.
const EXCHANGE_TTL_HOURS: i64 = 12;

/// Start the dual-confirmation handshake on a listing. The listing owner is
/// always recorded as the first party, whichever side initiates.
pub async fn initiate_exchange(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<InitiateExchangeRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.other_user_id == claims.sub {
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

    let caller = claims.sub.to_string();
    let other = req.other_user_id.to_string();
    if listing.user_id != caller && listing.user_id != other {
        return Err(StatusCode::FORBIDDEN);
    }

    if state
        .db
        .get_user_by_id(&other)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    // One live handshake per pair: a pending or already confirmed row blocks
    // re-initiation, while other interested parties stay free to start theirs.
    if state
        .db
        .find_open_exchange(&listing.id, &caller, &other)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    let (user1, user2) = if listing.user_id == caller {
        (caller.clone(), other.clone())
    } else {
        (other.clone(), caller.clone())
    };

    let exchange = ExchangeRow {
        id: Uuid::new_v4().to_string(),
        listing_id: listing.id.clone(),
        user1_id: user1,
        user2_id: user2,
        user1_confirmed: false,
        user2_confirmed: false,
        initiated_at: now_str(),
        deadline: (Utc::now() + Duration::hours(EXCHANGE_TTL_HOURS)).to_rfc3339(),
        status: ExchangeStatus::Pending.as_str().to_string(),
    };

    state
        .db
        .insert_exchange(&exchange)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    notify(&state, &other, "exchange", &format!(
        "{} wants to confirm the {} -> {} exchange",
        claims.username, listing.from_currency, listing.to_currency
    ))?;

    Ok((StatusCode::CREATED, Json(exchange_response(&exchange))))
}

/// Flip the caller's confirmation flag. When both flags are set the exchange
/// settles as confirmed; the listing itself is untouched and runs out its
/// own lifecycle.
pub async fn confirm_exchange(
    State(state): State<AppState>,
    Path(exchange_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let exchange = state
        .db
        .get_exchange(&exchange_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let caller = claims.sub.to_string();
    if !exchange.involves(&caller) {
        return Err(StatusCode::FORBIDDEN);
    }
    if exchange.status != ExchangeStatus::Pending.as_str() {
        return Err(StatusCode::CONFLICT);
    }

    // The deadline may have passed between scheduler runs.
    if exchange.deadline < now_str() {
        state
            .db
            .set_exchange_status(&exchange.id, ExchangeStatus::Expired.as_str())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        return Err(StatusCode::CONFLICT);
    }

    // Flag update and both-confirmed settlement happen in one locked write;
    // the returned row is the post-update state, never a stale snapshot.
    let is_first_party = exchange.user1_id == caller;
    let updated = state
        .db
        .confirm_party(&exchange.id, is_first_party)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if updated.status != ExchangeStatus::Confirmed.as_str() {
        let counterpart = if is_first_party {
            &updated.user2_id
        } else {
            &updated.user1_id
        };
        notify(&state, counterpart, "exchange", &format!(
            "{} confirmed your exchange. Confirm it to complete the deal.",
            claims.username
        ))?;
        return Ok(Json(ConfirmExchangeResponse {
            status: ExchangeStatus::Pending,
        }));
    }

    for party in [&updated.user1_id, &updated.user2_id] {
        notify(&state, party, "exchange", "Exchange confirmed! You can now rate each other.")?;
    }

    Ok(Json(ConfirmExchangeResponse {
        status: ExchangeStatus::Confirmed,
    }))
}

pub async fn cancel_exchange(
    State(state): State<AppState>,
    Path(exchange_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let exchange = state
        .db
        .get_exchange(&exchange_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let caller = claims.sub.to_string();
    if !exchange.involves(&caller) {
        return Err(StatusCode::FORBIDDEN);
    }
    if exchange.status != ExchangeStatus::Pending.as_str() {
        return Err(StatusCode::CONFLICT);
    }

    state
        .db
        .set_exchange_status(&exchange.id, ExchangeStatus::Cancelled.as_str())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let counterpart = if exchange.user1_id == caller {
        &exchange.user2_id
    } else {
        &exchange.user1_id
    };
    notify(&state, counterpart, "exchange", &format!(
        "{} cancelled the exchange confirmation.",
        claims.username
    ))?;

    Ok(Json(ConfirmExchangeResponse {
        status: ExchangeStatus::Cancelled,
    }))
}

/// The caller's exchanges, enriched with the traded pair and counterpart name.
pub async fn my_exchanges(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let caller = claims.sub.to_string();
    let rows = state
        .db
        .exchanges_for_user(&caller)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut exchanges: Vec<ExchangeResponse> = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut response = exchange_response(row);

        if let Some(listing) = state
            .db
            .get_listing(&row.listing_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            response.listing = Some(ListingSummary {
                from_currency: listing.from_currency,
                from_amount: listing.from_amount,
                to_currency: listing.to_currency,
                to_amount: listing.to_amount,
            });
        }

        let counterpart = if row.user1_id == caller {
            &row.user2_id
        } else {
            &row.user1_id
        };
        if let Some(other) = state
            .db
            .get_user_by_id(counterpart)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            response.other_username = Some(other.username);
        }

        exchanges.push(response);
    }

    Ok(Json(exchanges))
}

fn notify(state: &AppState, user_id: &str, kind: &str, content: &str) -> Result<(), StatusCode> {
    state
        .db
        .insert_notification(&NotificationRow {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            read: false,
            created_at: now_str(),
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kambio_db::Database;
    use kambio_db::models::{ListingRow, UserRow};
    use kambio_gateway::registry::SupportRegistry;
    use kambio_types::models::Role;

    use crate::auth::AppStateInner;

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".to_string(),
            registry: SupportRegistry::new(),
            admin_email: None,
        })
    }

    fn claims(id: Uuid, username: &str) -> Claims {
        Claims {
            sub: id,
            username: username.to_string(),
            role: Role::User,
            exp: 4_000_000_000,
        }
    }

    fn seed_user(state: &AppState, id: Uuid, username: &str) {
        state
            .db
            .insert_user(&UserRow {
                id: id.to_string(),
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password: "hash".to_string(),
                country: "TR".to_string(),
                languages: vec![],
                role: "user".to_string(),
                member_number: format!("#K0{username}"),
                rating: 0.0,
                total_ratings: 0,
                last_seen: None,
                is_online: false,
                location_sharing_enabled: false,
                latitude: None,
                longitude: None,
                blocked_users: vec![],
                created_at: now_str(),
            })
            .unwrap();
    }

    fn seed_listing(state: &AppState, id: Uuid, owner: Uuid) {
        state
            .db
            .insert_listing(&ListingRow {
                id: id.to_string(),
                user_id: owner.to_string(),
                username: "owner".to_string(),
                from_currency: "EUR".to_string(),
                from_amount: 100.0,
                to_currency: "TRY".to_string(),
                to_amount: None,
                country: "TR".to_string(),
                city: "Istanbul".to_string(),
                description: "cash".to_string(),
                status: "active".to_string(),
                latitude: None,
                longitude: None,
                created_at: now_str(),
                expires_at: (Utc::now() + Duration::hours(12)).to_rfc3339(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn another_pair_can_initiate_on_a_busy_listing() {
        let state = test_state();
        let (owner, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        seed_user(&state, owner, "owner");
        seed_user(&state, u2, "second");
        seed_user(&state, u3, "third");
        let listing = Uuid::new_v4();
        seed_listing(&state, listing, owner);

        let first = initiate_exchange(
            State(state.clone()),
            Extension(claims(u2, "second")),
            Json(InitiateExchangeRequest { listing_id: listing, other_user_id: owner }),
        )
        .await;
        assert!(first.is_ok());

        // A pending handshake for (owner, second) does not block (owner, third).
        let second = initiate_exchange(
            State(state.clone()),
            Extension(claims(u3, "third")),
            Json(InitiateExchangeRequest { listing_id: listing, other_user_id: owner }),
        )
        .await;
        assert!(second.is_ok());

        // But the same pair cannot start a duplicate.
        let duplicate = initiate_exchange(
            State(state),
            Extension(claims(u2, "second")),
            Json(InitiateExchangeRequest { listing_id: listing, other_user_id: owner }),
        )
        .await;
        assert!(matches!(duplicate, Err(StatusCode::CONFLICT)));
    }

    #[tokio::test]
    async fn confirmed_pair_cannot_reinitiate() {
        let state = test_state();
        let (owner, u2) = (Uuid::new_v4(), Uuid::new_v4());
        seed_user(&state, owner, "owner");
        seed_user(&state, u2, "second");
        let listing = Uuid::new_v4();
        seed_listing(&state, listing, owner);

        state
            .db
            .insert_exchange(&ExchangeRow {
                id: Uuid::new_v4().to_string(),
                listing_id: listing.to_string(),
                user1_id: owner.to_string(),
                user2_id: u2.to_string(),
                user1_confirmed: true,
                user2_confirmed: true,
                initiated_at: now_str(),
                deadline: (Utc::now() + Duration::hours(12)).to_rfc3339(),
                status: "confirmed".to_string(),
            })
            .unwrap();

        let result = initiate_exchange(
            State(state),
            Extension(claims(u2, "second")),
            Json(InitiateExchangeRequest { listing_id: listing, other_user_id: owner }),
        )
        .await;
        assert!(matches!(result, Err(StatusCode::CONFLICT)));
    }

    #[tokio::test]
    async fn settling_the_handshake_leaves_the_listing_active() {
        let state = test_state();
        let (owner, u2) = (Uuid::new_v4(), Uuid::new_v4());
        seed_user(&state, owner, "owner");
        seed_user(&state, u2, "second");
        let listing = Uuid::new_v4();
        seed_listing(&state, listing, owner);

        let exchange_id = Uuid::new_v4();
        state
            .db
            .insert_exchange(&ExchangeRow {
                id: exchange_id.to_string(),
                listing_id: listing.to_string(),
                user1_id: owner.to_string(),
                user2_id: u2.to_string(),
                user1_confirmed: false,
                user2_confirmed: false,
                initiated_at: now_str(),
                deadline: (Utc::now() + Duration::hours(12)).to_rfc3339(),
                status: "pending".to_string(),
            })
            .unwrap();

        confirm_exchange(
            State(state.clone()),
            Path(exchange_id),
            Extension(claims(owner, "owner")),
        )
        .await
        .unwrap();
        confirm_exchange(
            State(state.clone()),
            Path(exchange_id),
            Extension(claims(u2, "second")),
        )
        .await
        .unwrap();

        let row = state.db.get_exchange(&exchange_id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "confirmed");

        // Settling the handshake is not a listing takedown.
        let listing_row = state.db.get_listing(&listing.to_string()).unwrap().unwrap();
        assert_eq!(listing_row.status, "active");
    }
}
