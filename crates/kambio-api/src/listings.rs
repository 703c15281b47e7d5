use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use kambio_db::models::ListingRow;
use kambio_db::now_str;
use kambio_types::api::{Claims, CreateListingRequest, ListingQuery, ListingResponse, NearbyQuery};
use kambio_types::models::ListingStatus;

use crate::auth::AppState;
use crate::convert::{listing_response, parse_ts};

/// Listings stay visible for 12 hours, then the scheduler expires them.
const LISTING_TTL_HOURS: i64 = 12;

pub async fn create_listing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.from_amount <= 0.0 || req.from_currency.is_empty() || req.to_currency.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let listing = ListingRow {
        id: Uuid::new_v4().to_string(),
        user_id: claims.sub.to_string(),
        username: claims.username.clone(),
        from_currency: req.from_currency,
        from_amount: req.from_amount,
        to_currency: req.to_currency,
        to_amount: req.to_amount,
        country: req.country,
        city: req.city,
        description: req.description,
        status: ListingStatus::Active.as_str().to_string(),
        latitude: req.latitude,
        longitude: req.longitude,
        created_at: now_str(),
        expires_at: (Utc::now() + Duration::hours(LISTING_TTL_HOURS)).to_rfc3339(),
    };

    state
        .db
        .insert_listing(&listing)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(listing_response(&listing))))
}

/// Browse listings. Hidden in both directions of a block: the viewer never
/// sees listings from users they blocked, nor from users who blocked them.
pub async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let viewer_id = claims.sub.to_string();
    let blocked = state
        .db
        .get_user_by_id(&viewer_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(|u| u.blocked_users)
        .unwrap_or_default();

    let rows = state
        .db
        .list_listings(
            query.status.as_str(),
            query.country.as_deref(),
            query.from_currency.as_deref(),
            query.to_currency.as_deref(),
            &blocked,
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let visible = filter_blocked_owners(&state, &viewer_id, rows)?;
    let listings: Vec<ListingResponse> = visible.iter().map(listing_response).collect();
    Ok(Json(listings))
}

pub async fn my_listings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .listings_by_user(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let now = Utc::now();
    let listings: Vec<ListingResponse> = rows
        .iter()
        .map(|row| {
            let mut response = listing_response(row);
            if response.status == ListingStatus::Active {
                let remaining =
                    (parse_ts(&row.expires_at, "listing expires_at") - now).num_seconds();
                response.time_remaining = Some(remaining.max(0));
            }
            response
        })
        .collect();

    Ok(Json(listings))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let listing = state
        .db
        .get_listing(&listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(listing_response(&listing)))
}

pub async fn update_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let mut listing = state
        .db
        .get_listing(&listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if listing.user_id != claims.sub.to_string() {
        return Err(StatusCode::FORBIDDEN);
    }
    if req.from_amount <= 0.0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    listing.from_currency = req.from_currency;
    listing.from_amount = req.from_amount;
    listing.to_currency = req.to_currency;
    listing.to_amount = req.to_amount;
    listing.country = req.country;
    listing.city = req.city;
    listing.description = req.description;
    listing.latitude = req.latitude;
    listing.longitude = req.longitude;

    state
        .db
        .update_listing(&listing)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(listing_response(&listing)))
}

/// Owner takedown is a status flip, not a row delete: the listing stays
/// referenced by message threads and exchange history.
pub async fn close_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let listing = state
        .db
        .get_listing(&listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if listing.user_id != claims.sub.to_string() {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .set_listing_status(&listing.id, ListingStatus::Closed.as_str())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Expired listings can go back up for another 12-hour window.
pub async fn republish_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let listing = state
        .db
        .get_listing(&listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if listing.user_id != claims.sub.to_string() {
        return Err(StatusCode::FORBIDDEN);
    }
    if listing.status != ListingStatus::Expired.as_str() {
        return Err(StatusCode::CONFLICT);
    }

    let expires_at = (Utc::now() + Duration::hours(LISTING_TTL_HOURS)).to_rfc3339();
    state
        .db
        .republish_listing(&listing.id, &expires_at)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let refreshed = state
        .db
        .get_listing(&listing.id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(listing_response(&refreshed)))
}

/// Active listings with coordinates inside the radius, closest first.
pub async fn nearby_listings(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let viewer_id = claims.sub.to_string();
    let blocked: HashSet<String> = state
        .db
        .get_user_by_id(&viewer_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(|u| u.blocked_users.into_iter().collect())
        .unwrap_or_default();

    let rows = state
        .db
        .listings_with_coords(ListingStatus::Active.as_str())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let rows: Vec<_> = rows
        .into_iter()
        .filter(|l| !blocked.contains(&l.user_id))
        .collect();
    let rows = filter_blocked_owners(&state, &viewer_id, rows)?;

    let mut nearby: Vec<(f64, ListingResponse)> = rows
        .iter()
        .filter_map(|row| {
            let (lat, lng) = (row.latitude?, row.longitude?);
            let distance = haversine_km(query.lat, query.lng, lat, lng);
            if distance > query.radius {
                return None;
            }
            let mut response = listing_response(row);
            response.distance = Some((distance * 10.0).round() / 10.0);
            Some((distance, response))
        })
        .collect();

    nearby.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let listings: Vec<ListingResponse> = nearby.into_iter().map(|(_, l)| l).collect();
    Ok(Json(listings))
}

/// Drop listings whose owner has blocked the viewer.
fn filter_blocked_owners(
    state: &AppState,
    viewer_id: &str,
    rows: Vec<ListingRow>,
) -> Result<Vec<ListingRow>, StatusCode> {
    let mut owner_ids: Vec<String> = rows.iter().map(|l| l.user_id.clone()).collect();
    owner_ids.sort();
    owner_ids.dedup();

    let owners = state
        .db
        .users_by_ids(&owner_ids)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let blocking_owners: HashSet<&String> = owners
        .iter()
        .filter(|o| o.blocked_users.iter().any(|b| b == viewer_id))
        .map(|o| &o.id)
        .collect();

    Ok(rows
        .into_iter()
        .filter(|l| !blocking_owners.contains(&l.user_id))
        .collect())
}

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distances() {
        // Istanbul -> Ankara is roughly 350 km.
        let d = haversine_km(41.0082, 28.9784, 39.9334, 32.8597);
        assert!((d - 350.0).abs() < 15.0, "got {d}");

        assert!(haversine_km(41.0, 29.0, 41.0, 29.0) < 1e-9);
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = haversine_km(41.0, 29.0, 36.9, 30.7);
        let b = haversine_km(36.9, 30.7, 41.0, 29.0);
        assert!((a - b).abs() < 1e-9);
    }
}
