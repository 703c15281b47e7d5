use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use kambio_db::models::{NotificationRow, RatingRow};
use kambio_db::now_str;
use kambio_types::api::{Claims, CreateRatingRequest, RatingResponse};

use crate::auth::AppState;
use crate::convert::rating_response;

/// Rate a counterpart after a confirmed exchange. One rating per listing,
/// stars recompute the denormalized average on the rated user's row.
pub async fn create_rating(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRatingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !(1..=5).contains(&req.rating) {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.rated_user_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let rater = claims.sub.to_string();
    let rated = req.rated_user_id.to_string();
    let listing_id = req.listing_id.to_string();

    if state
        .db
        .get_user_by_id(&rated)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    // Ratings are earned, not given freely: the pair must have completed the
    // handshake on this listing.
    if state
        .db
        .find_confirmed_exchange(&listing_id, &rater, &rated)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::FORBIDDEN);
    }

    if state
        .db
        .find_rating(&rater, &listing_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    let rating = RatingRow {
        id: Uuid::new_v4().to_string(),
        rated_user_id: rated.clone(),
        rater_id: rater,
        rater_username: claims.username.clone(),
        listing_id,
        rating: req.rating,
        comment: req.comment,
        created_at: now_str(),
    };

    state
        .db
        .insert_rating(&rating)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let (average, total) = state
        .db
        .rating_stats(&rated)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .db
        .update_user_rating(&rated, average, total)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .db
        .insert_notification(&NotificationRow {
            id: Uuid::new_v4().to_string(),
            user_id: rated,
            kind: "rating".to_string(),
            content: format!("{} rated you {} stars", claims.username, req.rating),
            read: false,
            created_at: now_str(),
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(rating_response(&rating))))
}

pub async fn user_ratings(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .ratings_for_user(&user_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let ratings: Vec<RatingResponse> = rows.iter().map(rating_response).collect();
    Ok(Json(ratings))
}
