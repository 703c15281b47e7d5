use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use uuid::Uuid;

use kambio_db::models::ReportRow;
use kambio_db::now_str;
use kambio_types::api::{Claims, CreateReportRequest};

use crate::auth::AppState;
use crate::convert::report_response;

pub async fn create_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReportRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.reason.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let reporter = claims.sub.to_string();
    let listing_id = req.listing_id.to_string();

    let listing = state
        .db
        .get_listing(&listing_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    // Flagging your own listing makes no sense.
    if listing.user_id == reporter {
        return Err(StatusCode::BAD_REQUEST);
    }

    if state
        .db
        .find_report(&reporter, &listing_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    let report = ReportRow {
        id: Uuid::new_v4().to_string(),
        listing_id,
        reporter_id: reporter,
        reporter_username: claims.username.clone(),
        reason: req.reason,
        description: req.description,
        status: "pending".to_string(),
        created_at: now_str(),
    };

    state
        .db
        .insert_report(&report)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(report_response(&report))))
}
