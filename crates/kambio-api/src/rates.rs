use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};

use kambio_types::api::{
    ConvertQuery, ConvertResponse, RateChange, RateChangesQuery, RateChangesResponse,
    RateHistoryQuery, RateHistoryResponse, RatePoint, RateSnapshotResponse, Trend,
};

use crate::auth::AppState;
use crate::convert::parse_ts;

pub async fn current_rates(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let snapshot = state
        .db
        .latest_rate_snapshot()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(RateSnapshotResponse {
        base: snapshot.base,
        rates: snapshot.rates,
        recorded_at: parse_ts(&snapshot.recorded_at, "snapshot recorded_at"),
    }))
}

pub async fn convert(
    State(state): State<AppState>,
    Query(query): Query<ConvertQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    if query.amount <= 0.0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let snapshot = state
        .db
        .latest_rate_snapshot()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let (converted, rate) =
        convert_amount(&snapshot.rates, &snapshot.base, &query.from, &query.to, query.amount)
            .ok_or(StatusCode::BAD_REQUEST)?;

    Ok(Json(ConvertResponse {
        amount: query.amount,
        from: query.from,
        to: query.to,
        converted_amount: (converted * 100.0).round() / 100.0,
        rate,
        recorded_at: parse_ts(&snapshot.recorded_at, "snapshot recorded_at"),
    }))
}

pub async fn rate_history(
    State(state): State<AppState>,
    Query(query): Query<RateHistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let days = query.days.clamp(1, 30);
    let since = (Utc::now() - Duration::days(days)).to_rfc3339();

    let snapshots = state
        .db
        .rate_snapshots_since(&since)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let base = snapshots
        .first()
        .map(|s| s.base.clone())
        .ok_or(StatusCode::NOT_FOUND)?;

    let points: Vec<RatePoint> = snapshots
        .iter()
        .filter_map(|s| {
            Some(RatePoint {
                recorded_at: parse_ts(&s.recorded_at, "snapshot recorded_at"),
                rate: *s.rates.get(&query.currency)?,
            })
        })
        .collect();

    if points.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }

    let change = change_percentage(points[0].rate, points[points.len() - 1].rate);

    Ok(Json(RateHistoryResponse {
        currency: query.currency,
        base,
        days,
        points,
        change_percentage: change,
        trend: Trend::from_change(change),
    }))
}

/// 24h movement for a comma-separated list of currencies.
pub async fn rate_changes(
    State(state): State<AppState>,
    Query(query): Query<RateChangesQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let latest = state
        .db
        .latest_rate_snapshot()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let day_ago = (Utc::now() - Duration::hours(24)).to_rfc3339();
    let baseline = state
        .db
        .rate_snapshot_before(&day_ago)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut changes = HashMap::new();
    for currency in query.currencies.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let Some(&current) = latest.rates.get(currency) else {
            continue;
        };
        let change = baseline
            .as_ref()
            .and_then(|b| b.rates.get(currency))
            .map(|&earlier| change_percentage(earlier, current))
            .unwrap_or(0.0);

        changes.insert(
            currency.to_string(),
            RateChange {
                current_rate: current,
                change_percentage: change,
                trend: Trend::from_change(change),
            },
        );
    }

    Ok(Json(RateChangesResponse {
        base: latest.base,
        changes,
        recorded_at: parse_ts(&latest.recorded_at, "snapshot recorded_at"),
    }))
}

/// Cross-rate conversion through the snapshot base. The base itself always
/// has an implicit rate of 1.
pub fn convert_amount(
    rates: &HashMap<String, f64>,
    base: &str,
    from: &str,
    to: &str,
    amount: f64,
) -> Option<(f64, f64)> {
    let rate_of = |currency: &str| -> Option<f64> {
        if currency == base {
            Some(1.0)
        } else {
            rates.get(currency).copied().filter(|r| *r > 0.0)
        }
    };

    let rate = rate_of(to)? / rate_of(from)?;
    Some((amount * rate, rate))
}

fn change_percentage(earlier: f64, current: f64) -> f64 {
    if earlier == 0.0 {
        return 0.0;
    }
    let raw = (current - earlier) / earlier * 100.0;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur_rates() -> HashMap<String, f64> {
        HashMap::from([("TRY".to_string(), 35.0), ("USD".to_string(), 1.08)])
    }

    #[test]
    fn converts_through_the_base() {
        let rates = eur_rates();

        // base -> quote
        let (converted, rate) = convert_amount(&rates, "EUR", "EUR", "TRY", 100.0).unwrap();
        assert!((converted - 3500.0).abs() < 1e-9);
        assert!((rate - 35.0).abs() < 1e-9);

        // quote -> quote via the base
        let (converted, _) = convert_amount(&rates, "EUR", "USD", "TRY", 108.0).unwrap();
        assert!((converted - 3500.0).abs() < 1e-6);

        // quote -> base
        let (converted, _) = convert_amount(&rates, "EUR", "TRY", "EUR", 35.0).unwrap();
        assert!((converted - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_currency_is_rejected() {
        assert!(convert_amount(&eur_rates(), "EUR", "EUR", "XXX", 1.0).is_none());
        assert!(convert_amount(&eur_rates(), "EUR", "XXX", "TRY", 1.0).is_none());
    }

    #[test]
    fn change_percentage_rounds_to_two_decimals() {
        assert_eq!(change_percentage(30.0, 33.0), 10.0);
        assert_eq!(change_percentage(3.0, 1.0), -66.67);
        assert_eq!(change_percentage(0.0, 5.0), 0.0);
    }
}
