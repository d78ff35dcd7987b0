//! Route handlers.
//!
//! - `GET /advisors/{id}/slots` and `POST /bookings` drive the engine.
//! - The remaining routes maintain advisors, rules and booking lifecycle.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Weekday};
use serde::de::DeserializeOwned;
use tracing::instrument;
use ulid::Ulid;

use crate::model::*;
use crate::reservation::ReservationRequest;

use super::errors::ApiError;
use super::models::*;
use super::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

fn parse_id(raw: &str, what: &str) -> ApiResult<Ulid> {
    Ulid::from_string(raw).map_err(|_| ApiError::validation(format!("malformed {what} id")))
}

fn parse_instant(raw: &str, field: &str) -> ApiResult<Ms> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| ApiError::validation(format!("{field} must be an RFC 3339 timestamp")))
}

fn parse_time(raw: &str, field: &str) -> ApiResult<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ApiError::validation(format!("{field} must be HH:MM")))
}

fn required<'a>(value: &'a Option<String>, field: &str) -> ApiResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| ApiError::validation(format!("{field} is required")))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ── Engine ──────────────────────────────────────────────────────

#[instrument(skip_all, fields(advisor_id = %advisor_id))]
pub async fn get_slots(
    State(state): State<Arc<AppState>>,
    Path(advisor_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> ApiResult<Json<SlotsResponse>> {
    let advisor_id = parse_id(&advisor_id, "advisor")?;
    let date = NaiveDate::parse_from_str(required(&query.date, "date")?, "%Y-%m-%d")
        .map_err(|_| ApiError::validation("date must be YYYY-MM-DD"))?;
    let duration: u32 = required(&query.duration, "duration")?
        .parse()
        .map_err(|_| ApiError::validation("duration must be a positive number of minutes"))?;

    let list = state.slots.generate(advisor_id, date, duration).await?;
    Ok(Json(list.into()))
}

#[instrument(skip_all)]
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BookingCreated>)> {
    let user = state
        .session
        .current_user(&headers)
        .await
        .ok_or(ApiError::Unauthenticated)?;
    let req = body(payload)?;
    let request = ReservationRequest {
        advisor_id: parse_id(&req.advisor_id, "advisor")?,
        customer_id: user.id,
        package_id: req.package_id,
        slot_start: parse_instant(&req.slot_start, "slotStart")?,
        duration_minutes: req.duration,
    };

    let reservation = state.coordinator.reserve(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(BookingCreated {
            booking_id: reservation.booking.id.to_string(),
            warnings: reservation.warnings,
        }),
    ))
}

#[instrument(skip_all, fields(booking_id = %booking_id))]
pub async fn set_booking_status(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Json<BookingView>> {
    let id = parse_id(&booking_id, "booking")?;
    let status = match body(payload)?.status.as_str() {
        "Completed" => BookingStatus::Completed,
        "Cancelled" => BookingStatus::Cancelled,
        other => {
            return Err(ApiError::validation(format!(
                "status must be Completed or Cancelled, got '{other}'"
            )));
        }
    };
    let booking = state.coordinator.transition(id, status).await?;
    Ok(Json(BookingView::from(&booking)))
}

#[instrument(skip_all, fields(advisor_id = %advisor_id))]
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Path(advisor_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<BookingView>>> {
    let advisor_id = parse_id(&advisor_id, "advisor")?;
    let from = parse_instant(required(&query.from, "from")?, "from")?;
    let to = parse_instant(required(&query.to, "to")?, "to")?;
    if from >= to {
        return Err(ApiError::validation("from must be before to"));
    }
    let bookings = state.ledger.bookings_in(advisor_id, Span::new(from, to)).await?;
    Ok(Json(bookings.iter().map(BookingView::from).collect()))
}

// ── Advisors and rules ─────────────────────────────────────────

#[instrument(skip_all)]
pub async fn create_advisor(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AdvisorRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AdvisorCreated>)> {
    let req = body(payload)?;
    let id = Ulid::new();
    state
        .ledger
        .register_advisor(id, req.name, LocalClock::new(req.utc_offset_minutes))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AdvisorCreated {
            advisor_id: id.to_string(),
        }),
    ))
}

pub async fn list_advisors(State(state): State<Arc<AppState>>) -> Json<Vec<AdvisorView>> {
    let profiles = state.ledger.list_advisors().await;
    Json(profiles.iter().map(AdvisorView::from).collect())
}

#[instrument(skip_all, fields(advisor_id = %advisor_id))]
pub async fn update_advisor(
    State(state): State<Arc<AppState>>,
    Path(advisor_id): Path<String>,
    payload: Result<Json<AdvisorRequest>, JsonRejection>,
) -> ApiResult<Json<AdvisorView>> {
    let id = parse_id(&advisor_id, "advisor")?;
    let req = body(payload)?;
    let clock = LocalClock::new(req.utc_offset_minutes);
    state.ledger.update_advisor(id, req.name.clone(), clock).await?;
    Ok(Json(AdvisorView::from(&AdvisorProfile {
        id,
        name: req.name,
        clock,
    })))
}

#[instrument(skip_all, fields(advisor_id = %advisor_id))]
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Path(advisor_id): Path<String>,
    payload: Result<Json<RuleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RuleCreated>)> {
    let advisor_id = parse_id(&advisor_id, "advisor")?;
    let req = body(payload)?;
    let day_of_week: Weekday = req
        .day_of_week
        .parse()
        .map_err(|_| ApiError::validation("dayOfWeek must be Mon..Sun"))?;
    let rule = AvailabilityRule {
        id: Ulid::new(),
        advisor_id,
        day_of_week,
        start_time: parse_time(&req.start_time, "startTime")?,
        end_time: parse_time(&req.end_time, "endTime")?,
        active: req.active.unwrap_or(true),
    };
    let rule_id = rule.id;
    state.ledger.add_rule(rule).await?;
    Ok((
        StatusCode::CREATED,
        Json(RuleCreated {
            rule_id: rule_id.to_string(),
        }),
    ))
}

#[instrument(skip_all, fields(advisor_id = %advisor_id))]
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Path(advisor_id): Path<String>,
) -> ApiResult<Json<Vec<RuleView>>> {
    let advisor_id = parse_id(&advisor_id, "advisor")?;
    let schedule = state.ledger.schedule(advisor_id).await?;
    Ok(Json(schedule.rules.iter().map(RuleView::from).collect()))
}

#[instrument(skip_all, fields(rule_id = %rule_id))]
pub async fn patch_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    payload: Result<Json<RulePatch>, JsonRejection>,
) -> ApiResult<Json<RuleView>> {
    let id = parse_id(&rule_id, "rule")?;
    let patch = body(payload)?;
    let rule = state.ledger.set_rule_active(id, patch.active).await?;
    Ok(Json(RuleView::from(&rule)))
}

#[instrument(skip_all, fields(rule_id = %rule_id))]
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&rule_id, "rule")?;
    state.ledger.remove_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
