//! Request and response bodies of the HTTP surface.
//!
//! Instants cross the wire as RFC 3339 strings, times of day as `HH:MM`, and
//! weekdays as `Mon`..`Sun`.

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::*;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorCreated {
    pub advisor_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorView {
    pub advisor_id: String,
    pub name: Option<String>,
    pub utc_offset_minutes: i32,
}

impl From<&AdvisorProfile> for AdvisorView {
    fn from(p: &AdvisorProfile) -> Self {
        Self {
            advisor_id: p.id.to_string(),
            name: p.name.clone(),
            utc_offset_minutes: p.clock.utc_offset_minutes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRequest {
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RulePatch {
    pub active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCreated {
    pub rule_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleView {
    pub rule_id: String,
    pub advisor_id: String,
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    pub active: bool,
}

impl From<&AvailabilityRule> for RuleView {
    fn from(r: &AvailabilityRule) -> Self {
        Self {
            rule_id: r.id.to_string(),
            advisor_id: r.advisor_id.to_string(),
            day_of_week: r.day_of_week.to_string(),
            start_time: format_time(r.start_time),
            end_time: format_time(r.end_time),
            active: r.active,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub start: String,
    pub end: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub slots: Vec<SlotView>,
    pub degraded: bool,
}

impl From<SlotList> for SlotsResponse {
    fn from(list: SlotList) -> Self {
        Self {
            slots: list
                .slots
                .iter()
                .map(|s| SlotView {
                    start: format_instant(s.start),
                    end: format_instant(s.end),
                    available: s.available,
                })
                .collect(),
            degraded: list.degraded,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub advisor_id: String,
    pub package_id: String,
    pub slot_start: String,
    pub duration: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreated {
    pub booking_id: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub booking_id: String,
    pub advisor_id: String,
    pub customer_id: String,
    pub package_id: String,
    pub scheduled_at: String,
    pub duration_minutes: u32,
    pub status: &'static str,
}

impl From<&Booking> for BookingView {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id.to_string(),
            advisor_id: b.advisor_id.to_string(),
            customer_id: b.customer_id.clone(),
            package_id: b.package_id.clone(),
            scheduled_at: format_instant(b.scheduled_at),
            duration_minutes: b.duration_minutes,
            status: b.status.as_str(),
        }
    }
}

pub fn format_instant(t: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(t)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}
