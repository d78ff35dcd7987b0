//! External calendar seams: busy periods flowing in, confirmed bookings flowing out.
//!
//! Both directions are best-effort. The ledger stays authoritative; these adapters
//! only enrich slot queries and mirror commits.

mod bridge;
mod busy;

pub use bridge::{CalendarBridge, HttpCalendarBridge, NoopBridge};
pub use busy::{BusyIntervalSource, BusySource, HttpBusySource, StaticBusySource};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::ExternalError;
use crate::model::Ms;

pub(crate) fn rfc3339(t: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(t)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

pub(crate) fn build_client(
    service: &'static str,
    timeout: std::time::Duration,
) -> Result<reqwest::Client, ExternalError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| ExternalError::Transport {
            service,
            message: e.to_string(),
        })
}

/// Map a reqwest failure onto the adapter error for `service`.
pub(crate) fn transport_error(service: &'static str, timeout: std::time::Duration, e: reqwest::Error) -> ExternalError {
    if e.is_timeout() {
        ExternalError::Timeout { service, timeout }
    } else {
        ExternalError::Transport {
            service,
            message: e.to_string(),
        }
    }
}
