use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, instrument};
use ulid::Ulid;

use crate::error::ExternalError;
use crate::model::{BusyInterval, Span};

use super::{build_client, rfc3339, transport_error};

const SERVICE: &str = "busy source";

/// Third-party busy periods for an advisor.
#[async_trait]
pub trait BusyIntervalSource: Send + Sync {
    /// Busy periods overlapping `range`. Fails on network, auth or provider errors.
    async fn fetch(&self, advisor_id: Ulid, range: Span) -> Result<Vec<BusyInterval>, ExternalError>;
}

/// Whether external busy data is part of slot computation at all.
#[derive(Clone)]
pub enum BusySource {
    Present(Arc<dyn BusyIntervalSource>),
    /// No external calendar configured; nothing is expected, so results are never degraded.
    Absent,
}

impl BusySource {
    pub fn present(source: impl BusyIntervalSource + 'static) -> Self {
        BusySource::Present(Arc::new(source))
    }
}

#[derive(Debug, Deserialize)]
struct WireBusy {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Busy source backed by a free/busy HTTP endpoint:
/// `GET {base}/advisors/{id}/busy?start=..&end=..` → `[{"start": .., "end": ..}]`.
#[derive(Clone)]
pub struct HttpBusySource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBusySource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: build_client(SERVICE, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl BusyIntervalSource for HttpBusySource {
    #[instrument(skip(self), fields(advisor_id = %advisor_id))]
    async fn fetch(&self, advisor_id: Ulid, range: Span) -> Result<Vec<BusyInterval>, ExternalError> {
        let url = format!(
            "{}/advisors/{advisor_id}/busy?start={}&end={}",
            self.base_url,
            rfc3339(range.start),
            rfc3339(range.end)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExternalError::Rejected {
                service: SERVICE,
                status: status.as_u16(),
            });
        }

        let periods: Vec<WireBusy> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(SERVICE, self.timeout, e)
            } else {
                ExternalError::Malformed {
                    service: SERVICE,
                    message: e.to_string(),
                }
            }
        })?;

        Ok(periods
            .into_iter()
            .filter_map(|p| {
                let (start, end) = (p.start.timestamp_millis(), p.end.timestamp_millis());
                if start >= end {
                    debug!(start, end, "skipping empty busy period");
                    return None;
                }
                Some(Span::new(start, end))
            })
            .collect())
    }
}

/// In-memory busy source. Can be switched into a failing state.
#[derive(Default)]
pub struct StaticBusySource {
    periods: DashMap<Ulid, Vec<BusyInterval>>,
    failing: AtomicBool,
}

impl StaticBusySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_busy(&self, advisor_id: Ulid, periods: Vec<BusyInterval>) {
        self.periods.insert(advisor_id, periods);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BusyIntervalSource for StaticBusySource {
    async fn fetch(&self, advisor_id: Ulid, range: Span) -> Result<Vec<BusyInterval>, ExternalError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExternalError::Transport {
                service: SERVICE,
                message: "calendar provider unreachable".into(),
            });
        }
        Ok(self
            .periods
            .get(&advisor_id)
            .map(|p| p.iter().filter(|s| s.overlaps(&range)).copied().collect())
            .unwrap_or_default())
    }
}
