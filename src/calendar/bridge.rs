use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use crate::error::ExternalError;
use crate::model::Booking;

use super::{build_client, rfc3339, transport_error};

const SERVICE: &str = "calendar bridge";

/// Mirrors committed bookings into the advisor's external calendar.
#[async_trait]
pub trait CalendarBridge: Send + Sync {
    async fn publish(&self, booking: &Booking) -> Result<(), ExternalError>;
}

/// Bridge used when no external calendar is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBridge;

#[async_trait]
impl CalendarBridge for NoopBridge {
    async fn publish(&self, _booking: &Booking) -> Result<(), ExternalError> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    booking_id: String,
    advisor_id: String,
    customer_id: &'a str,
    package_id: &'a str,
    start: String,
    end: String,
}

/// `POST {base}/events` with the booking's span as RFC 3339 instants.
#[derive(Clone)]
pub struct HttpCalendarBridge {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpCalendarBridge {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExternalError> {
        Ok(Self {
            client: build_client(SERVICE, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl CalendarBridge for HttpCalendarBridge {
    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn publish(&self, booking: &Booking) -> Result<(), ExternalError> {
        let span = booking.span();
        let body = WireEvent {
            booking_id: booking.id.to_string(),
            advisor_id: booking.advisor_id.to_string(),
            customer_id: &booking.customer_id,
            package_id: &booking.package_id,
            start: rfc3339(span.start),
            end: rfc3339(span.end),
        };
        let response = self
            .client
            .post(format!("{}/events", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, self.timeout, e))?;

        if !response.status().is_success() {
            return Err(ExternalError::Rejected {
                service: SERVICE,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;
    use ulid::Ulid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn booking() -> Booking {
        Booking {
            id: Ulid::new(),
            advisor_id: Ulid::new(),
            customer_id: "cust-1".into(),
            package_id: "pkg-1".into(),
            scheduled_at: 1_704_103_200_000, // 2024-01-01T10:00:00Z
            duration_minutes: 60,
            status: BookingStatus::Booked,
        }
    }

    #[tokio::test]
    async fn publishes_event_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(body_partial_json(serde_json::json!({
                "customerId": "cust-1",
                "start": "2024-01-01T10:00:00.000Z",
                "end": "2024-01-01T11:00:00.000Z"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let bridge = HttpCalendarBridge::new(server.uri(), Duration::from_secs(2)).unwrap();
        bridge.publish(&booking()).await.unwrap();
    }

    #[tokio::test]
    async fn provider_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let bridge = HttpCalendarBridge::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = bridge.publish(&booking()).await.unwrap_err();
        assert!(matches!(err, ExternalError::Rejected { status: 502, .. }));
    }

    #[tokio::test]
    async fn noop_always_succeeds() {
        assert!(NoopBridge.publish(&booking()).await.is_ok());
    }
}
