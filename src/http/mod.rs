//! HTTP surface: the axum router and the state shared by its handlers.

mod errors;
mod handlers;
pub mod models;

pub use errors::ApiError;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::ledger::Ledger;
use crate::reservation::ReservationCoordinator;
use crate::session::SessionLookup;
use crate::slots::SlotGenerator;

#[derive(Clone)]
pub struct AppState {
    /// Rule and booking maintenance goes straight to the ledger.
    pub ledger: Arc<Ledger>,
    pub slots: SlotGenerator,
    pub coordinator: Arc<ReservationCoordinator>,
    pub session: Arc<dyn SessionLookup>,
}

/// Routes behind `TraceLayer`. Everything except booking writes also runs under
/// `request_timeout`; booking writes are bounded by the coordinator's own deadlines
/// and always report the outcome of a commit they started.
pub fn build_routes(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let timed = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/advisors",
            get(handlers::list_advisors).post(handlers::create_advisor),
        )
        .route("/advisors/:id", put(handlers::update_advisor))
        .route("/advisors/:id/slots", get(handlers::get_slots))
        .route(
            "/advisors/:id/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route("/advisors/:id/bookings", get(handlers::list_bookings))
        .route(
            "/rules/:id",
            patch(handlers::patch_rule).delete(handlers::delete_rule),
        )
        .layer(middleware::from_fn_with_state(request_timeout, request_deadline));

    let bookings = Router::new()
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/:id/status", post(handlers::set_booking_status));

    timed
        .merge(bookings)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Answers with a structured `External` error once `limit` elapses.
async fn request_deadline(State(limit): State<Duration>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::TimedOut.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn slow_router(limit: Duration) -> Router {
        Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "late"
                }),
            )
            .route("/fast", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limit, request_deadline))
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_renders_structured_error() {
        let response = slow_router(Duration::from_millis(50))
            .oneshot(axum::http::Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["kind"], "External");
        assert_eq!(body["error"]["message"], "request timed out");
    }

    #[tokio::test]
    async fn fast_handlers_pass_through() {
        let response = slow_router(Duration::from_secs(5))
            .oneshot(axum::http::Request::get("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
