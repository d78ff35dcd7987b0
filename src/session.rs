//! Identity of the caller, as established by the portal's session layer.

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::limits::MAX_EXTERNAL_ID_LEN;

/// Header the upstream session layer sets to the authenticated customer.
pub const CUSTOMER_HEADER: &str = "x-customer-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
}

/// `currentUser()` of the surrounding portal. `None` means no session.
#[async_trait]
pub trait SessionLookup: Send + Sync {
    async fn current_user(&self, headers: &HeaderMap) -> Option<SessionUser>;
}

/// Trusts the customer id forwarded by the session layer in front of this service.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderSession;

#[async_trait]
impl SessionLookup for HeaderSession {
    async fn current_user(&self, headers: &HeaderMap) -> Option<SessionUser> {
        let id = headers.get(CUSTOMER_HEADER)?.to_str().ok()?.trim();
        if id.is_empty() || id.len() > MAX_EXTERNAL_ID_LEN {
            return None;
        }
        Some(SessionUser { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn reads_customer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CUSTOMER_HEADER, HeaderValue::from_static(" cust-42 "));
        assert_eq!(
            HeaderSession.current_user(&headers).await,
            Some(SessionUser { id: "cust-42".into() })
        );
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_no_session() {
        assert_eq!(HeaderSession.current_user(&HeaderMap::new()).await, None);

        let mut headers = HeaderMap::new();
        headers.insert(CUSTOMER_HEADER, HeaderValue::from_static("   "));
        assert_eq!(HeaderSession.current_user(&headers).await, None);
    }
}
