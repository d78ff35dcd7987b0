use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Ledger, LedgerError};

impl Ledger {
    /// Profile and rules of an advisor, rules in insertion order.
    pub async fn schedule(&self, advisor_id: Ulid) -> Result<AdvisorSchedule, LedgerError> {
        let st = self
            .get_advisor(&advisor_id)
            .ok_or(LedgerError::NotFound(advisor_id))?;
        let guard = st.read().await;
        Ok(guard.schedule())
    }

    /// Bookings of any status whose interval overlaps `range`.
    pub async fn bookings_in(
        &self,
        advisor_id: Ulid,
        range: Span,
    ) -> Result<Vec<Booking>, LedgerError> {
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(LedgerError::LimitExceeded("query window too wide"));
        }
        let st = self
            .get_advisor(&advisor_id)
            .ok_or(LedgerError::NotFound(advisor_id))?;
        let guard = st.read().await;
        Ok(guard.overlapping(&range).cloned().collect())
    }

    pub async fn booking(&self, id: Ulid) -> Result<Booking, LedgerError> {
        let advisor_id = self.advisor_for_entity(&id).ok_or(LedgerError::NotFound(id))?;
        let st = self
            .get_advisor(&advisor_id)
            .ok_or(LedgerError::NotFound(advisor_id))?;
        let guard = st.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    pub async fn list_advisors(&self) -> Vec<AdvisorProfile> {
        let shared: Vec<_> = self.advisors.iter().map(|e| e.value().clone()).collect();
        let mut profiles = Vec::with_capacity(shared.len());
        for st in shared {
            profiles.push(st.read().await.profile.clone());
        }
        profiles.sort_by_key(|p| p.id);
        profiles
    }
}
