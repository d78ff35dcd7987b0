use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_no_conflict, validate_booking, validate_clock, validate_name, validate_rule,
};
use super::{Ledger, LedgerError, WalCommand};

impl Ledger {
    pub async fn register_advisor(
        &self,
        id: Ulid,
        name: Option<String>,
        clock: LocalClock,
    ) -> Result<(), LedgerError> {
        validate_name(name.as_deref())?;
        validate_clock(&clock)?;
        let gate = self.commit_gate.clone().read_owned().await;
        self.persist_registration(gate, AdvisorProfile { id, name, clock }, MAX_ADVISORS)
            .await
    }

    pub async fn update_advisor(
        &self,
        id: Ulid,
        name: Option<String>,
        clock: LocalClock,
    ) -> Result<(), LedgerError> {
        validate_name(name.as_deref())?;
        validate_clock(&clock)?;
        let st = self.get_advisor(&id).ok_or(LedgerError::NotFound(id))?;
        let gate = self.commit_gate.clone().read_owned().await;
        let guard = st.write_owned().await;
        let event = Event::AdvisorUpdated { id, name, clock };
        self.persist_and_apply(gate, guard, event).await
    }

    pub async fn add_rule(&self, rule: AvailabilityRule) -> Result<(), LedgerError> {
        validate_rule(&rule)?;
        let st = self
            .get_advisor(&rule.advisor_id)
            .ok_or(LedgerError::NotFound(rule.advisor_id))?;
        if self.entity_to_advisor.contains_key(&rule.id) {
            return Err(LedgerError::AlreadyExists(rule.id));
        }
        let gate = self.commit_gate.clone().read_owned().await;
        let guard = st.write_owned().await;
        if guard.rules.len() >= MAX_RULES_PER_ADVISOR {
            return Err(LedgerError::LimitExceeded("too many rules on advisor"));
        }
        let event = Event::RuleAdded { rule };
        self.persist_and_apply(gate, guard, event).await
    }

    /// Toggle a rule's `active` flag. Returns the updated rule.
    pub async fn set_rule_active(
        &self,
        id: Ulid,
        active: bool,
    ) -> Result<AvailabilityRule, LedgerError> {
        let gate = self.commit_gate.clone().read_owned().await;
        let guard = self.resolve_entity_write(&id).await?;
        let mut rule = guard
            .rules
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))?;
        rule.active = active;
        let event = Event::RuleUpdated { rule: rule.clone() };
        self.persist_and_apply(gate, guard, event).await?;
        Ok(rule)
    }

    /// Remove a rule. Returns the owning advisor id.
    pub async fn remove_rule(&self, id: Ulid) -> Result<Ulid, LedgerError> {
        let gate = self.commit_gate.clone().read_owned().await;
        let guard = self.resolve_entity_write(&id).await?;
        if !guard.rules.iter().any(|r| r.id == id) {
            return Err(LedgerError::NotFound(id));
        }
        let advisor_id = guard.profile.id;
        let event = Event::RuleRemoved { id, advisor_id };
        self.persist_and_apply(gate, guard, event).await?;
        Ok(advisor_id)
    }

    /// Constraint-guarded insert: the overlap check and the append happen under
    /// the advisor's write guard, so no two overlapping `Booked` entries can commit.
    pub async fn insert_booking(&self, booking: Booking) -> Result<Booking, LedgerError> {
        validate_booking(&booking)?;
        let st = self
            .get_advisor(&booking.advisor_id)
            .ok_or(LedgerError::NotFound(booking.advisor_id))?;
        let gate = self.commit_gate.clone().read_owned().await;
        let guard = st.write_owned().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ADVISOR {
            return Err(LedgerError::LimitExceeded("too many bookings on advisor"));
        }
        if self.entity_to_advisor.contains_key(&booking.id) {
            return Err(LedgerError::AlreadyExists(booking.id));
        }
        check_no_conflict(&guard, &booking.span())?;

        let event = Event::BookingInserted { booking: booking.clone() };
        self.persist_and_apply(gate, guard, event).await?;
        Ok(booking)
    }

    /// Lifecycle transition (`Booked` → `Completed` / `Cancelled`). Returns the updated booking.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, LedgerError> {
        let gate = self.commit_gate.clone().read_owned().await;
        let guard = self.resolve_entity_write(&id).await?;
        let current = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))?;
        if !current.status.can_become(status) {
            return Err(LedgerError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }
        let advisor_id = guard.profile.id;
        let event = Event::BookingStatusChanged { id, advisor_id, status };
        self.persist_and_apply(gate, guard, event).await?;
        Ok(Booking { status, ..current })
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), LedgerError> {
        let _gate = self.commit_gate.write().await;

        let mut ids: Vec<Ulid> = self.advisors.iter().map(|e| *e.key()).collect();
        // ULIDs sort by creation time, which keeps the rewritten log in a stable order.
        ids.sort();

        let mut events = Vec::new();
        for id in ids {
            let Some(st) = self.get_advisor(&id) else { continue };
            let guard = st.read().await;
            events.push(Event::AdvisorRegistered {
                id,
                name: guard.profile.name.clone(),
                clock: guard.profile.clock,
            });
            events.extend(guard.rules.iter().map(|r| Event::RuleAdded { rule: r.clone() }));
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingInserted { booking: b.clone() }),
            );
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| LedgerError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!(events = count, "ledger compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, LedgerError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| LedgerError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::Unavailable("WAL writer dropped response".into()))
    }
}
