mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::LedgerError;
pub use store::{BookingLedger, RuleStore};

pub(crate) use conflict::{validate_duration, validate_external_id};

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{
    mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedAdvisorState = Arc<RwLock<AdvisorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        // Non-append commands run only after the batch ahead of them is durable.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_err = batch
        .iter()
        .find_map(|(event, _)| wal.append_buffered(event).err());
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// The durable booking ledger and availability rule store.
///
/// Each advisor's rules and bookings live behind one `RwLock`; holding its write
/// guard across check + WAL append + apply is what makes inserts atomic.
///
/// Appends run on a detached commit task that owns the guards, so a caller
/// dropped mid-write never leaves the WAL ahead of memory.
pub struct Ledger {
    pub(super) advisors: Arc<DashMap<Ulid, SharedAdvisorState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: rule/booking id → advisor id.
    pub(super) entity_to_advisor: Arc<DashMap<Ulid, Ulid>>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an in-flight append.
    pub(super) commit_gate: Arc<RwLock<()>>,
    /// Serializes advisor registration (check + append + insert).
    pub(super) registry: Arc<Mutex<()>>,
}

/// Write event to WAL via the background group-commit writer.
async fn append_event(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), LedgerError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| LedgerError::Unavailable("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| LedgerError::Unavailable("WAL writer dropped response".into()))?
        .map_err(|e| LedgerError::Unavailable(e.to_string()))
}

/// Await a detached commit task. The task keeps running if this future is dropped.
async fn join_commit<T>(
    task: tokio::task::JoinHandle<Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
    task.await
        .map_err(|e| LedgerError::Unavailable(format!("commit task failed: {e}")))?
}

/// Apply an event to an advisor's state (caller holds the write lock).
fn apply_to_advisor(st: &mut AdvisorState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AdvisorUpdated { name, clock, .. } => {
            st.profile.name = name.clone();
            st.profile.clock = *clock;
        }
        Event::RuleAdded { rule } | Event::RuleUpdated { rule } => {
            entity_map.insert(rule.id, rule.advisor_id);
            st.upsert_rule(rule.clone());
        }
        Event::RuleRemoved { id, .. } => {
            st.remove_rule(*id);
            entity_map.remove(id);
        }
        Event::BookingInserted { booking } => {
            entity_map.insert(booking.id, booking.advisor_id);
            st.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = st.booking_mut(*id) {
                b.status = *status;
            }
        }
        // Registration is handled at the map level.
        Event::AdvisorRegistered { .. } => {}
    }
}

impl Ledger {
    /// Open the ledger at `wal_path`, replaying its history. Must run inside a Tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::open(wal_path)?;
        let entity_to_advisor = Arc::new(DashMap::new());

        let mut states: HashMap<Ulid, AdvisorState> = HashMap::new();
        for event in &events {
            match event {
                Event::AdvisorRegistered { id, name, clock } => {
                    states.insert(
                        *id,
                        AdvisorState::new(AdvisorProfile {
                            id: *id,
                            name: name.clone(),
                            clock: *clock,
                        }),
                    );
                }
                other => {
                    if let Some(st) = states.get_mut(&other.advisor_id()) {
                        apply_to_advisor(st, other, &entity_to_advisor);
                    }
                }
            }
        }
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            advisors = states.len(),
            "ledger replayed"
        );

        let advisors = Arc::new(DashMap::new());
        for (id, st) in states {
            advisors.insert(id, Arc::new(RwLock::new(st)));
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            advisors,
            wal_tx,
            entity_to_advisor,
            commit_gate: Arc::new(RwLock::new(())),
            registry: Arc::new(Mutex::new(())),
        })
    }

    /// A ledger whose WAL writer is already gone; every write reports `Unavailable`.
    #[cfg(test)]
    pub(crate) fn without_writer() -> Self {
        let (wal_tx, _) = mpsc::channel(1);
        Self {
            advisors: Arc::default(),
            wal_tx,
            entity_to_advisor: Arc::default(),
            commit_gate: Arc::default(),
            registry: Arc::default(),
        }
    }

    pub fn get_advisor(&self, id: &Ulid) -> Option<SharedAdvisorState> {
        self.advisors.get(id).map(|e| e.value().clone())
    }

    pub fn advisor_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_advisor.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append then apply on a detached task that owns both guards until the
    /// apply lands.
    pub(super) async fn persist_and_apply(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        mut st: OwnedRwLockWriteGuard<AdvisorState>,
        event: Event,
    ) -> Result<(), LedgerError> {
        let wal_tx = self.wal_tx.clone();
        let entity_map = self.entity_to_advisor.clone();
        join_commit(tokio::spawn(async move {
            let _gate = gate;
            append_event(&wal_tx, &event).await?;
            apply_to_advisor(&mut st, &event, &entity_map);
            Ok(())
        }))
        .await
    }

    /// Register on a detached task that holds the gate and the registry lock until
    /// the advisor is in the map. The cap is checked under the same lock.
    pub(super) async fn persist_registration(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        profile: AdvisorProfile,
        limit: usize,
    ) -> Result<(), LedgerError> {
        let registry = self.registry.clone().lock_owned().await;
        let wal_tx = self.wal_tx.clone();
        let advisors = self.advisors.clone();
        join_commit(tokio::spawn(async move {
            let (_gate, _registry) = (gate, registry);
            if advisors.contains_key(&profile.id) {
                return Err(LedgerError::AlreadyExists(profile.id));
            }
            if advisors.len() >= limit {
                return Err(LedgerError::LimitExceeded("too many advisors"));
            }
            let event = Event::AdvisorRegistered {
                id: profile.id,
                name: profile.name.clone(),
                clock: profile.clock,
            };
            append_event(&wal_tx, &event).await?;
            advisors.insert(profile.id, Arc::new(RwLock::new(AdvisorState::new(profile))));
            Ok(())
        }))
        .await
    }

    /// Lookup entity → advisor, acquire its write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<AdvisorState>, LedgerError> {
        let advisor_id = self
            .advisor_for_entity(entity_id)
            .ok_or(LedgerError::NotFound(*entity_id))?;
        let st = self
            .get_advisor(&advisor_id)
            .ok_or(LedgerError::NotFound(advisor_id))?;
        Ok(st.write_owned().await)
    }
}
