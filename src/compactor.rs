use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ledger::Ledger;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the ledger WAL once `threshold` appends accumulate.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&ledger, threshold).await;
    }
}

/// Returns true if a compaction ran.
pub async fn compact_if_due(ledger: &Ledger, threshold: u64) -> bool {
    let appends = match ledger.wal_appends_since_compact().await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "cannot read WAL append count");
            return false;
        }
    };
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return false;
    }
    match ledger.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "WAL compaction failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{NaiveTime, Weekday};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotkeeper_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let ledger = Ledger::open(&path).unwrap();

        let aid = Ulid::new();
        ledger.register_advisor(aid, None, LocalClock::UTC).await.unwrap();
        let rule = AvailabilityRule {
            id: Ulid::new(),
            advisor_id: aid,
            day_of_week: Weekday::Mon,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            active: true,
        };
        ledger.add_rule(rule.clone()).await.unwrap();
        for active in [false, true, false, true] {
            ledger.set_rule_active(rule.id, active).await.unwrap();
        }
        assert_eq!(ledger.wal_appends_since_compact().await.unwrap(), 6);

        assert!(!compact_if_due(&ledger, 10).await);
        assert!(compact_if_due(&ledger, 5).await);
        assert_eq!(ledger.wal_appends_since_compact().await.unwrap(), 0);
        assert!(!compact_if_due(&ledger, 5).await);
        drop(ledger);

        let reopened = Ledger::open(&path).unwrap();
        let schedule = reopened.schedule(aid).await.unwrap();
        assert_eq!(schedule.rules, vec![rule]);
    }

    #[tokio::test]
    async fn dead_writer_is_never_due() {
        let ledger = Ledger::without_writer();
        assert!(!compact_if_due(&ledger, 0).await);
    }
}
