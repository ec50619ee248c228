use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::engine::{Engine, InMemoryStore};
use crate::observability;

/// Background task that cancels stale approved-but-unpaid reservations.
///
/// The first tick fires immediately, so a restarted daemon catches up at once.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let started = Instant::now();
        match engine.run_auto_cancel_sweep().await {
            Ok(report) if report.is_empty() => {
                debug!("auto-cancel sweep: nothing stale");
                metrics::counter!(observability::SWEEP_RUNS_TOTAL, "status" => "ok").increment(1);
            }
            Ok(report) => {
                info!("auto-cancel sweep cancelled {:?}", report.cancelled);
                metrics::counter!(observability::SWEEP_RUNS_TOTAL, "status" => "ok").increment(1);
            }
            Err(e) => {
                error!("auto-cancel sweep failed: {e}");
                metrics::counter!(observability::SWEEP_RUNS_TOTAL, "status" => "error").increment(1);
            }
        }
        metrics::histogram!(observability::SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        let pruned = engine.prune_idle_locks();
        if pruned > 0 {
            debug!("pruned {pruned} idle lock entries");
        }
    }
}

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if store.wal_appends_since_compact().await < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1),
            Err(e) => {
                error!("journal compaction failed: {e}");
                metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, Role};
    use crate::clock::{Clock, ManualClock};
    use crate::engine::{Collaborators, EngineSettings};
    use crate::gateway::{GatewayError, PaymentGateway};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::path::PathBuf;
    use ulid::Ulid;

    struct AcceptAll;

    #[async_trait]
    impl PaymentGateway for AcceptAll {
        async fn charge(&self, _: f64, _: &CardInformation) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn refund(&self, _: f64) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staykeep_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_cancels_stale_reservation() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()));
        let property = Property {
            id: Ulid::new(),
            owner: "owner@example.com".into(),
            name: "Casa".into(),
            booking_price: 100,
            adult_quantity: 2,
            kid_quantity: 0,
            unavailable_dates: vec![],
            paid: true,
            is_pending_payment: false,
        };
        store.upsert_property(property.clone()).await.unwrap();
        let engine = Arc::new(Engine::new(
            Collaborators::in_memory(store.clone(), Arc::new(AcceptAll), Arc::new(NotifyHub::new()), clock.clone()),
            EngineSettings::default(),
        ));

        let tenant = Identity::new("t1", "ana@example.com", vec![Role::Tenant]);
        let admin = Identity::new("a1", "admin@example.com", vec![Role::Admin]);
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let r = engine
            .create_reservation(
                &tenant,
                NewReservation {
                    property_id: property.id,
                    document: "D".into(),
                    name: "Ana".into(),
                    last_name: "Lima".into(),
                    email: "ana@example.com".into(),
                    phone: "1".into(),
                    address: "A".into(),
                    nationality: "UY".into(),
                    country: "UY".into(),
                    adults: 1,
                    minors: 0,
                    reserved_from: Some(d(7, 1)),
                    reserved_until: Some(d(7, 4)),
                },
            )
            .await
            .unwrap();
        engine.approve_reservation(&admin, r.id).await.unwrap();
        clock.advance(chrono::Duration::days(4));

        let sweeper = tokio::spawn(run_sweeper(engine.clone(), Duration::from_secs(3600)));
        // The first tick is immediate; wait for the status to flip.
        let mut cancelled = false;
        for _ in 0..100 {
            if engine.get_reservation(&admin, r.id).await.unwrap().status == ReservationStatus::Cancelled {
                cancelled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();
        assert!(cancelled, "sweeper should cancel the stale reservation");
        assert_eq!(clock.now().date_naive(), d(6, 19));
    }

    #[tokio::test]
    async fn compactor_runs_past_threshold() {
        let path = test_wal_path("compactor.wal");
        let store = Arc::new(InMemoryStore::open(&path).unwrap());
        for country in ["UY", "AR", "BR"] {
            let policy = CancellationPolicy {
                window_days: 1,
                refund_percentage: 10.0,
            };
            store.set_policy(country, policy).await.unwrap();
            store.set_policy(country, policy).await.unwrap();
        }
        assert_eq!(store.wal_appends_since_compact().await, 6);

        let compactor = tokio::spawn(run_compactor(store.clone(), 5, Duration::from_secs(3600)));
        let mut compacted = false;
        for _ in 0..100 {
            if store.wal_appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        compactor.abort();
        assert!(compacted);
    }
}
