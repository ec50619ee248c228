use std::io;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::auth::Role;
use crate::locks::KeyedLocks;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no record with id {0}")]
    NotFound(Ulid),
    #[error("journal write failed: {0}")]
    Journal(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn create(&self, reservation: Reservation) -> Result<Reservation, StoreError>;
    async fn find_by_id(&self, id: Ulid) -> Result<Reservation, StoreError>;
    async fn find_by_property_and_status(
        &self,
        property_id: Ulid,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError>;
    async fn find_by_tenant_and_property(
        &self,
        email: &str,
        property_id: Ulid,
    ) -> Result<Vec<Reservation>, StoreError>;
    async fn find_filtered(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, StoreError>;
    /// Compare-and-set on status. `Ok(false)` when the current status is not `expected`.
    /// Moving to `Approved` also stamps `approved_at = at`.
    async fn update_status(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        new: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    /// Sets `check_in` unless already set.
    async fn record_check_in(&self, id: Ulid, at: DateTime<Utc>) -> Result<bool, StoreError>;
    /// Sets `check_out` only after a check-in and only once.
    async fn record_check_out(&self, id: Ulid, at: DateTime<Utc>) -> Result<bool, StoreError>;
    async fn delete(&self, id: Ulid) -> Result<bool, StoreError>;
    /// Approved reservations whose `approved_at` is strictly before `older_than`.
    async fn find_stale_approved(&self, older_than: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError>;
}

#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn find_by_id(&self, id: Ulid) -> Result<Property, StoreError>;
    async fn is_pending_payment(&self, id: Ulid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CancellationPolicyStore: Send + Sync {
    /// `Ok(None)` when the country has no policy of its own.
    async fn lookup(&self, country: &str) -> Result<Option<CancellationPolicy>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn emails_with_role(&self, role: Role) -> Result<Vec<String>, StoreError>;
}

// ── Group-commit journal channel ─────────────────────────

enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Record, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Blocks for the first append, drains whatever else is queued,
/// then fsyncs the whole batch once and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { record, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(record, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    debug!("journal writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so stale bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

// ── In-memory store ──────────────────────────────────────

/// DashMap-backed implementation of every store trait.
///
/// With a journal (`open`), each mutation is appended to the WAL before it is
/// applied, so a restart replays to the same state. Writes to one record are
/// serialized by a per-id lock; compaction takes the exclusive side of
/// `compaction` so no append lands between the snapshot and the swap.
pub struct InMemoryStore {
    properties: DashMap<Ulid, Property>,
    reservations: DashMap<Ulid, Reservation>,
    by_property: DashMap<Ulid, Vec<Ulid>>,
    policies: DashMap<String, CancellationPolicy>,
    users: DashMap<String, Vec<Role>>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    compaction: RwLock<()>,
    record_locks: KeyedLocks,
    seed_lock: Mutex<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store, nothing journaled.
    pub fn new() -> Self {
        Self {
            properties: DashMap::new(),
            reservations: DashMap::new(),
            by_property: DashMap::new(),
            policies: DashMap::new(),
            users: DashMap::new(),
            wal_tx: None,
            compaction: RwLock::new(()),
            record_locks: KeyedLocks::new(),
            seed_lock: Mutex::new(()),
        }
    }

    /// Replay the journal at `path` and keep appending to it. Must run inside a
    /// tokio runtime: the writer is a spawned task.
    pub fn open(path: &Path) -> io::Result<Self> {
        let records = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Self::new();
        for record in &records {
            store.apply(record);
        }
        store.wal_tx = Some(wal_tx);
        info!(
            "store replayed {} records from {}: {} properties, {} reservations",
            records.len(),
            path.display(),
            store.properties.len(),
            store.reservations.len()
        );
        Ok(store)
    }

    fn apply(&self, record: &Record) {
        match record {
            Record::PropertyUpserted(property) => {
                self.properties.insert(property.id, property.clone());
            }
            Record::PendingPaymentSet { property_id, pending } => {
                if let Some(mut p) = self.properties.get_mut(property_id) {
                    p.is_pending_payment = *pending;
                }
            }
            Record::PolicySet { country, policy } => {
                self.policies.insert(country.clone(), *policy);
            }
            Record::UserRegistered { email, roles } => {
                self.users.insert(email.clone(), roles.clone());
            }
            Record::ReservationCreated(r) => {
                self.by_property.entry(r.property_id).or_default().push(r.id);
                self.reservations.insert(r.id, r.clone());
            }
            Record::StatusChanged { id, status, at } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.status = *status;
                    if *status == ReservationStatus::Approved {
                        r.approved_at = Some(*at);
                    }
                }
            }
            Record::CheckedIn { id, at } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.check_in = Some(*at);
                }
            }
            Record::CheckedOut { id, at } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.check_out = Some(*at);
                }
            }
            Record::ReservationRemoved { id } => {
                if let Some((_, r)) = self.reservations.remove(id)
                    && let Some(mut ids) = self.by_property.get_mut(&r.property_id)
                {
                    ids.retain(|x| x != id);
                }
            }
        }
    }

    async fn journal(&self, record: &Record) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    /// Journal, then apply. Callers hold whatever lock orders writes to the record.
    async fn commit(&self, record: Record) -> Result<(), StoreError> {
        self.journal(&record).await?;
        self.apply(&record);
        Ok(())
    }

    // ── Seeding (property service, admin tooling) ────────

    pub async fn upsert_property(&self, property: Property) -> Result<(), StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.record_locks.lock(property.id).await;
        self.commit(Record::PropertyUpserted(property)).await
    }

    pub async fn set_pending_payment(&self, property_id: Ulid, pending: bool) -> Result<(), StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.record_locks.lock(property_id).await;
        if !self.properties.contains_key(&property_id) {
            return Err(StoreError::NotFound(property_id));
        }
        self.commit(Record::PendingPaymentSet { property_id, pending }).await
    }

    pub async fn set_policy(&self, country: &str, policy: CancellationPolicy) -> Result<(), StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.seed_lock.lock().await;
        self.commit(Record::PolicySet {
            country: country.to_string(),
            policy,
        })
        .await
    }

    pub async fn register_user(&self, email: &str, roles: Vec<Role>) -> Result<(), StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.seed_lock.lock().await;
        self.commit(Record::UserRegistered {
            email: email.to_string(),
            roles,
        })
        .await
    }

    // ── Journal maintenance ──────────────────────────────

    /// Minimal record set that rebuilds the current state.
    fn snapshot(&self) -> Vec<Record> {
        let mut records = Vec::new();
        records.extend(self.properties.iter().map(|e| Record::PropertyUpserted(e.value().clone())));
        records.extend(self.policies.iter().map(|e| Record::PolicySet {
            country: e.key().clone(),
            policy: *e.value(),
        }));
        records.extend(self.users.iter().map(|e| Record::UserRegistered {
            email: e.key().clone(),
            roles: e.value().clone(),
        }));
        let mut reservations: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        records.extend(reservations.into_iter().map(Record::ReservationCreated));
        records
    }

    /// Rewrite the journal as a snapshot. No-op for a volatile store.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _exclusive = self.compaction.write().await;
        let records = self.snapshot();
        let count = records.len();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))?;
        info!("journal compacted to {count} records");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx.send(WalCommand::AppendsSinceCompact { response: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    fn reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn reservations_of(&self, property_id: Ulid) -> Vec<Reservation> {
        let Some(ids) = self.by_property.get(&property_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.reservations.get(id).map(|r| r.value().clone()))
            .collect()
    }
}

/// Creation order; ids break ties between reservations made in the same instant.
fn sorted(mut rs: Vec<Reservation>) -> Vec<Reservation> {
    rs.sort_by_key(|r| (r.created_at, r.id));
    rs
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn create(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.record_locks.lock(reservation.id).await;
        self.commit(Record::ReservationCreated(reservation.clone())).await?;
        Ok(reservation)
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.reservation(id)
    }

    async fn find_by_property_and_status(
        &self,
        property_id: Ulid,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut found = self.reservations_of(property_id);
        found.retain(|r| statuses.contains(&r.status));
        Ok(sorted(found))
    }

    async fn find_by_tenant_and_property(
        &self,
        email: &str,
        property_id: Ulid,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut found = self.reservations_of(property_id);
        found.retain(|r| r.email == email);
        Ok(sorted(found))
    }

    async fn find_filtered(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, StoreError> {
        let found = match filter.property_id {
            Some(pid) => self.reservations_of(pid),
            None => self.reservations.iter().map(|e| e.value().clone()).collect(),
        };
        Ok(sorted(found.into_iter().filter(|r| filter.matches(r)).collect()))
    }

    async fn update_status(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        new: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.record_locks.lock(id).await;
        let current = self.reservation(id)?.status;
        if current != expected {
            debug!("status CAS on {id} lost: expected {expected}, found {current}");
            return Ok(false);
        }
        self.commit(Record::StatusChanged { id, status: new, at }).await?;
        Ok(true)
    }

    async fn record_check_in(&self, id: Ulid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.record_locks.lock(id).await;
        if self.reservation(id)?.check_in.is_some() {
            return Ok(false);
        }
        self.commit(Record::CheckedIn { id, at }).await?;
        Ok(true)
    }

    async fn record_check_out(&self, id: Ulid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.record_locks.lock(id).await;
        let r = self.reservation(id)?;
        if r.check_in.is_none() || r.check_out.is_some() {
            return Ok(false);
        }
        self.commit(Record::CheckedOut { id, at }).await?;
        Ok(true)
    }

    async fn delete(&self, id: Ulid) -> Result<bool, StoreError> {
        let _c = self.compaction.read().await;
        let _g = self.record_locks.lock(id).await;
        if !self.reservations.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Record::ReservationRemoved { id }).await?;
        Ok(true)
    }

    async fn find_stale_approved(&self, older_than: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        let found = self
            .reservations
            .iter()
            .filter(|e| {
                let r = e.value();
                r.status == ReservationStatus::Approved && r.approved_at.is_some_and(|at| at < older_than)
            })
            .map(|e| e.value().clone())
            .collect();
        Ok(sorted(found))
    }
}

#[async_trait]
impl PropertyStore for InMemoryStore {
    async fn find_by_id(&self, id: Ulid) -> Result<Property, StoreError> {
        self.properties
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn is_pending_payment(&self, id: Ulid) -> Result<bool, StoreError> {
        self.properties
            .get(&id)
            .map(|p| p.is_pending_payment)
            .ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl CancellationPolicyStore for InMemoryStore {
    async fn lookup(&self, country: &str) -> Result<Option<CancellationPolicy>, StoreError> {
        Ok(self.policies.get(country).map(|p| *p.value()))
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn emails_with_role(&self, role: Role) -> Result<Vec<String>, StoreError> {
        let mut emails: Vec<String> = self
            .users
            .iter()
            .filter(|e| e.value().contains(&role))
            .map(|e| e.key().clone())
            .collect();
        emails.sort();
        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use std::path::PathBuf;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staykeep_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 9, 0, 0).unwrap()
    }

    fn reservation(property_id: Ulid, status: ReservationStatus) -> Reservation {
        let d = |day| NaiveDate::from_ymd_opt(2024, 7, day).unwrap();
        Reservation {
            id: Ulid::new(),
            property_id,
            document: "X1".into(),
            name: "Ana".into(),
            last_name: "Lima".into(),
            email: "ana@example.com".into(),
            phone: "555".into(),
            address: "Main St".into(),
            nationality: "UY".into(),
            country: "UY".into(),
            adults: 2,
            minors: 0,
            stay: DateRange::new(d(1), d(4)).unwrap(),
            status,
            check_in: None,
            check_out: None,
            approved_at: None,
            created_at: at(1),
        }
    }

    #[tokio::test]
    async fn status_cas_only_from_expected() {
        use ReservationStatus::*;
        let store = InMemoryStore::new();
        let r = store.create(reservation(Ulid::new(), Pending)).await.unwrap();
        assert!(!store.update_status(r.id, Approved, Paid, at(2)).await.unwrap());
        assert!(store.update_status(r.id, Pending, Approved, at(2)).await.unwrap());
        let now = ReservationStore::find_by_id(&store, r.id).await.unwrap();
        assert_eq!(now.status, Approved);
        assert_eq!(now.approved_at, Some(at(2)));

        let missing = Ulid::new();
        assert_eq!(
            store.update_status(missing, Pending, Approved, at(2)).await,
            Err(StoreError::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn check_in_and_out_are_set_once() {
        let store = InMemoryStore::new();
        let r = store.create(reservation(Ulid::new(), ReservationStatus::Paid)).await.unwrap();
        assert!(!store.record_check_out(r.id, at(3)).await.unwrap(), "no check-out before check-in");
        assert!(store.record_check_in(r.id, at(2)).await.unwrap());
        assert!(!store.record_check_in(r.id, at(3)).await.unwrap());
        assert!(store.record_check_out(r.id, at(4)).await.unwrap());
        assert!(!store.record_check_out(r.id, at(5)).await.unwrap());
        let r = ReservationStore::find_by_id(&store, r.id).await.unwrap();
        assert_eq!((r.check_in, r.check_out), (Some(at(2)), Some(at(4))));
    }

    #[tokio::test]
    async fn property_index_follows_delete() {
        let store = InMemoryStore::new();
        let pid = Ulid::new();
        let a = store.create(reservation(pid, ReservationStatus::Pending)).await.unwrap();
        let b = store.create(reservation(pid, ReservationStatus::Approved)).await.unwrap();
        store.create(reservation(Ulid::new(), ReservationStatus::Approved)).await.unwrap();

        let binding = store.find_by_property_and_status(pid, &ReservationStatus::BINDING).await.unwrap();
        assert_eq!(binding.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id]);

        assert!(store.delete(a.id).await.unwrap());
        assert!(!store.delete(a.id).await.unwrap());
        let all = store.find_by_tenant_and_property("ana@example.com", pid).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn stale_approved_uses_approval_time() {
        use ReservationStatus::*;
        let store = InMemoryStore::new();
        let old = store.create(reservation(Ulid::new(), Pending)).await.unwrap();
        let fresh = store.create(reservation(Ulid::new(), Pending)).await.unwrap();
        store.update_status(old.id, Pending, Approved, at(1)).await.unwrap();
        store.update_status(fresh.id, Pending, Approved, at(5)).await.unwrap();

        let stale = store.find_stale_approved(at(2)).await.unwrap();
        assert_eq!(stale.iter().map(|r| r.id).collect::<Vec<_>>(), vec![old.id]);
        // approved exactly at the cutoff is not stale yet
        assert!(store.find_stale_approved(at(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn policy_and_directory_lookups() {
        let store = InMemoryStore::new();
        let policy = CancellationPolicy { window_days: 5, refund_percentage: 20.0 };
        store.set_policy("UY", policy).await.unwrap();
        assert_eq!(store.lookup("UY").await.unwrap(), Some(policy));
        assert_eq!(store.lookup("AR").await.unwrap(), None);

        store.register_user("root@example.com", vec![Role::Admin]).await.unwrap();
        store.register_user("ops@example.com", vec![Role::Operator, Role::Admin]).await.unwrap();
        store.register_user("t@example.com", vec![Role::Tenant]).await.unwrap();
        assert_eq!(
            store.emails_with_role(Role::Admin).await.unwrap(),
            vec!["ops@example.com".to_string(), "root@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn pending_payment_flag_requires_property() {
        let store = InMemoryStore::new();
        let missing = Ulid::new();
        assert_eq!(store.set_pending_payment(missing, true).await, Err(StoreError::NotFound(missing)));
        assert_eq!(store.is_pending_payment(missing).await, Err(StoreError::NotFound(missing)));
    }

    #[tokio::test]
    async fn journal_replays_after_restart() {
        use ReservationStatus::*;
        let path = tmp_path("replay.wal");
        let pid = Ulid::new();
        let (kept, removed) = {
            let store = InMemoryStore::open(&path).unwrap();
            store.set_policy("UY", CancellationPolicy { window_days: 2, refund_percentage: 10.0 }).await.unwrap();
            let kept = store.create(reservation(pid, Pending)).await.unwrap();
            let removed = store.create(reservation(pid, Pending)).await.unwrap();
            store.update_status(kept.id, Pending, Approved, at(3)).await.unwrap();
            store.record_check_in(kept.id, at(4)).await.unwrap();
            store.delete(removed.id).await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 6);
            (kept, removed)
        };

        let store = InMemoryStore::open(&path).unwrap();
        let r = ReservationStore::find_by_id(&store, kept.id).await.unwrap();
        assert_eq!(r.status, Approved);
        assert_eq!(r.approved_at, Some(at(3)));
        assert_eq!(r.check_in, Some(at(4)));
        assert!(ReservationStore::find_by_id(&store, removed.id).await.is_err());
        assert_eq!(store.lookup("UY").await.unwrap().map(|p| p.window_days), Some(2));
        assert_eq!(store.find_by_tenant_and_property("ana@example.com", pid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn compaction_keeps_state_and_resets_counter() {
        use ReservationStatus::*;
        let path = tmp_path("compact.wal");
        let id = {
            let store = InMemoryStore::open(&path).unwrap();
            let r = store.create(reservation(Ulid::new(), Pending)).await.unwrap();
            store.update_status(r.id, Pending, Approved, at(2)).await.unwrap();
            store.update_status(r.id, Approved, Paid, at(3)).await.unwrap();
            let before = std::fs::metadata(&path).unwrap().len();
            store.compact_wal().await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 0);
            assert!(std::fs::metadata(&path).unwrap().len() < before);
            store.record_check_in(r.id, at(4)).await.unwrap();
            r.id
        };

        let store = InMemoryStore::open(&path).unwrap();
        let r = ReservationStore::find_by_id(&store, id).await.unwrap();
        assert_eq!(r.status, Paid);
        assert_eq!(r.approved_at, Some(at(2)));
        assert_eq!(r.check_in, Some(at(4)));
    }

    #[tokio::test]
    async fn volatile_store_ignores_journal_ops() {
        let store = InMemoryStore::new();
        store.compact_wal().await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 0);
    }
}
