mod availability;
mod conflict;
mod error;
mod mutations;
mod policy;
mod queries;
pub mod store;
mod sweep;

pub use availability::{blocked_ranges, merge_overlapping};
pub use conflict::{check_bookable, Candidate};
pub use error::{ConflictReason, EngineError};
pub use policy::{refund_amount, refund_percentage, total_price};
pub use store::{
    CancellationPolicyStore, InMemoryStore, PropertyStore, ReservationStore, StoreError, UserDirectory,
};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;
use ulid::Ulid;

use crate::auth::Role;
use crate::clock::Clock;
use crate::gateway::{GatewayError, PaymentGateway};
use crate::locks::KeyedLocks;
use crate::model::*;
use crate::notify::{Notification, NotificationSink};
use crate::observability;

/// Tunables the engine reads on every operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Used when a country has no policy of its own.
    pub default_policy: CancellationPolicy,
    /// Days an Approved reservation may stay unpaid before the sweeper cancels it.
    pub grace_period_days: i64,
    pub gateway_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_policy: CancellationPolicy {
                window_days: 5,
                refund_percentage: 50.0,
            },
            grace_period_days: 3,
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the engine talks to but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub reservations: Arc<dyn ReservationStore>,
    pub properties: Arc<dyn PropertyStore>,
    pub policies: Arc<dyn CancellationPolicyStore>,
    pub users: Arc<dyn UserDirectory>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// All four store roles served by one `InMemoryStore`.
    pub fn in_memory(
        store: Arc<InMemoryStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reservations: store.clone(),
            properties: store.clone(),
            policies: store.clone(),
            users: store,
            gateway,
            notifier,
            clock,
        }
    }
}

/// Reservation lifecycle controller.
///
/// Create and approve for one property are serialized by `property_locks`, so
/// the binding-overlap check and the write it guards cannot interleave with
/// another booking of the same property. Every transition of one reservation
/// holds its entry in `reservation_locks` from the first read to the status
/// write, including any gateway call in between. When both are needed the
/// property lock is taken first.
pub struct Engine {
    reservations: Arc<dyn ReservationStore>,
    properties: Arc<dyn PropertyStore>,
    policies: Arc<dyn CancellationPolicyStore>,
    users: Arc<dyn UserDirectory>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    property_locks: KeyedLocks,
    reservation_locks: KeyedLocks,
}

impl Engine {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        let Collaborators {
            reservations,
            properties,
            policies,
            users,
            gateway,
            notifier,
            clock,
        } = collaborators;
        Self {
            reservations,
            properties,
            policies,
            users,
            gateway,
            notifier,
            clock,
            settings,
            property_locks: KeyedLocks::new(),
            reservation_locks: KeyedLocks::new(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Drop lock entries nobody holds. Returns how many went away.
    pub fn prune_idle_locks(&self) -> usize {
        self.property_locks.prune_idle() + self.reservation_locks.prune_idle()
    }

    async fn load_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        match self.reservations.find_by_id(id).await {
            Ok(r) => Ok(r),
            Err(StoreError::NotFound(_)) => Err(EngineError::not_found("reservation", id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_property(&self, id: Ulid) -> Result<Property, EngineError> {
        match self.properties.find_by_id(id).await {
            Ok(p) => Ok(p),
            Err(StoreError::NotFound(_)) => Err(EngineError::not_found("property", id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Run a gateway call under the configured timeout.
    async fn call_gateway(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<(), GatewayError>>,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.settings.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.settings.gateway_timeout)),
        };
        metrics::histogram!(observability::GATEWAY_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
        let status = if outcome.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::GATEWAY_CALLS_TOTAL, "op" => op, "status" => status).increment(1);
        outcome.map_err(|e| {
            warn!("gateway {op} failed: {e}");
            EngineError::Gateway(e)
        })
    }

    /// Fire and forget. A failed notification never fails the caller.
    fn notify(&self, recipient: &str, message: &Notification) {
        if let Err(e) = self.notifier.notify(recipient, message) {
            metrics::counter!(observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
            warn!("notification to {recipient} failed: {e}");
        }
    }

    async fn notify_role(&self, role: Role, message: &Notification) {
        match self.users.emails_with_role(role).await {
            Ok(emails) => {
                for email in &emails {
                    self.notify(email, message);
                }
            }
            Err(e) => warn!("cannot list {role} users for notification: {e}"),
        }
    }

    async fn notify_owner(&self, property_id: Ulid, message: &Notification) {
        match self.load_property(property_id).await {
            Ok(p) => self.notify(&p.owner, message),
            Err(e) => warn!("cannot notify owner of property {property_id}: {e}"),
        }
    }
}

pub(crate) fn count_transition(to: ReservationStatus) {
    metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
}
