use chrono::Duration;
use tracing::{debug, error, info};

use crate::model::*;
use crate::notify::Notification;
use crate::observability;

use super::{count_transition, Engine, EngineError};

impl Engine {
    /// Cancel every reservation approved more than the grace period ago and
    /// still unpaid. No refund is issued.
    ///
    /// Each tenant is notified as soon as their reservation is cancelled.
    /// Owners hear once per affected property, also when a store failure cuts
    /// the run short; the cancellations made before the failure are logged.
    pub async fn run_auto_cancel_sweep(&self) -> Result<SweepReport, EngineError> {
        let now = self.now();
        let cutoff = now - Duration::days(self.settings.grace_period_days);
        let stale = self.reservations.find_stale_approved(cutoff).await?;

        let mut report = SweepReport::default();
        // First expired reservation per property, for the owner notice.
        let mut owners = Vec::new();
        let mut failure = None;
        for r in stale {
            let _reservation = self.reservation_locks.lock(r.id).await;
            let swapped = match self
                .reservations
                .update_status(r.id, ReservationStatus::Approved, ReservationStatus::Cancelled, now)
                .await
            {
                Ok(swapped) => swapped,
                Err(e) => {
                    failure = Some((r.id, EngineError::from(e)));
                    break;
                }
            };
            if !swapped {
                // Paid or cancelled since it was selected.
                debug!("sweep skipped {}", r.id);
                continue;
            }
            count_transition(ReservationStatus::Cancelled);
            report.cancelled.push(r.id);
            let notice = Notification::ReservationExpired {
                reservation_id: r.id,
                property_id: r.property_id,
            };
            self.notify(&r.email, &notice);
            if !report.properties.contains(&r.property_id) {
                report.properties.push(r.property_id);
                owners.push((r.property_id, notice));
            }
        }

        metrics::counter!(observability::SWEEP_CANCELLED_TOTAL).increment(report.cancelled.len() as u64);
        for (property_id, notice) in &owners {
            self.notify_owner(*property_id, notice).await;
        }

        if let Some((id, e)) = failure {
            error!(
                "auto-cancel sweep stopped at {id}: {e}; already cancelled {:?}",
                report.cancelled
            );
            return Err(e);
        }
        if !report.is_empty() {
            info!(
                "auto-cancel sweep cancelled {} reservations on {} properties",
                report.cancelled.len(),
                report.properties.len()
            );
        }
        Ok(report)
    }
}
