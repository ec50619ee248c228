use chrono::Duration;
use tracing::info;
use ulid::Ulid;

use crate::auth::{require_owner, require_role, Identity, Role};
use crate::model::*;
use crate::notify::Notification;
use crate::observability;

use super::conflict::{check_bookable, validate_new_reservation};
use super::error::ConflictReason;
use super::policy::{refund_amount, refund_percentage, total_price};
use super::{count_transition, Engine, EngineError};

impl Engine {
    /// Book dates as a Pending reservation.
    ///
    /// The caller must be a tenant booking under their own email. The conflict
    /// check and the insert happen under the property lock.
    pub async fn create_reservation(
        &self,
        identity: &Identity,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        require_role(identity, &[Role::Tenant])?;
        require_owner(identity, &request.email)?;
        let candidate = validate_new_reservation(&request, self.today())?;

        let reservation = {
            let _property = self.property_locks.lock(request.property_id).await;
            let mut property = self.load_property(request.property_id).await?;
            // The flag is owned by the property payment flow; read it fresh.
            property.is_pending_payment = self.properties.is_pending_payment(property.id).await?;
            let binding = self
                .reservations
                .find_by_property_and_status(property.id, &ReservationStatus::BINDING)
                .await?;
            if let Err(e) = check_bookable(&property, &candidate, &binding) {
                if matches!(e, EngineError::Conflict(_)) {
                    metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
                }
                return Err(e);
            }

            let now = self.now();
            let NewReservation {
                property_id,
                document,
                name,
                last_name,
                email,
                phone,
                address,
                nationality,
                country,
                adults,
                minors,
                ..
            } = request;
            self.reservations
                .create(Reservation {
                    id: Ulid::new(),
                    property_id,
                    document,
                    name,
                    last_name,
                    email,
                    phone,
                    address,
                    nationality,
                    country,
                    adults,
                    minors,
                    stay: candidate.stay,
                    status: ReservationStatus::Pending,
                    check_in: None,
                    check_out: None,
                    approved_at: None,
                    created_at: now,
                })
                .await?
        };

        info!(
            "reservation {} created for property {} ({} to {})",
            reservation.id,
            reservation.property_id,
            reservation.reserved_from(),
            reservation.reserved_until()
        );
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);

        let notice = Notification::ReservationRequested {
            reservation_id: reservation.id,
            property_id: reservation.property_id,
        };
        self.notify_owner(reservation.property_id, &notice).await;
        self.notify_role(Role::Admin, &notice).await;
        Ok(reservation)
    }

    /// Pending to Approved. Re-checks binding overlap under the property lock,
    /// so of several Pending requests for the same dates only one can win.
    pub async fn approve_reservation(&self, identity: &Identity, id: Ulid) -> Result<Reservation, EngineError> {
        require_role(identity, &[Role::Admin])?;
        let property_id = self.load_reservation(id).await?.property_id;

        let _property = self.property_locks.lock(property_id).await;
        let _reservation = self.reservation_locks.lock(id).await;
        let current = self.load_reservation(id).await?;
        if current.status != ReservationStatus::Pending {
            return Err(EngineError::state(format!(
                "only Pending reservations can be approved, {id} is {}",
                current.status
            )));
        }
        let binding = self
            .reservations
            .find_by_property_and_status(property_id, &ReservationStatus::BINDING)
            .await?;
        if let Some(taken) = binding.iter().find(|r| r.id != id && r.stay.overlaps(&current.stay)) {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(ConflictReason::Reservation(taken.id)));
        }

        let now = self.now();
        if !self
            .reservations
            .update_status(id, ReservationStatus::Pending, ReservationStatus::Approved, now)
            .await?
        {
            return Err(EngineError::state(format!("reservation {id} changed during approval")));
        }
        info!("reservation {id} approved by {}", identity.email);
        count_transition(ReservationStatus::Approved);
        self.load_reservation(id).await
    }

    /// Tenant cancellation with refund. Returns the refunded percentage.
    ///
    /// The refund is requested first; the reservation is only marked Cancelled
    /// once the gateway confirms it.
    pub async fn cancel_reservation(&self, identity: &Identity, id: Ulid) -> Result<f64, EngineError> {
        require_role(identity, &[Role::Tenant])?;
        let _reservation = self.reservation_locks.lock(id).await;
        let current = self.load_reservation(id).await?;
        require_owner(identity, &current.email)?;

        match current.status {
            ReservationStatus::Cancelled => {
                return Err(EngineError::state(format!("reservation {id} is already cancelled")));
            }
            ReservationStatus::Pending => {
                return Err(EngineError::state(format!(
                    "reservation {id} is still Pending and cannot be cancelled"
                )));
            }
            ReservationStatus::Approved | ReservationStatus::Paid => {}
        }
        if current.check_in.is_some() {
            return Err(EngineError::state(format!("reservation {id} is already checked in")));
        }
        let now = self.now();
        let remaining = current.stay.starts_at() - now;
        if remaining <= Duration::zero() {
            return Err(EngineError::state(format!("reservation {id} has already started")));
        }

        let policy = self.resolve_policy(&current.country).await?;
        let percentage = refund_percentage(remaining, &policy);
        let property = self.load_property(current.property_id).await?;
        let amount = refund_amount(total_price(property.booking_price, &current.stay), percentage);

        self.call_gateway("refund", self.gateway.refund(amount)).await?;

        if !self
            .reservations
            .update_status(id, current.status, ReservationStatus::Cancelled, now)
            .await?
        {
            return Err(EngineError::state(format!("reservation {id} changed during cancellation")));
        }
        info!("reservation {id} cancelled, refunded {percentage}% ({amount})");
        count_transition(ReservationStatus::Cancelled);

        let notice = Notification::ReservationCancelled {
            reservation_id: id,
            property_id: property.id,
        };
        self.notify(&property.owner, &notice);
        Ok(percentage)
    }

    /// Hard delete, no refund. Only Pending and Approved reservations qualify.
    pub async fn remove_reservation(&self, identity: &Identity, id: Ulid) -> Result<(), EngineError> {
        require_role(identity, &[Role::Admin, Role::Operator])?;
        let _reservation = self.reservation_locks.lock(id).await;
        let current = self.load_reservation(id).await?;
        if !matches!(current.status, ReservationStatus::Pending | ReservationStatus::Approved) {
            return Err(EngineError::state(format!(
                "reservation {id} is {} and cannot be removed",
                current.status
            )));
        }
        if !self.reservations.delete(id).await? {
            return Err(EngineError::not_found("reservation", id));
        }
        info!("reservation {id} removed by {}", identity.email);
        metrics::counter!(observability::RESERVATIONS_REMOVED_TOTAL).increment(1);
        Ok(())
    }

    /// Record arrival. Allowed once, for Approved or Paid reservations, on any
    /// day from the first to the last day of the stay.
    pub async fn check_in(&self, identity: &Identity, id: Ulid) -> Result<Reservation, EngineError> {
        require_role(identity, &[Role::Tenant])?;
        let _reservation = self.reservation_locks.lock(id).await;
        let current = self.load_reservation(id).await?;
        require_owner(identity, &current.email)?;

        if current.check_in.is_some() {
            return Err(EngineError::state(format!("reservation {id} is already checked in")));
        }
        if !current.status.is_binding() {
            return Err(EngineError::state(format!(
                "reservation {id} is {} and cannot be checked in",
                current.status
            )));
        }
        let today = self.today();
        if !current.stay.contains_date(today) {
            return Err(EngineError::state(format!(
                "check-in on {today} is outside {} to {}",
                current.reserved_from(),
                current.reserved_until()
            )));
        }
        if !self.reservations.record_check_in(id, self.now()).await? {
            return Err(EngineError::state(format!("reservation {id} is already checked in")));
        }
        info!("reservation {id} checked in");
        self.load_reservation(id).await
    }

    /// Record departure. Requires a prior check-in; rejected once the last
    /// day of the stay has passed.
    pub async fn check_out(&self, identity: &Identity, id: Ulid) -> Result<Reservation, EngineError> {
        require_role(identity, &[Role::Tenant])?;
        let _reservation = self.reservation_locks.lock(id).await;
        let current = self.load_reservation(id).await?;
        require_owner(identity, &current.email)?;

        if current.check_out.is_some() {
            return Err(EngineError::state(format!("reservation {id} is already checked out")));
        }
        if current.check_in.is_none() {
            return Err(EngineError::state(format!("reservation {id} was never checked in")));
        }
        let today = self.today();
        if today > current.reserved_until() {
            return Err(EngineError::state(format!(
                "late check-out: stay ended on {}",
                current.reserved_until()
            )));
        }
        if !self.reservations.record_check_out(id, self.now()).await? {
            return Err(EngineError::state(format!("reservation {id} cannot be checked out")));
        }
        info!("reservation {id} checked out");
        self.load_reservation(id).await
    }

    /// Charge the full stay and move Approved to Paid.
    pub async fn pay_reservation(
        &self,
        identity: &Identity,
        id: Ulid,
        card: &CardInformation,
    ) -> Result<Reservation, EngineError> {
        require_role(identity, &[Role::Tenant])?;
        let _reservation = self.reservation_locks.lock(id).await;
        let current = self.load_reservation(id).await?;
        require_owner(identity, &current.email)?;

        if current.status != ReservationStatus::Approved {
            return Err(EngineError::state(format!(
                "only Approved reservations can be paid, {id} is {}",
                current.status
            )));
        }
        let property = self.load_property(current.property_id).await?;
        let total = total_price(property.booking_price, &current.stay);

        if let Err(e) = self.call_gateway("charge", self.gateway.charge(total as f64, card)).await {
            metrics::counter!(observability::PAYMENTS_TOTAL, "status" => "failed").increment(1);
            return Err(e);
        }
        metrics::counter!(observability::PAYMENTS_TOTAL, "status" => "succeeded").increment(1);

        if !self
            .reservations
            .update_status(id, ReservationStatus::Approved, ReservationStatus::Paid, self.now())
            .await?
        {
            return Err(EngineError::state(format!("reservation {id} changed during payment")));
        }
        info!("reservation {id} paid ({total})");
        count_transition(ReservationStatus::Paid);

        let notice = Notification::ReservationPaid {
            reservation_id: id,
            property_id: property.id,
        };
        self.notify_role(Role::Admin, &notice).await;
        self.notify(&property.owner, &notice);
        self.load_reservation(id).await
    }
}
