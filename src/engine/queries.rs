use ulid::Ulid;

use crate::auth::{require_owner, require_role, Identity, Role};
use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;

use super::availability::blocked_ranges;
use super::{Engine, EngineError};

const ANY_ROLE: [Role; 4] = [Role::Tenant, Role::Owner, Role::Admin, Role::Operator];

impl Engine {
    /// Admin/operator listing, ordered by creation.
    pub async fn get_filtered_reservations(
        &self,
        identity: &Identity,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        require_role(identity, &[Role::Admin, Role::Operator])?;
        Ok(self.reservations.find_filtered(filter).await?)
    }

    /// The caller's latest reservation on a property.
    pub async fn get_own_reservation(
        &self,
        identity: &Identity,
        email: &str,
        property_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        require_role(identity, &[Role::Tenant])?;
        require_owner(identity, email)?;
        self.reservations
            .find_by_tenant_and_property(email, property_id)
            .await?
            .into_iter()
            .max_by_key(|r| (r.created_at, r.id))
            .ok_or_else(|| EngineError::not_found("reservation", format!("{email} on {property_id}")))
    }

    pub async fn get_reservation(&self, identity: &Identity, id: Ulid) -> Result<Reservation, EngineError> {
        require_role(identity, &ANY_ROLE)?;
        self.load_reservation(id).await
    }

    /// Blocked days of a property within `window`, merged. Recomputed on
    /// every call from blackouts and Approved/Paid reservations.
    pub async fn unavailable_ranges(
        &self,
        identity: &Identity,
        property_id: Ulid,
        window: DateRange,
    ) -> Result<Vec<DateRange>, EngineError> {
        require_role(identity, &ANY_ROLE)?;
        if window.nights() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::validation(format!(
                "query window wider than {MAX_QUERY_WINDOW_DAYS} days"
            )));
        }
        let property = self.load_property(property_id).await?;
        let binding = self
            .reservations
            .find_by_property_and_status(property_id, &ReservationStatus::BINDING)
            .await?;
        Ok(blocked_ranges(&property, &binding, &window))
    }
}
