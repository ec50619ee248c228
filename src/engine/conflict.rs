use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::error::ConflictReason;
use super::EngineError;

/// A request that passed field validation and is ready to be checked against
/// the property's commitments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub stay: DateRange,
    pub adults: u32,
    pub minors: u32,
}

/// Field-level checks that need no stored state.
pub(crate) fn validate_new_reservation(req: &NewReservation, today: NaiveDate) -> Result<Candidate, EngineError> {
    if req.adults < 1 {
        return Err(EngineError::validation("at least one adult is required"));
    }
    if req.adults > MAX_GUESTS || req.minors > MAX_GUESTS {
        return Err(EngineError::validation("too many guests"));
    }
    let (Some(from), Some(until)) = (req.reserved_from, req.reserved_until) else {
        return Err(EngineError::validation("reservation dates are required"));
    };
    let stay = DateRange::new(from, until)?;
    if stay.start() < today {
        return Err(EngineError::validation(format!("start date {from} is in the past")));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::validation(format!("stay longer than {MAX_STAY_NIGHTS} nights")));
    }
    if req.email.trim().is_empty() {
        return Err(EngineError::validation("email is required"));
    }
    let texts = [
        ("document", &req.document),
        ("name", &req.name),
        ("last name", &req.last_name),
        ("email", &req.email),
        ("phone", &req.phone),
        ("address", &req.address),
        ("nationality", &req.nationality),
    ];
    if let Some((field, _)) = texts.iter().find(|(_, v)| v.len() > MAX_TEXT_LEN) {
        return Err(EngineError::validation(format!("{field} too long")));
    }
    if req.country.len() > MAX_COUNTRY_CODE_LEN {
        return Err(EngineError::validation("country code too long"));
    }
    Ok(Candidate {
        stay,
        adults: req.adults,
        minors: req.minors,
    })
}

/// Decide whether `candidate` may be booked on `property`.
///
/// Checks run in a fixed order: blackouts, binding reservations, capacity,
/// then the property's payment gate. Only Approved and Paid entries of
/// `existing` block; Pending and Cancelled ones are ignored.
pub fn check_bookable(property: &Property, candidate: &Candidate, existing: &[Reservation]) -> Result<(), EngineError> {
    if let Some(blackout) = property.unavailable_dates.iter().find(|b| b.overlaps(&candidate.stay)) {
        return Err(EngineError::Conflict(ConflictReason::Blackout(*blackout)));
    }
    if let Some(taken) = existing
        .iter()
        .find(|r| r.status.is_binding() && r.stay.overlaps(&candidate.stay))
    {
        return Err(EngineError::Conflict(ConflictReason::Reservation(taken.id)));
    }
    if candidate.adults > property.adult_quantity {
        return Err(EngineError::validation(format!(
            "{} adults requested, property allows {}",
            candidate.adults, property.adult_quantity
        )));
    }
    if candidate.minors > property.kid_quantity {
        return Err(EngineError::validation(format!(
            "{} minors requested, property allows {}",
            candidate.minors, property.kid_quantity
        )));
    }
    if property.is_pending_payment {
        return Err(EngineError::Conflict(ConflictReason::PendingPayment(property.id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ulid::Ulid;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn property() -> Property {
        Property {
            id: Ulid::new(),
            owner: "owner@example.com".into(),
            name: "Casa".into(),
            booking_price: 100,
            adult_quantity: 2,
            kid_quantity: 1,
            unavailable_dates: vec![DateRange::new(d(6, 1), d(6, 10)).unwrap()],
            paid: true,
            is_pending_payment: false,
        }
    }

    fn candidate(from: NaiveDate, until: NaiveDate) -> Candidate {
        Candidate {
            stay: DateRange::new(from, until).unwrap(),
            adults: 2,
            minors: 0,
        }
    }

    fn existing(status: ReservationStatus, from: NaiveDate, until: NaiveDate) -> Reservation {
        Reservation {
            id: Ulid::new(),
            property_id: Ulid::new(),
            document: String::new(),
            name: String::new(),
            last_name: String::new(),
            email: "x@example.com".into(),
            phone: String::new(),
            address: String::new(),
            nationality: String::new(),
            country: String::new(),
            adults: 1,
            minors: 0,
            stay: DateRange::new(from, until).unwrap(),
            status,
            check_in: None,
            check_out: None,
            approved_at: None,
            created_at: Utc::now(),
        }
    }

    fn request(from: Option<NaiveDate>, until: Option<NaiveDate>) -> NewReservation {
        NewReservation {
            property_id: Ulid::new(),
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
            reserved_from: from,
            reserved_until: until,
        }
    }

    #[test]
    fn blackout_blocks() {
        let err = check_bookable(&property(), &candidate(d(6, 5), d(6, 12)), &[]).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(ConflictReason::Blackout(_))));
        // arriving on the last blackout day is fine
        assert!(check_bookable(&property(), &candidate(d(6, 10), d(6, 12)), &[]).is_ok());
    }

    #[test]
    fn only_binding_reservations_block() {
        let p = property();
        let c = candidate(d(7, 1), d(7, 4));
        let soft = [
            existing(ReservationStatus::Pending, d(7, 1), d(7, 4)),
            existing(ReservationStatus::Cancelled, d(7, 2), d(7, 3)),
        ];
        assert!(check_bookable(&p, &c, &soft).is_ok());

        for status in ReservationStatus::BINDING {
            let hard = existing(status, d(7, 3), d(7, 6));
            let err = check_bookable(&p, &c, std::slice::from_ref(&hard)).unwrap_err();
            assert_eq!(err, EngineError::Conflict(ConflictReason::Reservation(hard.id)));
        }
    }

    #[test]
    fn back_to_back_stays_allowed() {
        let p = property();
        let before = existing(ReservationStatus::Paid, d(6, 28), d(7, 1));
        let after = existing(ReservationStatus::Approved, d(7, 4), d(7, 8));
        assert!(check_bookable(&p, &candidate(d(7, 1), d(7, 4)), &[before, after]).is_ok());
    }

    #[test]
    fn capacity_and_payment_gate() {
        let mut p = property();
        let mut c = candidate(d(7, 1), d(7, 4));
        c.adults = 3;
        assert!(matches!(check_bookable(&p, &c, &[]), Err(EngineError::Validation(_))));
        c.adults = 2;
        c.minors = 2;
        assert!(matches!(check_bookable(&p, &c, &[]), Err(EngineError::Validation(_))));
        c.minors = 1;
        p.is_pending_payment = true;
        assert_eq!(
            check_bookable(&p, &c, &[]),
            Err(EngineError::Conflict(ConflictReason::PendingPayment(p.id)))
        );
    }

    #[test]
    fn blackout_reported_before_capacity() {
        let mut c = candidate(d(6, 2), d(6, 3));
        c.adults = 10;
        assert!(matches!(
            check_bookable(&property(), &c, &[]),
            Err(EngineError::Conflict(ConflictReason::Blackout(_)))
        ));
    }

    #[test]
    fn request_validation() {
        let today = d(6, 15);
        assert!(validate_new_reservation(&request(Some(d(7, 1)), Some(d(7, 4))), today).is_ok());
        // same-day start is allowed
        assert!(validate_new_reservation(&request(Some(today), Some(d(7, 4))), today).is_ok());

        let cases = [
            request(None, Some(d(7, 4))),
            request(Some(d(7, 1)), None),
            request(Some(d(7, 4)), Some(d(7, 1))),
            request(Some(d(6, 14)), Some(d(7, 1))),
            request(Some(d(7, 1)), Some(NaiveDate::from_ymd_opt(2026, 7, 1).unwrap())),
        ];
        for req in &cases {
            assert!(
                matches!(validate_new_reservation(req, today), Err(EngineError::Validation(_))),
                "{:?}..{:?} should be rejected",
                req.reserved_from,
                req.reserved_until
            );
        }

        let mut no_adults = request(Some(d(7, 1)), Some(d(7, 4)));
        no_adults.adults = 0;
        assert!(validate_new_reservation(&no_adults, today).is_err());

        let mut long_name = request(Some(d(7, 1)), Some(d(7, 4)));
        long_name.name = "x".repeat(MAX_TEXT_LEN + 1);
        assert_eq!(
            validate_new_reservation(&long_name, today),
            Err(EngineError::Validation("name too long".into()))
        );
    }

    #[test]
    fn zero_night_stay_is_accepted() {
        let c = validate_new_reservation(&request(Some(d(7, 3)), Some(d(7, 3))), d(6, 15)).unwrap();
        assert_eq!(c.stay.nights(), 0);
        // same-day arrival of a longer stay does not collide with it
        let arriving = existing(ReservationStatus::Paid, d(7, 3), d(7, 5));
        assert!(check_bookable(&property(), &c, std::slice::from_ref(&arriving)).is_ok());
        // but it still falls inside a stay that spans the day
        let spanning = existing(ReservationStatus::Paid, d(7, 1), d(7, 5));
        assert!(check_bookable(&property(), &c, std::slice::from_ref(&spanning)).is_err());
    }
}
