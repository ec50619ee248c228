use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::auth::Role;

/// Date layout accepted at the edge.
pub const DATE_LAYOUT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRange {
    #[error("start date {start} must not be after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("cannot parse date {0:?}, expected YYYY-MM-DD")]
    Unparseable(String),
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, InvalidRange> {
    NaiveDate::parse_from_str(raw.trim(), DATE_LAYOUT)
        .map_err(|_| InvalidRange::Unparseable(raw.to_string()))
}

/// Calendar range of a stay or a blackout. Overlap is half-open: `[start, end)`,
/// so a checkout day may be the next guest's arrival day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

/// Unchecked wire shape of a `DateRange`.
#[derive(Deserialize)]
struct RawRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawRange> for DateRange {
    type Error = InvalidRange;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, InvalidRange> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Two ranges overlap unless one ends at or before the other begins.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }

    /// Inclusive on both ends: a guest may act on the arrival and the departure day.
    pub fn contains_date(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Midnight UTC of the first day.
    pub fn starts_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start.and_time(NaiveTime::MIN))
    }

    /// Smallest range covering both.
    pub fn hull(&self, other: &DateRange) -> DateRange {
        DateRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Clamp to `window`, or `None` if they do not overlap.
    pub fn clamp_to(&self, window: &DateRange) -> Option<DateRange> {
        if !self.overlaps(window) {
            return None;
        }
        Some(DateRange {
            start: self.start.max(window.start),
            end: self.end.min(window.end),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Ulid,
    /// Owner email; notifications about the property go here.
    pub owner: String,
    pub name: String,
    /// Price per night.
    pub booking_price: u64,
    pub adult_quantity: u32,
    pub kid_quantity: u32,
    /// Owner-declared blackout periods.
    pub unavailable_dates: Vec<DateRange>,
    pub paid: bool,
    pub is_pending_payment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Paid,
    Cancelled,
}

impl ReservationStatus {
    /// Statuses that exclude other bookings of the same dates.
    pub const BINDING: [ReservationStatus; 2] = [ReservationStatus::Approved, ReservationStatus::Paid];

    pub fn is_binding(self) -> bool {
        matches!(self, ReservationStatus::Approved | ReservationStatus::Paid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Approved => "Approved",
            ReservationStatus::Paid => "Paid",
            ReservationStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub property_id: Ulid,
    pub document: String,
    pub name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub nationality: String,
    /// Country code used to pick the cancellation policy.
    pub country: String,
    pub adults: u32,
    pub minors: u32,
    pub stay: DateRange,
    pub status: ReservationStatus,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn reserved_from(&self) -> NaiveDate {
        self.stay.start()
    }

    pub fn reserved_until(&self) -> NaiveDate {
        self.stay.end()
    }
}

/// Tenant-supplied creation payload. Dates stay optional until validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservation {
    pub property_id: Ulid,
    pub document: String,
    pub name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub nationality: String,
    pub country: String,
    pub adults: u32,
    pub minors: u32,
    pub reserved_from: Option<NaiveDate>,
    pub reserved_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    /// Days before arrival within which a cancellation is still fully refunded.
    pub window_days: i64,
    /// Refund applied once the window has closed.
    pub refund_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInformation {
    pub card_number: String,
    pub name: String,
    pub cvv: String,
    pub exp_date: String,
}

/// Admin/operator listing filter. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFilter {
    pub reserved_from: Option<NaiveDate>,
    pub reserved_until: Option<NaiveDate>,
    pub status: Option<ReservationStatus>,
    pub property_id: Option<Ulid>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub last_name: Option<String>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.reserved_from.is_none_or(|d| r.reserved_from() >= d)
            && self.reserved_until.is_none_or(|d| r.reserved_until() <= d)
            && self.status.is_none_or(|s| r.status == s)
            && self.property_id.is_none_or(|p| r.property_id == p)
            && self.email.as_ref().is_none_or(|e| &r.email == e)
            && self.name.as_ref().is_none_or(|n| &r.name == n)
            && self.last_name.as_ref().is_none_or(|n| &r.last_name == n)
    }
}

/// Outcome of one auto-cancellation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cancelled: Vec<Ulid>,
    /// Affected properties, deduplicated, in the order first seen.
    pub properties: Vec<Ulid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.cancelled.is_empty()
    }
}

/// Journal record: flat, one per committed mutation. This is the WAL format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    PropertyUpserted(Property),
    PendingPaymentSet {
        property_id: Ulid,
        pending: bool,
    },
    PolicySet {
        country: String,
        policy: CancellationPolicy,
    },
    UserRegistered {
        email: String,
        roles: Vec<Role>,
    },
    ReservationCreated(Reservation),
    StatusChanged {
        id: Ulid,
        status: ReservationStatus,
        at: DateTime<Utc>,
    },
    CheckedIn {
        id: Ulid,
        at: DateTime<Utc>,
    },
    CheckedOut {
        id: Ulid,
        at: DateTime<Utc>,
    },
    ReservationRemoved {
        id: Ulid,
    },
}
