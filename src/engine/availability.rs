use crate::model::*;

/// Merge sorted ranges that overlap or touch into disjoint ranges.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start() <= last.end()
        {
            *last = last.hull(range);
            continue;
        }
        merged.push(*range);
    }
    merged
}

/// Days a property cannot be booked inside `window`: owner blackouts plus
/// binding reservations, clipped to the window and merged.
///
/// Always derived from current state; callers must not cache the result as
/// the source of truth for conflict checks.
pub fn blocked_ranges(property: &Property, reservations: &[Reservation], window: &DateRange) -> Vec<DateRange> {
    let binding = reservations.iter().filter(|r| r.status.is_binding()).map(|r| &r.stay);
    let mut blocked: Vec<DateRange> = property
        .unavailable_dates
        .iter()
        .chain(binding)
        .filter_map(|r| r.clamp_to(window))
        .collect();
    blocked.sort_by_key(|r| (r.start(), r.end()));
    merge_overlapping(&blocked)
}
