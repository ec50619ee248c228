//! Hard input limits. Anything past these is rejected as invalid input.

/// Longest stay accepted in a single reservation.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Max length of any free-text reservation field (names, address, document...).
pub const MAX_TEXT_LEN: usize = 256;

/// Max length of a country code.
pub const MAX_COUNTRY_CODE_LEN: usize = 8;

/// Max guests of one kind on a reservation, regardless of property capacity.
pub const MAX_GUESTS: u32 = 64;

/// Widest window accepted by availability queries, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366 * 2;
