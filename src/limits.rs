// Hard limits on caller-supplied booking data.

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_EXTRAS: usize = 16;
pub const MAX_BOOKINGS_PER_DAY: usize = 10_000;
/// Widest inclusive date range accepted by range queries.
pub const MAX_RANGE_DAYS: i64 = 366;
