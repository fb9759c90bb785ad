use crate::model::Ms;

pub const MAX_TENANTS: usize = 10_000;
pub const MAX_DOMAIN_LEN: usize = 253;
pub const MAX_STAFF_PER_TENANT: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CLIENT_LEN: usize = 512;
pub const MAX_BOOKINGS_PER_STAFF: usize = 100_000;
pub const MAX_HOURS_PER_DAY: usize = 48;
pub const MAX_OVERRIDES_PER_STAFF: usize = 5_000;
pub const MAX_BATCH_SIZE: usize = 100;
pub const MAX_IN_CLAUSE_ROWS: usize = 1_000;

/// Bookings never span more than a day.
pub const MAX_SPAN_DURATION_MS: Ms = 86_400_000;
/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MIN_SERVICE_DURATION_MIN: u32 = 1;
pub const MAX_SERVICE_DURATION_MIN: u32 = 1_440;

/// Attempts at pinning a booking to its staff lock before giving up.
pub const MAX_LOCK_RETRIES: usize = 3;
