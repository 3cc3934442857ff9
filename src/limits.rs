use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single booking may not span more than a day.
pub const MAX_BOOKING_DURATION_MS: Ms = DAY_MS;
/// Widest range accepted by booking range queries.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_USERS: usize = 100_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_FACILITIES: usize = 32;

pub const DEFAULT_BOOKING_THRESHOLD: usize = 3;
