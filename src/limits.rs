use crate::model::Ms;

pub const MAX_ADVISORS: usize = 100_000;
pub const MAX_RULES_PER_ADVISOR: usize = 64;
pub const MAX_BOOKINGS_PER_ADVISOR: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
/// Customer and package ids come from the portal as opaque strings.
pub const MAX_EXTERNAL_ID_LEN: usize = 128;

pub const MIN_DURATION_MINUTES: u32 = 5;
pub const MAX_DURATION_MINUTES: u32 = 8 * 60;

/// Fixed offsets in use worldwide lie within ±14h.
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Widest range a single bookings listing may cover (92 days).
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * 24 * 3_600_000;
