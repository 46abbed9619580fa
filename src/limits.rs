//! Hard input limits. Anything beyond these is rejected with `LimitExceeded`.

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ROOM_CAPACITY: u32 = 64;
pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_HOTELS: usize = 10_000;
pub const MAX_ROOMS_PER_HOTEL: usize = 1_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;
/// Largest nightly price accepted, in minor currency units.
pub const MAX_PRICE_MINOR: u64 = 100_000_000;
