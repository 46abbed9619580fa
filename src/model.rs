use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Inclusive calendar-date interval `[from, to]` of a stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl StayRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// A stay must cover at least one night.
    pub fn is_valid(&self) -> bool {
        self.from < self.to
    }

    pub fn nights(&self) -> i64 {
        (self.to - self.from).num_days()
    }

    /// True iff the two ranges share at least one calendar day.
    /// Both ends are inclusive, so a checkout day colliding with another
    /// stay's arrival day counts as an overlap.
    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.from <= other.to && self.to >= other.from
    }
}

impl std::fmt::Display for StayRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomType {
    pub id: Ulid,
    pub name: String,
    /// Maximum number of guests.
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hotel {
    pub id: Ulid,
    pub name: String,
    pub check_in: NaiveTime,
    pub check_out: NaiveTime,
    /// Room ids in creation order.
    pub rooms: Vec<Ulid>,
    /// Creation ordinal, used to list hotels in creation order.
    pub ordinal: u64,
}

impl Hotel {
    pub fn check_in_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.check_in)
    }

    pub fn check_out_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.check_out)
    }
}

/// A persisted reservation. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub reference: String,
    pub room_id: Ulid,
    pub stay: StayRange,
    /// `stay.from` at the hotel's check-in time.
    pub check_in: NaiveDateTime,
    /// `stay.to` at the hotel's check-out time.
    pub check_out: NaiveDateTime,
    pub number_of_guests: u32,
    pub created_at: DateTime<Utc>,
}

/// A request to reserve one room, validated by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_id: Ulid,
    pub stay: StayRange,
    pub number_of_guests: u32,
}

/// A room together with its type and its full booking history.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub name: String,
    /// Nightly rate in minor currency units.
    pub price: u64,
    pub room_type: RoomType,
    /// Sorted by `stay.from`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(id: Ulid, hotel_id: Ulid, name: String, price: u64, room_type: RoomType) -> Self {
        Self {
            id,
            hotel_id,
            name,
            price,
            room_type,
            bookings: Vec::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.room_type.capacity
    }

    /// Insert booking maintaining sort order by `stay.from`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.stay.from <= booking.stay.from);
        self.bookings.insert(pos, booking);
    }

    /// Bookings whose stay overlaps `query` (inclusive on both ends).
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Booking> {
        // Everything past right_bound arrives after query.to and cannot overlap.
        let right_bound = self.bookings.partition_point(|b| b.stay.from <= query.to);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.to >= query.from)
    }

    pub fn find_by_reference(&self, reference: &str) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.reference == reference)
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelCreated {
        id: Ulid,
        name: String,
        check_in: NaiveTime,
        check_out: NaiveTime,
    },
    RoomTypeCreated {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    RoomCreated {
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        name: String,
        price: u64,
    },
    BookingCreated {
        booking: Booking,
    },
    /// Drops every hotel, room type, room and booking. The reference ledger survives.
    CatalogCleared,
    /// Last reference issued in `year`. Written by compaction so the sequence
    /// continues after the bookings that produced it are gone.
    SequenceCheckpoint {
        year: i32,
        reference: String,
        created_at: DateTime<Utc>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub room_type: String,
    pub capacity: u32,
    pub price: u64,
}

impl From<&RoomState> for RoomInfo {
    fn from(rs: &RoomState) -> Self {
        Self {
            id: rs.id,
            name: rs.name.clone(),
            room_type: rs.room_type.name.clone(),
            capacity: rs.room_type.capacity,
            price: rs.price,
        }
    }
}

/// A hotel with a selection of its rooms (availability results, hotel search).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotelRooms {
    pub id: Ulid,
    pub name: String,
    pub check_in: NaiveTime,
    pub check_out: NaiveTime,
    pub rooms: Vec<RoomInfo>,
}

impl HotelRooms {
    pub fn new(hotel: &Hotel, rooms: Vec<RoomInfo>) -> Self {
        Self {
            id: hotel.id,
            name: hotel.name.clone(),
            check_in: hotel.check_in,
            check_out: hotel.check_out,
            rooms,
        }
    }
}

/// Render minor currency units as a two-decimal amount, e.g. `12050` → `"120.50"`.
pub fn format_price(minor: u64) -> String {
    format!("{}.{:02}", minor / 100, minor % 100)
}
