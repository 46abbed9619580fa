use crate::model::*;

// ── Availability resolution ───────────────────────────────────────

/// A room can take a stay when its type fits the party and none of its
/// bookings shares a calendar day with the stay.
///
/// Degenerate stays (`from >= to`) match nothing.
pub fn room_is_available(room: &RoomState, stay: &StayRange, guests: u32) -> bool {
    if !stay.is_valid() {
        return false;
    }
    room.capacity() >= guests && room.overlapping(stay).next().is_none()
}

/// The rooms of `hotel` that can take the stay, in the order given.
/// Returns `None` when no room qualifies so callers can drop the hotel.
pub fn available_in_hotel<'a>(
    hotel: &Hotel,
    rooms: impl IntoIterator<Item = &'a RoomState>,
    stay: &StayRange,
    guests: u32,
) -> Option<HotelRooms> {
    let matching: Vec<RoomInfo> = rooms
        .into_iter()
        .filter(|room| room_is_available(room, stay, guests))
        .map(RoomInfo::from)
        .collect();
    if matching.is_empty() {
        None
    } else {
        Some(HotelRooms::new(hotel, matching))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Utc};
    use ulid::Ulid;

    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn hotel() -> Hotel {
        Hotel {
            id: Ulid::new(),
            name: "Grand Hotel".into(),
            check_in: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            check_out: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            rooms: Vec::new(),
            ordinal: 0,
        }
    }

    fn room(name: &str, capacity: u32) -> RoomState {
        RoomState::new(
            Ulid::new(),
            Ulid::new(),
            name.into(),
            10_000,
            RoomType {
                id: Ulid::new(),
                name: format!("cap{capacity}"),
                capacity,
            },
        )
    }

    fn book(rs: &mut RoomState, from: NaiveDate, to: NaiveDate) {
        let booking = Booking {
            id: Ulid::new(),
            reference: format!("BK-2025-{:04}", rs.bookings.len() + 1),
            room_id: rs.id,
            stay: StayRange::new(from, to),
            check_in: from.and_hms_opt(14, 0, 0).unwrap(),
            check_out: to.and_hms_opt(12, 0, 0).unwrap(),
            number_of_guests: 1,
            created_at: Utc::now(),
        };
        rs.insert_booking(booking);
    }

    #[test]
    fn empty_room_is_available_when_it_fits() {
        let rs = room("Cozy Corner", 2);
        let stay = StayRange::new(d(3, 10), d(3, 12));
        assert!(room_is_available(&rs, &stay, 1));
        assert!(room_is_available(&rs, &stay, 2));
        assert!(!room_is_available(&rs, &stay, 3));
    }

    #[test]
    fn booked_room_is_hidden_for_overlapping_dates() {
        let mut rs = room("Sunset Suite", 2);
        book(&mut rs, d(3, 10), d(3, 12));
        assert!(!room_is_available(&rs, &StayRange::new(d(3, 11), d(3, 13)), 1));
        assert!(!room_is_available(&rs, &StayRange::new(d(3, 1), d(3, 31)), 1));
        assert!(room_is_available(&rs, &StayRange::new(d(3, 13), d(3, 15)), 1));
    }

    #[test]
    fn same_day_turnover_is_not_offered() {
        let mut rs = room("Sunset Suite", 2);
        book(&mut rs, d(3, 10), d(3, 12));
        // arrival on the existing checkout day
        assert!(!room_is_available(&rs, &StayRange::new(d(3, 12), d(3, 14)), 1));
        // checkout on the existing arrival day
        assert!(!room_is_available(&rs, &StayRange::new(d(3, 8), d(3, 10)), 1));
    }

    #[test]
    fn zero_length_stay_matches_nothing() {
        let rs = room("Cozy Corner", 2);
        assert!(!room_is_available(&rs, &StayRange::new(d(3, 10), d(3, 10)), 1));
        assert!(!room_is_available(&rs, &StayRange::new(d(3, 12), d(3, 10)), 1));
    }

    #[test]
    fn hotel_keeps_room_order_and_drops_unfit_rooms() {
        let h = hotel();
        let single = room("Cozy Corner", 1);
        let double = room("Sunset Suite", 2);
        let mut booked_double = room("Garden View", 2);
        book(&mut booked_double, d(3, 9), d(3, 11));
        let deluxe = room("Royal Penthouse", 3);

        let stay = StayRange::new(d(3, 10), d(3, 12));
        let result =
            available_in_hotel(&h, [&single, &double, &booked_double, &deluxe], &stay, 2).unwrap();
        let names: Vec<_> = result.rooms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Sunset Suite", "Royal Penthouse"]);
        assert_eq!(result.id, h.id);
        assert_eq!(result.check_in, h.check_in);
    }

    #[test]
    fn hotel_without_matches_is_dropped() {
        let h = hotel();
        let single = room("Cozy Corner", 1);
        let stay = StayRange::new(d(3, 10), d(3, 12));
        assert!(available_in_hotel(&h, [&single], &stay, 2).is_none());
        assert!(available_in_hotel(&h, std::iter::empty(), &stay, 1).is_none());
    }

    #[test]
    fn resolution_is_repeatable() {
        let h = hotel();
        let mut a = room("A", 2);
        book(&mut a, d(3, 1), d(3, 4));
        let b = room("B", 2);
        let stay = StayRange::new(d(3, 3), d(3, 6));
        let first = available_in_hotel(&h, [&a, &b], &stay, 2);
        let second = available_in_hotel(&h, [&a, &b], &stay, 2);
        assert_eq!(first, second);
    }
}
