use ulid::Ulid;

use crate::model::*;

use super::availability::available_in_hotel;
use super::{Engine, EngineError};

impl Engine {
    /// Hotels in creation order, snapshotted so no map guard is held across
    /// an await.
    fn hotels_in_order(&self) -> Vec<Hotel> {
        let mut hotels: Vec<Hotel> = self.catalog.hotels.iter().map(|e| e.value().clone()).collect();
        hotels.sort_by_key(|h| h.ordinal);
        hotels
    }

    /// Every hotel that has at least one room able to take `stay` for
    /// `guests`, with only those rooms listed. An invalid stay yields nothing.
    pub async fn find_available_rooms(&self, stay: &StayRange, guests: u32) -> Vec<HotelRooms> {
        if !stay.is_valid() {
            return Vec::new();
        }
        let mut result = Vec::new();
        for hotel in self.hotels_in_order() {
            let mut guards = Vec::with_capacity(hotel.rooms.len());
            for room_id in &hotel.rooms {
                if let Some(rs) = self.get_room(room_id) {
                    guards.push(rs.read_owned().await);
                }
            }
            if let Some(found) = available_in_hotel(&hotel, guards.iter().map(|g| &**g), stay, guests) {
                result.push(found);
            }
        }
        result
    }

    pub async fn get_booking_by_reference(&self, reference: &str) -> Option<Booking> {
        let room_id = *self.catalog.references.get(reference)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.find_by_reference(reference).cloned()
    }

    /// Hotels whose name contains `term`, ignoring case, with all of their
    /// rooms. An empty term matches every hotel.
    pub async fn search_hotels(&self, term: &str) -> Vec<HotelRooms> {
        let needle = term.to_lowercase();
        let mut result = Vec::new();
        for hotel in self.hotels_in_order() {
            if !hotel.name.to_lowercase().contains(&needle) {
                continue;
            }
            let mut rooms = Vec::with_capacity(hotel.rooms.len());
            for room_id in &hotel.rooms {
                if let Some(rs) = self.get_room(room_id) {
                    rooms.push(RoomInfo::from(&*rs.read().await));
                }
            }
            result.push(HotelRooms::new(&hotel, rooms));
        }
        result
    }

    /// Bookings of one room, ordered by arrival date.
    pub async fn room_bookings(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }
}
