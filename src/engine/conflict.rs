use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_stay(stay: &StayRange) -> Result<(), EngineError> {
    if !stay.is_valid() {
        return Err(EngineError::InvalidDateRange {
            from: stay.from,
            to: stay.to,
        });
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Capacity and overlap checks against the room's bookings as they are now.
/// The caller must hold the room's write lock until the booking is applied,
/// otherwise the answer is stale by the time it is acted on.
pub(crate) fn check_booking(room: &RoomState, request: &BookingRequest) -> Result<(), EngineError> {
    if request.number_of_guests > room.capacity() {
        return Err(EngineError::CapacityExceeded {
            room_id: room.id,
            capacity: room.capacity(),
            requested: request.number_of_guests,
        });
    }
    if let Some(existing) = room.overlapping(&request.stay).next() {
        return Err(EngineError::RoomAlreadyBooked {
            room_id: room.id,
            conflicting: existing.reference.clone(),
        });
    }
    if room.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many bookings on room"));
    }
    Ok(())
}
