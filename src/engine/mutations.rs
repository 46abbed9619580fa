use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_booking, validate_stay};
use super::{Engine, EngineError, WalCommand, apply_booking, parse_sequence, wal_append};

fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

impl Engine {
    pub async fn create_hotel(
        &self,
        id: Ulid,
        name: String,
        check_in: NaiveTime,
        check_out: NaiveTime,
    ) -> Result<(), EngineError> {
        validate_name(&name, "hotel name too long")?;
        let held = self.catalog_lock.clone().lock_owned().await;
        if self.catalog.hotels.len() >= MAX_HOTELS {
            return Err(EngineError::LimitExceeded("too many hotels"));
        }
        if self.catalog.hotels.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::HotelCreated { id, name, check_in, check_out };
        self.commit_catalog(event, held).await
    }

    pub async fn create_room_type(&self, id: Ulid, name: String, capacity: u32) -> Result<(), EngineError> {
        validate_name(&name, "room type name too long")?;
        if capacity == 0 || capacity > MAX_ROOM_CAPACITY {
            return Err(EngineError::LimitExceeded("room capacity out of range"));
        }
        let held = self.catalog_lock.clone().lock_owned().await;
        if self.catalog.room_types.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomTypeCreated { id, name, capacity };
        self.commit_catalog(event, held).await
    }

    pub async fn create_room(
        &self,
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        name: String,
        price: u64,
    ) -> Result<(), EngineError> {
        validate_name(&name, "room name too long")?;
        if price > MAX_PRICE_MINOR {
            return Err(EngineError::LimitExceeded("room price too high"));
        }
        let held = self.catalog_lock.clone().lock_owned().await;
        if self.catalog.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let room_count = self
            .catalog
            .hotels
            .get(&hotel_id)
            .map(|h| h.rooms.len())
            .ok_or(EngineError::NotFound(hotel_id))?;
        if room_count >= MAX_ROOMS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many rooms in hotel"));
        }
        if !self.catalog.room_types.contains_key(&room_type_id) {
            return Err(EngineError::NotFound(room_type_id));
        }

        let event = Event::RoomCreated { id, hotel_id, room_type_id, name, price };
        self.commit_catalog(event, held).await
    }

    /// Drop every hotel, room type, room and booking. The reference ledger is
    /// kept, so references issued afterwards never repeat earlier ones.
    pub async fn reset(&self) -> Result<(), EngineError> {
        let catalog = self.catalog_lock.clone().lock_owned().await;
        // Wait out any commit that already holds the ledger.
        let ledger = self.lock_ledger().await?;

        self.commit_catalog(Event::CatalogCleared, (catalog, ledger)).await?;
        info!("catalog cleared");
        Ok(())
    }

    /// Reserve a room for a stay, committed at `now`.
    ///
    /// The room's write lock is held from the conflict check until the
    /// booking is applied, so two requests for overlapping stays on the same
    /// room can never both succeed. The reference is allocated and recorded
    /// under the ledger mutex in the same critical section.
    pub async fn create_booking(
        &self,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        let result = self.commit_booking(request, now).await;
        match &result {
            Ok(booking) => {
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
                info!(
                    reference = %booking.reference,
                    room = %booking.room_id,
                    stay = %booking.stay,
                    guests = booking.number_of_guests,
                    "booking created"
                );
            }
            Err(e) => {
                metrics::counter!(observability::BOOKING_REJECTIONS_TOTAL, "kind" => e.kind().as_str())
                    .increment(1);
                debug!(room = %request.room_id, stay = %request.stay, "booking rejected: {e}");
            }
        }
        result
    }

    async fn commit_booking(
        &self,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        validate_stay(&request.stay)?;
        let rs = self
            .get_room(&request.room_id)
            .ok_or(EngineError::RoomNotFound(request.room_id))?;
        let mut guard = self.lock_room(rs.clone()).await?;

        check_booking(&guard, request)?;

        let mut ledger = self.lock_ledger().await?;

        // A reset may have dropped the room while we waited; the hotel times
        // must come from the live catalog too.
        let still_live = self
            .catalog
            .rooms
            .get(&request.room_id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), &rs));
        let hotel = self
            .catalog
            .hotels
            .get(&guard.hotel_id)
            .map(|h| h.value().clone())
            .filter(|_| still_live)
            .ok_or(EngineError::RoomNotFound(request.room_id))?;

        let (reference, created_at) = ledger.allocate(now)?;
        if self.catalog.references.contains_key(&reference) {
            return Err(EngineError::CorruptReferenceSequence { reference });
        }

        let booking = Booking {
            id: Ulid::new(),
            reference,
            room_id: request.room_id,
            stay: request.stay,
            check_in: hotel.check_in_at(request.stay.from),
            check_out: hotel.check_out_at(request.stay.to),
            number_of_guests: request.number_of_guests,
            created_at,
        };

        // From here on the booking must reach both the WAL and memory, or
        // neither. A detached task finishes the job even if the caller's
        // future is dropped, and keeps both locks until it is done.
        let wal_tx = self.wal_tx.clone();
        let references = self.catalog.references.clone();
        let commit = tokio::spawn(async move {
            let event = Event::BookingCreated { booking: booking.clone() };
            wal_append(&wal_tx, &event).await?;
            apply_booking(&references, &mut guard, &mut ledger, booking.clone());
            Ok::<_, EngineError>(booking)
        });
        commit
            .await
            .map_err(|e| EngineError::StorageUnavailable(format!("booking commit task failed: {e}")))?
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state, plus one checkpoint per year so the reference sequence survives.
    ///
    /// Holds the catalog lock and every room's read lock while the rewrite
    /// runs, so no append can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut hotels: Vec<Hotel> = self.catalog.hotels.iter().map(|e| e.value().clone()).collect();
        hotels.sort_by_key(|h| h.ordinal);

        let mut events: Vec<Event> = self
            .catalog
            .room_types
            .iter()
            .map(|e| Event::RoomTypeCreated {
                id: e.id,
                name: e.name.clone(),
                capacity: e.capacity,
            })
            .collect();

        // Rooms before ledger, same order as a booking commit.
        let mut guards = Vec::new();
        for hotel in &hotels {
            events.push(Event::HotelCreated {
                id: hotel.id,
                name: hotel.name.clone(),
                check_in: hotel.check_in,
                check_out: hotel.check_out,
            });
            for room_id in &hotel.rooms {
                let Some(rs) = self.get_room(room_id) else {
                    continue;
                };
                let guard = rs.read_owned().await;
                events.push(Event::RoomCreated {
                    id: guard.id,
                    hotel_id: guard.hotel_id,
                    room_type_id: guard.room_type.id,
                    name: guard.name.clone(),
                    price: guard.price,
                });
                guards.push(guard);
            }
        }

        let mut bookings: Vec<&Booking> = guards.iter().flat_map(|g| g.bookings.iter()).collect();
        // Clamped timestamps can tie; the sequence breaks ties.
        bookings.sort_by_key(|b| (b.created_at, parse_sequence(&b.reference).ok()));
        events.extend(bookings.into_iter().map(|b| Event::BookingCreated { booking: b.clone() }));

        let ledger = self.lock_ledger().await?;
        let mut years: Vec<_> = ledger.years().collect();
        years.sort_by_key(|(year, _)| *year);
        events.extend(years.into_iter().map(|(year, issued)| Event::SequenceCheckpoint {
            year,
            reference: issued.reference.clone(),
            created_at: issued.created_at,
        }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
