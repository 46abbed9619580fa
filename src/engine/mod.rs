mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod reference;

pub use availability::{available_in_hotel, room_is_available};
pub use error::{EngineError, ErrorKind};
pub use reference::{LatestIssued, ReferenceLedger, format_reference, next_reference, parse_sequence};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    #[cfg(test)]
    FailNextSync,
}

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush of {} events failed: {e}", batch.len());
        }
        for (_, tx) in batch {
            let _ = tx.send(
                result
                    .as_ref()
                    .map(|_| ())
                    .map_err(|e| io::Error::new(e.kind(), e.to_string())),
            );
        }

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

/// All or nothing: a failed batch is cut from the file so none of it can
/// resurface behind a later flush.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.discard_pending()
    {
        tracing::error!("WAL rollback after failed flush also failed: {e}");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        #[cfg(test)]
        WalCommand::FailNextSync => wal.fail_next_sync(),
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Hotel catalog, room booking state and the reference sequence.
///
/// Each room sits behind its own `RwLock`; a booking commit holds the room's
/// write lock from the conflict check until the booking is applied. The
/// reference ledger is a single mutex shared by every commit. Lock order is
/// room, then ledger. Catalog writes and reset serialize on `catalog_lock`.
pub struct Engine {
    pub(super) catalog: Catalog,
    pub(super) ledger: Arc<Mutex<ReferenceLedger>>,
    pub(super) catalog_lock: Arc<Mutex<()>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    lock_timeout: Duration,
}

/// The in-memory maps. Clones share the same maps, so a commit task can
/// apply an event without borrowing the engine.
#[derive(Clone, Default)]
pub(super) struct Catalog {
    pub(super) hotels: Arc<DashMap<Ulid, Hotel>>,
    pub(super) room_types: Arc<DashMap<Ulid, RoomType>>,
    pub(super) rooms: Arc<DashMap<Ulid, SharedRoomState>>,
    /// Booking reference → room id.
    pub(super) references: Arc<DashMap<String, Ulid>>,
    next_ordinal: Arc<AtomicU64>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// `lock_timeout` bounds how long a commit waits for a room or the ledger.
    pub fn new(wal_path: PathBuf, lock_timeout: Duration) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            catalog: Catalog::default(),
            ledger: Arc::new(Mutex::new(ReferenceLedger::new())),
            catalog_lock: Arc::new(Mutex::new(())),
            wal_tx,
            lock_timeout,
        };

        // Sole owner during replay: every try_lock succeeds immediately.
        // Never block here, this may run inside an async context.
        {
            let mut ledger = engine
                .ledger
                .try_lock()
                .map_err(|_| io::Error::other("replay: ledger contended"))?;
            for event in &events {
                match event {
                    Event::BookingCreated { booking } => {
                        let Some(rs) = engine.get_room(&booking.room_id) else {
                            warn!("replay: booking {} for unknown room {}", booking.reference, booking.room_id);
                            continue;
                        };
                        let mut guard = rs
                            .try_write()
                            .map_err(|_| io::Error::other("replay: room contended"))?;
                        apply_booking(&engine.catalog.references, &mut guard, &mut ledger, booking.clone());
                    }
                    Event::SequenceCheckpoint {
                        reference,
                        created_at,
                        ..
                    } => ledger.record(reference, *created_at),
                    catalog => engine.catalog.apply(catalog),
                }
            }
        }

        Ok(engine)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.catalog.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_hotel(&self, id: &Ulid) -> Option<Hotel> {
        self.catalog.hotels.get(id).map(|e| e.value().clone())
    }

    pub fn hotel_count(&self) -> usize {
        self.catalog.hotels.len()
    }

    pub fn room_count(&self) -> usize {
        self.catalog.rooms.len()
    }

    /// Write a catalog event to the WAL and apply it. Both steps run in a
    /// detached task that owns `held`, so dropping the caller cannot leave
    /// the log ahead of memory.
    pub(super) async fn commit_catalog<G: Send + 'static>(&self, event: Event, held: G) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let catalog = self.catalog.clone();
        let commit = tokio::spawn(async move {
            let _held = held;
            wal_append(&wal_tx, &event).await?;
            catalog.apply(&event);
            Ok::<_, EngineError>(())
        });
        commit
            .await
            .map_err(|e| EngineError::StorageUnavailable(format!("catalog commit task failed: {e}")))?
    }

    /// Make the next WAL sync fail once the batch is already on disk.
    #[cfg(test)]
    pub(super) async fn fail_next_wal_sync(&self) {
        let _ = self.wal_tx.send(WalCommand::FailNextSync).await;
    }

    pub(super) async fn lock_room(
        &self,
        rs: SharedRoomState,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        tokio::time::timeout(self.lock_timeout, rs.write_owned())
            .await
            .map_err(|_| EngineError::Timeout("room"))
    }

    pub(super) async fn lock_ledger(&self) -> Result<OwnedMutexGuard<ReferenceLedger>, EngineError> {
        tokio::time::timeout(self.lock_timeout, self.ledger.clone().lock_owned())
            .await
            .map_err(|_| EngineError::Timeout("reference sequence"))
    }
}

impl Catalog {
    /// Apply a catalog-level event. Bookings and checkpoints need the room
    /// and ledger guards and go through [`apply_booking`] instead.
    pub(super) fn apply(&self, event: &Event) {
        match event {
            Event::HotelCreated {
                id,
                name,
                check_in,
                check_out,
            } => {
                let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
                self.hotels.insert(
                    *id,
                    Hotel {
                        id: *id,
                        name: name.clone(),
                        check_in: *check_in,
                        check_out: *check_out,
                        rooms: Vec::new(),
                        ordinal,
                    },
                );
            }
            Event::RoomTypeCreated { id, name, capacity } => {
                self.room_types.insert(
                    *id,
                    RoomType {
                        id: *id,
                        name: name.clone(),
                        capacity: *capacity,
                    },
                );
            }
            Event::RoomCreated {
                id,
                hotel_id,
                room_type_id,
                name,
                price,
            } => {
                let Some(room_type) = self.room_types.get(room_type_id).map(|e| e.value().clone()) else {
                    warn!("room {id} references unknown room type {room_type_id}");
                    return;
                };
                let Some(mut hotel) = self.hotels.get_mut(hotel_id) else {
                    warn!("room {id} references unknown hotel {hotel_id}");
                    return;
                };
                hotel.rooms.push(*id);
                drop(hotel);
                let rs = RoomState::new(*id, *hotel_id, name.clone(), *price, room_type);
                self.rooms.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::CatalogCleared => {
                self.hotels.clear();
                self.room_types.clear();
                self.rooms.clear();
                self.references.clear();
            }
            Event::BookingCreated { .. } | Event::SequenceCheckpoint { .. } => {}
        }
    }
}

/// Write event to WAL via the background group-commit writer.
pub(super) async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
}

/// Apply a durable booking to its room (caller holds the room's write lock)
/// and advance the ledger (caller holds the ledger).
pub(super) fn apply_booking(
    references: &DashMap<String, Ulid>,
    rs: &mut RoomState,
    ledger: &mut ReferenceLedger,
    booking: Booking,
) {
    ledger.record(&booking.reference, booking.created_at);
    references.insert(booking.reference.clone(), booking.room_id);
    rs.insert_booking(booking);
}
