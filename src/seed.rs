use std::collections::HashMap;

use chrono::NaiveTime;
use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};

const DEMO_FIXTURE: &str = include_str!("../fixtures/demo.json");

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("bad fixture: {0}")]
    Json(#[from] serde_json::Error),
    #[error("room {room} refers to unknown room type {key}")]
    UnknownRoomType { room: String, key: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub room_types: Vec<RoomTypeSeed>,
    pub hotels: Vec<HotelSeed>,
}

#[derive(Debug, Deserialize)]
pub struct RoomTypeSeed {
    /// Fixture-local name rooms use to refer to this type.
    pub key: String,
    pub name: String,
    pub capacity: u32,
}

#[derive(Debug, Deserialize)]
pub struct HotelSeed {
    pub name: String,
    pub check_in: NaiveTime,
    pub check_out: NaiveTime,
    pub rooms: Vec<RoomSeed>,
}

#[derive(Debug, Deserialize)]
pub struct RoomSeed {
    pub name: String,
    pub room_type: String,
    /// Minor currency units.
    pub price: u64,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Two hotels, six rooms each, over Single/Double/Deluxe room types.
    pub fn demo() -> Result<Self, SeedError> {
        Self::from_json(DEMO_FIXTURE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub hotels: usize,
    pub rooms: usize,
}

/// Reset the engine and load `fixture` with freshly generated ids.
pub async fn load(engine: &Engine, fixture: &Fixture) -> Result<SeedSummary, SeedError> {
    // Resolve every room type before touching the engine.
    for hotel in &fixture.hotels {
        for room in &hotel.rooms {
            if !fixture.room_types.iter().any(|t| t.key == room.room_type) {
                return Err(SeedError::UnknownRoomType {
                    room: room.name.clone(),
                    key: room.room_type.clone(),
                });
            }
        }
    }

    engine.reset().await?;

    let mut type_ids = HashMap::new();
    for room_type in &fixture.room_types {
        let id = Ulid::new();
        engine
            .create_room_type(id, room_type.name.clone(), room_type.capacity)
            .await?;
        type_ids.insert(room_type.key.as_str(), id);
    }

    let mut summary = SeedSummary { hotels: 0, rooms: 0 };
    for hotel in &fixture.hotels {
        let hotel_id = Ulid::new();
        engine
            .create_hotel(hotel_id, hotel.name.clone(), hotel.check_in, hotel.check_out)
            .await?;
        summary.hotels += 1;
        for room in &hotel.rooms {
            let room_type_id = type_ids[room.room_type.as_str()];
            engine
                .create_room(Ulid::new(), hotel_id, room_type_id, room.name.clone(), room.price)
                .await?;
            summary.rooms += 1;
        }
    }

    info!("seeded {} hotels with {} rooms", summary.hotels, summary.rooms);
    Ok(summary)
}

pub async fn load_demo(engine: &Engine) -> Result<SeedSummary, SeedError> {
    load(engine, &Fixture::demo()?).await
}
