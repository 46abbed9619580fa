use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

/// Coarse classification of an [`EngineError`], stable for callers that map
/// errors onto responses or decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidDateRange,
    RoomNotFound,
    CapacityExceeded,
    RoomAlreadyBooked,
    CorruptReferenceSequence,
    Timeout,
    StorageUnavailable,
    NotFound,
    AlreadyExists,
    LimitExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidDateRange => "invalid_date_range",
            ErrorKind::RoomNotFound => "room_not_found",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::RoomAlreadyBooked => "room_already_booked",
            ErrorKind::CorruptReferenceSequence => "corrupt_reference_sequence",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::LimitExceeded => "limit_exceeded",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid date range: {from} must be before {to}")]
    InvalidDateRange { from: NaiveDate, to: NaiveDate },
    #[error("room not found: {0}")]
    RoomNotFound(Ulid),
    #[error("room {room_id} holds at most {capacity} guests, {requested} requested")]
    CapacityExceeded {
        room_id: Ulid,
        capacity: u32,
        requested: u32,
    },
    #[error("room {room_id} is already booked for overlapping dates ({conflicting})")]
    RoomAlreadyBooked { room_id: Ulid, conflicting: String },
    #[error("booking reference sequence is corrupt at {reference:?}")]
    CorruptReferenceSequence { reference: String },
    #[error("timed out waiting for {0} lock")]
    Timeout(&'static str),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidDateRange { .. } => ErrorKind::InvalidDateRange,
            EngineError::RoomNotFound(_) => ErrorKind::RoomNotFound,
            EngineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            EngineError::RoomAlreadyBooked { .. } => ErrorKind::RoomAlreadyBooked,
            EngineError::CorruptReferenceSequence { .. } => ErrorKind::CorruptReferenceSequence,
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
        }
    }

    /// Only transient failures are worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::StorageUnavailable
        )
    }
}
