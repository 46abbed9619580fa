use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat, Utc};
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::HotelbookAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::seed;
use crate::sql::{self, Command, NameFilter, RowShape};

pub struct HotelbookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<HotelbookQueryParser>,
}

impl HotelbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(HotelbookQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql_text: &str) -> PgWireResult<Vec<Response>> {
        let start = Instant::now();
        let cmd = match sql::parse_sql(sql_text) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertHotel {
                id,
                name,
                check_in,
                check_out,
            } => {
                engine
                    .create_hotel(id, name, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertRoomType { id, name, capacity } => {
                engine
                    .create_room_type(id, name, capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertRoom {
                id,
                hotel_id,
                room_type_id,
                name,
                price,
            } => {
                engine
                    .create_room(id, hotel_id, room_type_id, name, price)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertBooking {
                room_id,
                from,
                to,
                number_of_guests,
            } => {
                let now = Utc::now();
                let request = validate_booking_request(room_id, from, to, number_of_guests, now.date_naive())?;
                let booking = engine.create_booking(&request, now).await.map_err(engine_err)?;
                Ok(vec![booking_response(vec![booking])?])
            }
            Command::SelectAvailableRooms {
                from,
                to,
                number_of_guests,
            } => {
                let guests = validate_guests(number_of_guests)?;
                let hotels = engine
                    .find_available_rooms(&StayRange::new(from, to), guests)
                    .await;
                Ok(vec![hotel_rooms_response(hotels)?])
            }
            Command::SelectBookingByReference { reference } => {
                let found = engine.get_booking_by_reference(&reference).await;
                Ok(vec![booking_response(found.into_iter().collect())?])
            }
            Command::SelectRoomBookings { room_id } => {
                let bookings = engine.room_bookings(room_id).await.map_err(engine_err)?;
                Ok(vec![booking_response(bookings)?])
            }
            Command::SelectHotels { name } => {
                let hotels = match name {
                    None => engine.search_hotels("").await,
                    Some(NameFilter::Contains(term)) => engine.search_hotels(&term).await,
                    Some(NameFilter::Exact(exact)) => engine
                        .search_hotels(&exact)
                        .await
                        .into_iter()
                        .filter(|h| h.name == exact)
                        .collect(),
                };
                Ok(vec![hotel_rooms_response(hotels)?])
            }
            Command::DeleteHotels => {
                let count = engine.hotel_count();
                engine.reset().await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(count))])
            }
            Command::SeedDemo => {
                seed::load_demo(engine).await.map_err(|e| match e {
                    seed::SeedError::Engine(e) => engine_err(e),
                    other => user_error("XX000", other.to_string()),
                })?;
                Ok(vec![Response::Execution(Tag::new("CALL"))])
            }
        }
    }
}

// ── Request validation ───────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
enum RequestError {
    #[error("number_of_guests must be at least 1, got {0}")]
    Guests(i64),
    #[error("{column} must be after {today}, got {date}")]
    NotInFuture {
        column: &'static str,
        date: NaiveDate,
        today: NaiveDate,
    },
}

impl From<RequestError> for PgWireError {
    fn from(e: RequestError) -> Self {
        user_error("22023", e.to_string())
    }
}

fn validate_guests(number_of_guests: i64) -> Result<u32, RequestError> {
    match u32::try_from(number_of_guests) {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(RequestError::Guests(number_of_guests)),
    }
}

/// Checks made before the engine sees a booking: both dates strictly after
/// `today` and at least one guest.
fn validate_booking_request(
    room_id: ulid::Ulid,
    from: NaiveDate,
    to: NaiveDate,
    number_of_guests: i64,
    today: NaiveDate,
) -> Result<BookingRequest, RequestError> {
    let number_of_guests = validate_guests(number_of_guests)?;
    for (column, date) in [("from_date", from), ("to_date", to)] {
        if date <= today {
            return Err(RequestError::NotInFuture { column, date, today });
        }
    }
    Ok(BookingRequest {
        room_id,
        stay: StayRange::new(from, to),
        number_of_guests,
    })
}

// ── Result rows ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn hotel_rooms_schema() -> Vec<FieldInfo> {
    vec![
        text_field("hotel_id"),
        text_field("hotel_name"),
        text_field("check_in_time"),
        text_field("check_out_time"),
        text_field("room_id"),
        text_field("room_name"),
        text_field("room_type"),
        int_field("capacity"),
        text_field("price"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("reference"),
        text_field("room_id"),
        text_field("from_date"),
        text_field("to_date"),
        text_field("check_in"),
        text_field("check_out"),
        int_field("number_of_guests"),
        text_field("created_at"),
    ]
}

fn format_time(t: chrono::NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// One row per room. A hotel without rooms still gets a row, with NULL room columns.
fn hotel_rooms_response(hotels: Vec<HotelRooms>) -> PgWireResult<Response> {
    let schema = Arc::new(hotel_rooms_schema());
    let mut rows: Vec<PgWireResult<_>> = Vec::new();
    for hotel in hotels {
        let hotel_id = hotel.id.to_string();
        let check_in = format_time(hotel.check_in);
        let check_out = format_time(hotel.check_out);
        let rooms: Vec<Option<&RoomInfo>> = if hotel.rooms.is_empty() {
            vec![None]
        } else {
            hotel.rooms.iter().map(Some).collect()
        };
        for room in rooms {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&hotel_id)?;
            encoder.encode_field(&hotel.name)?;
            encoder.encode_field(&check_in)?;
            encoder.encode_field(&check_out)?;
            encoder.encode_field(&room.map(|r| r.id.to_string()))?;
            encoder.encode_field(&room.map(|r| r.name.clone()))?;
            encoder.encode_field(&room.map(|r| r.room_type.clone()))?;
            encoder.encode_field(&room.map(|r| i64::from(r.capacity)))?;
            encoder.encode_field(&room.map(|r| format_price(r.price)))?;
            rows.push(Ok(encoder.take_row()));
        }
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_response(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let mut rows: Vec<PgWireResult<_>> = Vec::with_capacity(bookings.len());
    for b in bookings {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&b.reference)?;
        encoder.encode_field(&b.room_id.to_string())?;
        encoder.encode_field(&b.stay.from.to_string())?;
        encoder.encode_field(&b.stay.to.to_string())?;
        encoder.encode_field(&b.check_in.format("%Y-%m-%dT%H:%M:%S").to_string())?;
        encoder.encode_field(&b.check_out.format("%Y-%m-%dT%H:%M:%S").to_string())?;
        encoder.encode_field(&i64::from(b.number_of_guests))?;
        encoder.encode_field(&b.created_at.to_rfc3339_opts(SecondsFormat::Millis, true))?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns a statement will produce, for Describe in the extended protocol.
fn result_schema(sql_text: &str) -> Vec<FieldInfo> {
    match sql::row_shape(sql_text) {
        Some(RowShape::HotelRooms) => hotel_rooms_schema(),
        Some(RowShape::Bookings) => booking_schema(),
        None => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for HotelbookHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HotelbookQueryParser;

#[async_trait]
impl QueryParser for HotelbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for HotelbookHandler {
    type Statement = String;
    type QueryParser = HotelbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql_text = substitute_params(portal);
        let mut responses = self.run(&sql_text).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    substitute(&portal.statement.statement, &portal.parameters)
}

/// One pass over the statement text: bound values are copied into the output
/// and never scanned for placeholders themselves. `$n` past the bound values
/// is left as written.
fn substitute<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct HotelbookFactory {
    handler: Arc<HotelbookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<HotelbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl HotelbookFactory {
    pub fn new(engine: Arc<Engine>, user: String, password: String) -> Self {
        let auth_source = HotelbookAuthSource::new(user, password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(HotelbookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HotelbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<HotelbookFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidDateRange => "22023",
        ErrorKind::RoomNotFound | ErrorKind::NotFound => "P0002",
        ErrorKind::CapacityExceeded => "23514",
        ErrorKind::RoomAlreadyBooked => "23P01",
        ErrorKind::CorruptReferenceSequence => "XX001",
        ErrorKind::Timeout => "55P03",
        ErrorKind::StorageUnavailable => "58030",
        ErrorKind::AlreadyExists => "23505",
        ErrorKind::LimitExceeded => "54000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(e.kind()), e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn booking_dates_must_be_after_today() {
        let today = d(2025, 3, 1);
        let room = ulid::Ulid::new();
        assert!(validate_booking_request(room, d(2025, 3, 2), d(2025, 3, 4), 1, today).is_ok());

        let err = validate_booking_request(room, d(2025, 3, 1), d(2025, 3, 4), 1, today).unwrap_err();
        assert_eq!(
            err,
            RequestError::NotInFuture {
                column: "from_date",
                date: d(2025, 3, 1),
                today,
            }
        );
        let err = validate_booking_request(room, d(2025, 3, 5), d(2025, 2, 4), 1, today).unwrap_err();
        assert!(matches!(err, RequestError::NotInFuture { column: "to_date", .. }));
    }

    #[test]
    fn booking_needs_a_guest() {
        let today = d(2025, 3, 1);
        let room = ulid::Ulid::new();
        for guests in [0, -2, i64::from(u32::MAX) + 1] {
            let err = validate_booking_request(room, d(2025, 3, 2), d(2025, 3, 4), guests, today).unwrap_err();
            assert_eq!(err, RequestError::Guests(guests));
        }
        assert_eq!(validate_guests(3), Ok(3));
    }

    #[test]
    fn inverted_range_is_left_to_the_engine() {
        // future dates, wrong order: passes request validation, engine rejects it
        let today = d(2025, 3, 1);
        let request =
            validate_booking_request(ulid::Ulid::new(), d(2025, 3, 9), d(2025, 3, 5), 1, today).unwrap();
        assert!(!request.stay.is_valid());
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        assert_eq!(sqlstate(ErrorKind::InvalidDateRange), "22023");
        assert_eq!(sqlstate(ErrorKind::RoomNotFound), "P0002");
        assert_eq!(sqlstate(ErrorKind::CapacityExceeded), "23514");
        assert_eq!(sqlstate(ErrorKind::RoomAlreadyBooked), "23P01");
        assert_eq!(sqlstate(ErrorKind::CorruptReferenceSequence), "XX001");
        assert_eq!(sqlstate(ErrorKind::Timeout), "55P03");
        assert_eq!(sqlstate(ErrorKind::StorageUnavailable), "58030");
        assert_eq!(sqlstate(EngineError::Timeout("room").kind()), "55P03");
    }

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("INSERT INTO bookings VALUES ($1, $2, $3, $4)"), 4);
        assert_eq!(count_params("SELECT * FROM bookings WHERE reference = $12"), 12);
    }

    #[test]
    fn describe_schemas_match_statements() {
        assert_eq!(
            result_schema("SELECT * FROM available_rooms WHERE from_date = $1").len(),
            hotel_rooms_schema().len()
        );
        assert_eq!(result_schema("select * from hotels").len(), hotel_rooms_schema().len());
        assert_eq!(
            result_schema("INSERT INTO bookings (room_id, from_date, to_date, number_of_guests) VALUES ($1, $2, $3, $4)").len(),
            booking_schema().len()
        );
        assert!(result_schema("INSERT INTO hotels (id, name, check_in_time, check_out_time) VALUES ($1, $2, $3, $4)").is_empty());
        assert!(result_schema("DELETE FROM hotels").is_empty());
        assert!(
            result_schema(
                "INSERT INTO hotels (id, name, check_in_time, check_out_time) VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 'Select Inn', '14:00', '12:00')"
            )
            .is_empty()
        );
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let params = [Some("$2".as_bytes()), Some("O'Hara $1".as_bytes()), None];
        assert_eq!(
            substitute("INSERT INTO hotels (id, name, x) VALUES ($1, $2, $3)", &params),
            "INSERT INTO hotels (id, name, x) VALUES ('$2', 'O''Hara $1', NULL)"
        );
    }

    #[test]
    fn double_digit_placeholders_resolve_whole() {
        let params: Vec<Option<String>> = (1..=10).map(|i| Some(format!("v{i}"))).collect();
        assert_eq!(substitute("$1 $10 $11 $", &params), "'v1' 'v10' $11 $");
    }
}
