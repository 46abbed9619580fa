use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHotel {
        id: Ulid,
        name: String,
        check_in: NaiveTime,
        check_out: NaiveTime,
    },
    InsertRoomType {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    InsertRoom {
        id: Ulid,
        hotel_id: Ulid,
        room_type_id: Ulid,
        name: String,
        /// Minor currency units.
        price: u64,
    },
    /// Guest count is kept signed; the request layer rejects anything below one.
    InsertBooking {
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        number_of_guests: i64,
    },
    SelectAvailableRooms {
        from: NaiveDate,
        to: NaiveDate,
        number_of_guests: i64,
    },
    SelectBookingByReference {
        reference: String,
    },
    SelectRoomBookings {
        room_id: Ulid,
    },
    SelectHotels {
        name: Option<NameFilter>,
    },
    /// `DELETE FROM hotels`: drop the whole catalog.
    DeleteHotels,
    SeedDemo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    /// `LIKE` / `ILIKE`; surrounding `%` stripped, matched case-insensitively.
    Contains(String),
    Exact(String),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.eq_ignore_ascii_case("CALL seed_demo()") {
        return Ok(Command::SeedDemo);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Rows a statement answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    HotelRooms,
    Bookings,
}

/// Row shape of `sql` read from its statement kind and target table only,
/// so unbound `$n` placeholders are fine. `None` when it returns no rows or
/// does not parse.
pub fn row_shape(sql: &str) -> Option<RowShape> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => (insert_table_name(insert).ok()? == "bookings").then_some(RowShape::Bookings),
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            match table_factor_name(&select.from.first()?.relation).ok()?.as_str() {
                "available_rooms" | "hotels" => Some(RowShape::HotelRooms),
                "bookings" => Some(RowShape::Bookings),
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "hotels" => {
            let row = InsertRow::new(insert, "hotels", &["id", "name", "check_in_time", "check_out_time"])?;
            Ok(Command::InsertHotel {
                id: parse_ulid(row.get("id")?)?,
                name: parse_string(row.get("name")?)?,
                check_in: parse_time(row.get("check_in_time")?)?,
                check_out: parse_time(row.get("check_out_time")?)?,
            })
        }
        "room_types" => {
            let row = InsertRow::new(insert, "room_types", &["id", "name", "capacity"])?;
            Ok(Command::InsertRoomType {
                id: parse_ulid(row.get("id")?)?,
                name: parse_string(row.get("name")?)?,
                capacity: parse_u32(row.get("capacity")?)?,
            })
        }
        "rooms" => {
            let row = InsertRow::new(insert, "rooms", &["id", "hotel_id", "room_type_id", "name", "price"])?;
            Ok(Command::InsertRoom {
                id: parse_ulid(row.get("id")?)?,
                hotel_id: parse_ulid(row.get("hotel_id")?)?,
                room_type_id: parse_ulid(row.get("room_type_id")?)?,
                name: parse_string(row.get("name")?)?,
                price: parse_price(row.get("price")?)?,
            })
        }
        "bookings" => {
            let row = InsertRow::new(
                insert,
                "bookings",
                &["room_id", "from_date", "to_date", "number_of_guests"],
            )?;
            Ok(Command::InsertBooking {
                room_id: parse_ulid(row.get("room_id")?)?,
                from: parse_date(row.get("from_date")?)?,
                to: parse_date(row.get("to_date")?)?,
                number_of_guests: parse_i64(row.get("number_of_guests")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "hotels" {
        return Err(SqlError::UnknownTable(table));
    }
    if delete.selection.is_some() {
        return Err(SqlError::Unsupported("DELETE FROM hotels takes no WHERE clause".into()));
    }
    Ok(Command::DeleteHotels)
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            from: parse_date(filters.require("from_date")?)?,
            to: parse_date(filters.require("to_date")?)?,
            number_of_guests: parse_i64(filters.require("number_of_guests")?)?,
        }),
        "bookings" => {
            if let Some(reference) = filters.eq.get("reference") {
                Ok(Command::SelectBookingByReference {
                    reference: parse_string(reference)?,
                })
            } else if let Some(room_id) = filters.eq.get("room_id") {
                Ok(Command::SelectRoomBookings {
                    room_id: parse_ulid(room_id)?,
                })
            } else {
                Err(SqlError::MissingFilter("reference or room_id"))
            }
        }
        "hotels" => {
            let name = if let Some(pattern) = &filters.name_like {
                Some(NameFilter::Contains(parse_string(pattern)?.trim_matches('%').to_string()))
            } else if let Some(exact) = filters.eq.get("name") {
                Some(NameFilter::Exact(parse_string(exact)?))
            } else {
                None
            };
            Ok(Command::SelectHotels { name })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    /// `column = value` conjuncts, column names lowercased.
    eq: HashMap<String, Expr>,
    name_like: Option<Expr>,
}

impl Filters {
    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.eq.get(column).ok_or(SqlError::MissingFilter(column))
    }
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                filters.eq.insert(col, right.as_ref().clone());
            }
            other => return Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Like {
            negated: false,
            expr,
            pattern,
            ..
        }
        | Expr::ILike {
            negated: false,
            expr,
            pattern,
            ..
        } if expr_column_name(expr).as_deref() == Some("name") => {
            filters.name_like = Some(pattern.as_ref().clone());
        }
        Expr::Nested(inner) => collect_filters(inner, filters)?,
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
    }
    Ok(())
}

/// One VALUES row keyed by column name. Without a column list the values
/// are taken in the table's declared order.
struct InsertRow {
    table: &'static str,
    values: HashMap<String, Expr>,
}

impl InsertRow {
    fn new(insert: &ast::Insert, table: &'static str, declared: &[&'static str]) -> Result<Self, SqlError> {
        let rows = extract_insert_rows(insert)?;
        if rows.len() != 1 {
            return Err(SqlError::Unsupported(format!("{table}: one row per INSERT")));
        }
        let row = &rows[0];

        let names: Vec<String> = if insert.columns.is_empty() {
            declared.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if names.len() != row.len() {
            return Err(SqlError::WrongArity(table, names.len(), row.len()));
        }
        Ok(Self {
            table,
            values: names.into_iter().zip(row.iter().cloned()).collect(),
        })
    }

    fn get(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.values
            .get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Text of a quoted string or a bare number literal.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = literal_text(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(expr)?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = literal_text(expr)?;
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

/// Decimal amount with at most two fraction digits, in minor units.
fn parse_price(expr: &Expr) -> Result<u64, SqlError> {
    let s = literal_text(expr)?;
    let bad = || SqlError::Parse(format!("bad price {s}"));
    let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || fraction.len() > 2
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(bad());
    }
    let whole: u64 = whole.parse().map_err(|_| bad())?;
    let cents: u64 = format!("{fraction:0<2}").parse().map_err(|_| bad())?;
    whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(bad)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
