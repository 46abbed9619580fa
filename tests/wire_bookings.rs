use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Days, NaiveDate, Utc};
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use hotelbook::engine::Engine;
use hotelbook::wire::{self, HotelbookFactory};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("hotelbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("hotelbook.wal"), Duration::from_secs(5)).unwrap());
    let factory = Arc::new(HotelbookFactory::new(
        engine.clone(),
        "hotelbook".to_string(),
        "hotelbook".to_string(),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("hotelbook")
        .user("hotelbook")
        .password("hotelbook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn days_ahead(n: u64) -> NaiveDate {
    Utc::now().date_naive().checked_add_days(Days::new(n)).unwrap()
}

fn col(row: &SimpleQueryRow, name: &str) -> String {
    row.get(name).unwrap().to_string()
}

async fn room_id_by_name(client: &Client, room_name: &str) -> String {
    rows(client, "SELECT * FROM hotels")
        .await
        .iter()
        .find(|r| r.get("room_name") == Some(room_name))
        .map(|r| col(r, "room_id"))
        .unwrap()
}

fn book_sql(room_id: &str, from: NaiveDate, to: NaiveDate, guests: i64) -> String {
    format!(
        "INSERT INTO bookings (room_id, from_date, to_date, number_of_guests) VALUES ('{room_id}', '{from}', '{to}', {guests})"
    )
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn seed_and_list_hotels() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;

    client.simple_query("CALL seed_demo()").await.unwrap();
    assert_eq!(engine.hotel_count(), 2);
    assert_eq!(engine.room_count(), 12);

    let all = rows(&client, "SELECT * FROM hotels").await;
    assert_eq!(all.len(), 12);
    assert_eq!(col(&all[0], "hotel_name"), "Grand Hotel");
    assert_eq!(col(&all[0], "check_in_time"), "14:00");
    assert_eq!(col(&all[0], "check_out_time"), "12:00");

    let seaside = rows(&client, "SELECT * FROM hotels WHERE name ILIKE '%seaside%'").await;
    assert_eq!(seaside.len(), 6);
    assert!(seaside.iter().all(|r| r.get("hotel_name") == Some("Seaside Resort")));

    let suite = seaside
        .iter()
        .find(|r| r.get("room_name") == Some("Beachfront Suite"))
        .unwrap();
    assert_eq!(col(suite, "price"), "400.00");
    assert_eq!(col(suite, "capacity"), "3");
}

#[tokio::test]
async fn hotel_without_rooms_lists_null_rooms() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let id = Ulid::new();
    client
        .simple_query(&format!(
            "INSERT INTO hotels (id, name, check_in_time, check_out_time) VALUES ('{id}', 'Empty Inn', '15:00', '11:00')"
        ))
        .await
        .unwrap();

    let found = rows(&client, "SELECT * FROM hotels WHERE name = 'Empty Inn'").await;
    assert_eq!(found.len(), 1);
    assert_eq!(col(&found[0], "hotel_id"), id.to_string());
    assert_eq!(found[0].get("room_id"), None);
}

#[tokio::test]
async fn available_rooms_respect_capacity() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    client.simple_query("CALL seed_demo()").await.unwrap();

    let (from, to) = (days_ahead(30), days_ahead(33));
    let sql = format!(
        "SELECT * FROM available_rooms WHERE from_date = '{from}' AND to_date = '{to}' AND number_of_guests = 3"
    );
    let available = rows(&client, &sql).await;
    assert_eq!(available.len(), 4);
    assert!(available.iter().all(|r| col(r, "capacity") == "3"));

    let sql = format!(
        "SELECT * FROM available_rooms WHERE from_date = '{from}' AND to_date = '{to}' AND number_of_guests = 4"
    );
    assert!(rows(&client, &sql).await.is_empty());
}

#[tokio::test]
async fn book_then_look_up_by_reference() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    client.simple_query("CALL seed_demo()").await.unwrap();

    let room_id = room_id_by_name(&client, "Sunset Suite").await;
    let (from, to) = (days_ahead(10), days_ahead(12));

    let booked = rows(&client, &book_sql(&room_id, from, to, 2)).await;
    assert_eq!(booked.len(), 1);
    let reference = col(&booked[0], "reference");
    assert_eq!(reference, format!("BK-{}-0001", Utc::now().year()));
    assert_eq!(col(&booked[0], "check_in"), format!("{from}T14:00:00"));
    assert_eq!(col(&booked[0], "check_out"), format!("{to}T12:00:00"));

    let found = rows(
        &client,
        &format!("SELECT * FROM bookings WHERE reference = '{reference}'"),
    )
    .await;
    assert_eq!(found.len(), 1);
    assert_eq!(col(&found[0], "room_id"), room_id);
    assert_eq!(col(&found[0], "number_of_guests"), "2");

    let missing = rows(&client, "SELECT * FROM bookings WHERE reference = 'BK-1999-0001'").await;
    assert!(missing.is_empty());

    // the booked room drops out of availability for overlapping dates
    let sql = format!(
        "SELECT * FROM available_rooms WHERE from_date = '{to}' AND to_date = '{}' AND number_of_guests = 2",
        days_ahead(14)
    );
    let available = rows(&client, &sql).await;
    assert!(available.iter().all(|r| col(r, "room_id") != room_id));

    let second = client
        .simple_query(&book_sql(&room_id, to, days_ahead(14), 1))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&second), "23P01");
}

#[tokio::test]
async fn booking_errors_carry_sqlstate() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    client.simple_query("CALL seed_demo()").await.unwrap();

    let single = room_id_by_name(&client, "Cozy Corner").await;
    let today = Utc::now().date_naive();

    let past = client
        .simple_query(&book_sql(&single, today, days_ahead(2), 1))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&past), "22023");

    let no_guests = client
        .simple_query(&book_sql(&single, days_ahead(1), days_ahead(2), 0))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&no_guests), "22023");

    let inverted = client
        .simple_query(&book_sql(&single, days_ahead(5), days_ahead(2), 1))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&inverted), "22023");

    let crowded = client
        .simple_query(&book_sql(&single, days_ahead(1), days_ahead(2), 2))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&crowded), "23514");

    let unknown = client
        .simple_query(&book_sql(&Ulid::new().to_string(), days_ahead(1), days_ahead(2), 1))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&unknown), "P0002");

    let garbage = client.simple_query("SELECT * FROM guests").await.unwrap_err();
    assert_eq!(sqlstate(&garbage), "42601");
}

#[tokio::test]
async fn extended_protocol_booking() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    client.simple_query("CALL seed_demo()").await.unwrap();

    let room_id = room_id_by_name(&client, "Garden View").await;
    let from = days_ahead(40).to_string();
    let to = days_ahead(41).to_string();

    let booked = client
        .query(
            "INSERT INTO bookings (room_id, from_date, to_date, number_of_guests) VALUES ($1, $2, $3, $4)",
            &[&room_id, &from, &to, &"1"],
        )
        .await
        .unwrap();
    assert_eq!(booked.len(), 1);
    let reference: &str = booked[0].get("reference");

    let found = client
        .query("SELECT * FROM bookings WHERE reference = $1", &[&reference])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let found_room: &str = found[0].get("room_id");
    assert_eq!(found_room, room_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_of_one_room() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    client.simple_query("CALL seed_demo()").await.unwrap();

    let room_id = room_id_by_name(&client, "Royal Penthouse").await;
    let (from, to) = (days_ahead(60), days_ahead(63));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let sql = book_sql(&room_id, from, to, 2);
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client.simple_query(&sql).await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert_eq!(sqlstate(&e), "23P01"),
        }
    }
    assert_eq!(ok, 1);

    let room_id: Ulid = room_id.parse().unwrap();
    assert_eq!(engine.room_bookings(room_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_hotels_clears_catalog() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    client.simple_query("CALL seed_demo()").await.unwrap();

    client.simple_query("DELETE FROM hotels").await.unwrap();
    assert_eq!(engine.hotel_count(), 0);
    assert!(rows(&client, "SELECT * FROM hotels").await.is_empty());
}
