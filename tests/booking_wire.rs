use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Config, NoTls, Notification, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use meetbook::engine::Engine;
use meetbook::model::{Credential, DAY_MS, HOUR_MS, day_start};
use meetbook::notify::NotifyHub;
use meetbook::wire;

// ── Test infrastructure ──────────────────────────────────────

const GUEST_PASSWORD: &str = "meetbook";
const ADMIN_PASSWORD: &str = "Keyholder1";
const MEMBER_PASSWORD: &str = "Meeting42";

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("meetbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("meetbook.wal"), Arc::new(NotifyHub::new())).unwrap());
    engine.bootstrap_admin("admin", Some(ADMIN_PASSWORD)).await.unwrap();
    let guest = Arc::new(Credential::from_password(GUEST_PASSWORD));

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            let guest = guest.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, guest, None).await;
            });
        }
    });

    (addr, engine)
}

type Session = (tokio_postgres::Client, mpsc::UnboundedReceiver<Notification>);

async fn try_connect(addr: SocketAddr, user: &str, password: &str) -> Result<Session, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("meetbook")
        .user(user)
        .password(password);

    let (client, mut connection) = config.connect(NoTls).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    Ok((client, rx))
}

async fn connect(addr: SocketAddr, user: &str, password: &str) -> Session {
    try_connect(addr, user, password).await.unwrap()
}

async fn admin(addr: SocketAddr) -> tokio_postgres::Client {
    connect(addr, "admin", ADMIN_PASSWORD).await.0
}

fn register_sql(name: &str, password: &str) -> String {
    format!(
        "INSERT INTO users (id, username, email, password) VALUES ('{}', '{name}', '{name}@example.com', '{password}')",
        Ulid::new()
    )
}

/// Register `name` over a guest connection and keep using that connection.
async fn member(addr: SocketAddr, name: &str) -> Session {
    let (client, rx) = connect(addr, name, GUEST_PASSWORD).await;
    client.batch_execute(&register_sql(name, MEMBER_PASSWORD)).await.unwrap();
    (client, rx)
}

async fn create_room(admin: &tokio_postgres::Client, code: &str) -> Ulid {
    let rid = Ulid::new();
    admin
        .batch_execute(&format!(
            "INSERT INTO rooms (id, code, name, location, capacity, facilities) \
             VALUES ('{rid}', '{code}', 'Meeting room', 'Block A', 8, 'projector,whiteboard')"
        ))
        .await
        .unwrap();
    rid
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.as_db_error().map(|e| e.code().code().to_string()).unwrap_or_default()
}

fn future_day() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    day_start(now) + 2 * DAY_MS
}

fn book_sql(id: Ulid, room: Ulid, start: i64, end: i64) -> String {
    format!(r#"INSERT INTO bookings (id, room_id, start, "end") VALUES ('{id}', '{room}', {start}, {end})"#)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_scenario_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let (bob, _) = member(addr, "bob").await;
    let room = create_room(&admin, "R101").await;
    let day = future_day();

    let first = Ulid::new();
    alice
        .batch_execute(&book_sql(first, room, day + 10 * HOUR_MS, day + 11 * HOUR_MS))
        .await
        .unwrap();

    let err = bob
        .batch_execute(&book_sql(Ulid::new(), room, day + 10 * HOUR_MS + HOUR_MS / 2, day + 11 * HOUR_MS + HOUR_MS / 2))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23P01");

    bob.batch_execute(&book_sql(Ulid::new(), room, day + 11 * HOUR_MS, day + 12 * HOUR_MS))
        .await
        .unwrap();
    bob.batch_execute(&book_sql(Ulid::new(), room, day + 9 * HOUR_MS, day + 10 * HOUR_MS))
        .await
        .unwrap();

    let found = rows(
        &alice,
        &format!(
            r#"SELECT * FROM bookings WHERE room_id = '{room}' AND start >= {} AND "end" <= {}"#,
            day,
            day + DAY_MS
        ),
    )
    .await;
    assert_eq!(found.len(), 3);
    assert_eq!(found[1].get("id"), Some(first.to_string().as_str()));
    assert_eq!(found[1].get("status"), Some("confirmed"));
}

#[tokio::test]
async fn booking_history_honours_a_partial_window() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let room = create_room(&admin, "R109").await;
    let day = future_day();

    let early = Ulid::new();
    let late = Ulid::new();
    alice
        .batch_execute(&book_sql(early, room, day + HOUR_MS, day + 2 * HOUR_MS))
        .await
        .unwrap();
    alice
        .batch_execute(&book_sql(late, room, day + 5 * HOUR_MS, day + 6 * HOUR_MS))
        .await
        .unwrap();

    let sql = format!("SELECT * FROM bookings WHERE room_id = '{room}' AND start >= {}", day + 4 * HOUR_MS);
    let found = rows(&alice, &sql).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("id"), Some(late.to_string().as_str()));

    let found = rows(&admin, &format!(r#"SELECT * FROM bookings WHERE "end" <= {}"#, day + 2 * HOUR_MS)).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("id"), Some(early.to_string().as_str()));

    let sql = format!(
        r#"SELECT * FROM bookings WHERE room_id = '{room}' AND start >= -9000000000000000000 AND "end" <= 9000000000000000000"#
    );
    let err = alice.batch_execute(&sql).await.unwrap_err();
    assert_eq!(sqlstate(&err), "54000");
    let err = alice
        .batch_execute(&format!("SELECT * FROM schedule WHERE room_id = '{room}' AND day = 9223372036854775807"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "54000");
}

#[tokio::test]
async fn invalid_intervals_map_to_sqlstates() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let room = create_room(&admin, "R102").await;
    let day = future_day();

    let err = alice
        .batch_execute(&book_sql(Ulid::new(), room, day + HOUR_MS, day + HOUR_MS))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    let err = alice
        .batch_execute(&book_sql(Ulid::new(), Ulid::new(), day + HOUR_MS, day + 2 * HOUR_MS))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0002");

    let err = alice.batch_execute("SELECT * FROM nowhere").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42601");
}

#[tokio::test]
async fn cancel_and_reschedule_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let (bob, _) = member(addr, "bob").await;
    let room = create_room(&admin, "R103").await;
    let day = future_day();

    let id = Ulid::new();
    alice
        .batch_execute(&book_sql(id, room, day + 10 * HOUR_MS, day + 11 * HOUR_MS))
        .await
        .unwrap();

    // Someone else's booking looks missing.
    let err = bob
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0002");

    alice
        .batch_execute(&format!(
            r#"UPDATE bookings SET start = {}, "end" = {} WHERE id = '{id}'"#,
            day + 10 * HOUR_MS + HOUR_MS / 2,
            day + 11 * HOUR_MS + HOUR_MS / 2
        ))
        .await
        .unwrap();

    alice
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap();
    let err = alice
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "55000");

    let mine = rows(&alice, "SELECT * FROM bookings").await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("status"), Some("cancelled"));
}

#[tokio::test]
async fn unknown_login_can_only_register_itself() {
    let (addr, _engine) = start_test_server().await;
    let (stranger, _) = connect(addr, "stranger", GUEST_PASSWORD).await;

    let err = stranger.batch_execute("SELECT * FROM rooms").await.unwrap_err();
    assert_eq!(sqlstate(&err), "28000");

    let err = stranger
        .batch_execute(&register_sql("someone_else", MEMBER_PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    let err = stranger.batch_execute(&register_sql("stranger", "weak")).await.unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    stranger
        .batch_execute(&register_sql("stranger", MEMBER_PASSWORD))
        .await
        .unwrap();
    assert!(rows(&stranger, "SELECT * FROM rooms").await.is_empty());

    // The account now needs its own password; the shared one no longer works.
    assert!(try_connect(addr, "stranger", GUEST_PASSWORD).await.is_err());
    let (again, _) = connect(addr, "stranger", MEMBER_PASSWORD).await;
    assert!(rows(&again, "SELECT * FROM rooms").await.is_empty());
}

#[tokio::test]
async fn accounts_require_their_own_password() {
    let (addr, _engine) = start_test_server().await;
    assert!(try_connect(addr, "admin", GUEST_PASSWORD).await.is_err());
    assert!(try_connect(addr, "admin", "Keyholder2").await.is_err());

    let (_alice, _) = member(addr, "alice").await;
    assert!(try_connect(addr, "alice", GUEST_PASSWORD).await.is_err());
    assert!(try_connect(addr, "alice", MEMBER_PASSWORD).await.is_ok());
}

#[tokio::test]
async fn guest_cannot_act_as_someone_elses_account() {
    let (addr, _engine) = start_test_server().await;
    let (guest, _) = connect(addr, "mallory", GUEST_PASSWORD).await;

    let err = guest.batch_execute(&register_sql("admin", MEMBER_PASSWORD)).await.unwrap_err();
    assert_eq!(sqlstate(&err), "42501");
    let err = guest
        .batch_execute(&format!(
            "INSERT INTO users (id, username, password, role) VALUES ('{}', 'mallory', '{MEMBER_PASSWORD}', 'admin')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    // A guest connection opened before the account existed cannot use it.
    let (early, _) = connect(addr, "carol", GUEST_PASSWORD).await;
    let (_carol, _) = member(addr, "carol").await;
    let err = early.batch_execute("SELECT * FROM rooms").await.unwrap_err();
    assert_eq!(sqlstate(&err), "28000");
    let err = early.batch_execute("SWEEP").await.unwrap_err();
    assert_eq!(sqlstate(&err), "28000");
}

#[tokio::test]
async fn locked_account_is_refused_at_login() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let alice_id = rows(&admin, "SELECT * FROM users WHERE username = 'alice'").await[0]
        .get("id")
        .unwrap()
        .to_string();

    let err = alice
        .batch_execute(&format!("UPDATE users SET locked = true WHERE id = '{alice_id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    admin
        .batch_execute(&format!("UPDATE users SET locked = true WHERE id = '{alice_id}'"))
        .await
        .unwrap();
    assert!(try_connect(addr, "alice", MEMBER_PASSWORD).await.is_err());
    let err = alice.batch_execute("SELECT * FROM rooms").await.unwrap_err();
    assert_eq!(sqlstate(&err), "28000");

    let locked = rows(&admin, "SELECT * FROM users WHERE status = 'locked'").await;
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].get("username"), Some("alice"));

    admin
        .batch_execute(&format!("UPDATE users SET locked = false WHERE id = '{alice_id}'"))
        .await
        .unwrap();
    assert!(try_connect(addr, "alice", MEMBER_PASSWORD).await.is_ok());
}

#[tokio::test]
async fn user_listing_is_admin_only() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let (_bob, _) = member(addr, "bob").await;

    let err = alice.batch_execute("SELECT * FROM users").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    let all = rows(&admin, "SELECT * FROM users").await;
    let names: Vec<_> = all.iter().map(|r| r.get("username").unwrap_or_default()).collect();
    assert_eq!(names, vec!["admin", "alice", "bob"]);
    assert!(all.iter().all(|r| r.get("status") == Some("active")));

    let admins = rows(&admin, "SELECT * FROM users WHERE role = 'admin'").await;
    assert_eq!(admins.len(), 1);
    let found = rows(&admin, "SELECT * FROM users WHERE username = 'BO'").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("username"), Some("bob"));
}

#[tokio::test]
async fn suspension_blocks_booking_and_threshold_applies() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let room = create_room(&admin, "R104").await;
    let day = future_day();

    for slot in 0..3 {
        alice
            .batch_execute(&book_sql(Ulid::new(), room, day + slot * HOUR_MS, day + (slot + 1) * HOUR_MS))
            .await
            .unwrap();
    }
    let err = alice
        .batch_execute(&book_sql(Ulid::new(), room, day + 5 * HOUR_MS, day + 6 * HOUR_MS))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23514");

    let users = rows(&admin, &format!("SELECT * FROM frequent_bookers WHERE day = {}", day + DAY_MS)).await;
    assert!(users.is_empty());
    let ranked = rows(&admin, &format!("SELECT * FROM frequent_bookers WHERE day = {day}")).await;
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].get("username"), Some("alice"));
    assert_eq!(ranked[0].get("booking_count"), Some("3"));
    let alice_id = ranked[0].get("user_id").unwrap().to_string();

    let err = alice
        .batch_execute(&format!("UPDATE users SET suspended = true WHERE id = '{alice_id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    admin
        .batch_execute(&format!("UPDATE users SET suspended = true WHERE id = '{alice_id}'"))
        .await
        .unwrap();
    let err = alice
        .batch_execute(&book_sql(Ulid::new(), room, day + DAY_MS, day + DAY_MS + HOUR_MS))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");
}

#[tokio::test]
async fn schedule_and_room_catalog() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let room = create_room(&admin, "R105").await;
    let day = future_day();

    alice
        .batch_execute(&book_sql(Ulid::new(), room, day + 10 * HOUR_MS, day + 11 * HOUR_MS))
        .await
        .unwrap();

    let schedule = rows(&alice, &format!("SELECT * FROM schedule WHERE room_id = '{room}' AND day = {day}")).await;
    let kinds: Vec<_> = schedule.iter().map(|r| r.get("kind").unwrap_or_default()).collect();
    assert_eq!(kinds, vec!["free", "booking", "free"]);

    let with_projector = rows(&alice, "SELECT * FROM rooms WHERE capacity >= 4 AND facility = 'projector'").await;
    assert_eq!(with_projector.len(), 1);
    assert_eq!(with_projector[0].get("code"), Some("R105"));

    admin
        .batch_execute(&format!("UPDATE rooms SET status = 'maintenance' WHERE id = '{room}'"))
        .await
        .unwrap();
    assert!(rows(&alice, "SELECT * FROM rooms WHERE status = 'available'").await.is_empty());
    assert_eq!(rows(&alice, "SELECT * FROM rooms").await.len(), 1);
}

#[tokio::test]
async fn sweep_is_admin_only_and_reports_cancellations() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, _) = member(addr, "alice").await;
    let room = create_room(&admin, "R106").await;
    let day = future_day();

    let id = Ulid::new();
    alice
        .batch_execute(&book_sql(id, room, day + HOUR_MS, day + 2 * HOUR_MS))
        .await
        .unwrap();

    let err = alice.batch_execute("SWEEP").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    admin
        .batch_execute(&format!("DELETE FROM rooms WHERE id = '{room}'"))
        .await
        .unwrap();
    let swept = rows(&admin, "SWEEP").await;
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].get("booking_id"), Some(id.to_string().as_str()));
    assert_eq!(swept[0].get("reason"), Some("orphaned_room"));

    assert!(rows(&admin, "SWEEP").await.is_empty());
}

#[tokio::test]
async fn listener_receives_room_events() {
    let (addr, _engine) = start_test_server().await;
    let admin = admin(addr).await;
    let (alice, mut rx) = member(addr, "alice").await;
    let (bob, _) = member(addr, "bob").await;
    let room = create_room(&admin, "R107").await;
    let other = create_room(&admin, "R108").await;
    let day = future_day();

    alice.batch_execute(&format!("LISTEN room_{room}")).await.unwrap();

    bob.batch_execute(&book_sql(Ulid::new(), other, day + HOUR_MS, day + 2 * HOUR_MS))
        .await
        .unwrap();
    let id = Ulid::new();
    bob.batch_execute(&book_sql(id, room, day + HOUR_MS, day + 2 * HOUR_MS))
        .await
        .unwrap();

    // Pending events are delivered with the listener's next statement.
    alice.batch_execute("SELECT * FROM rooms").await.unwrap();

    let notif = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .ok()
        .flatten()
        .expect("expected notification");
    assert_eq!(notif.channel(), format!("room_{room}"));
    let payload: serde_json::Value = serde_json::from_str(notif.payload()).unwrap();
    assert_eq!(payload["event"], "booking_confirmed");
    assert_eq!(payload["data"]["id"], id.to_string());

    let none = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(none.is_err(), "no events from unsubscribed rooms");
}
