use std::fmt::Debug;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use futures::{Sink, SinkExt, stream};
use pgwire::api::auth::sasl::SASLAuthStartupHandler;
use pgwire::api::auth::sasl::scram::ScramAuth;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, METADATA_USER, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::response::NotificationResponse;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;
use ulid::Ulid;

use crate::auth::{Identity, MeetbookAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::event_payload;
use crate::observability::{self, AUTH_FAILURES_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

const CHANNEL_PREFIX: &str = "room_";

/// Per-connection handler. The login user resolves to an `Identity` for
/// every statement, so suspensions, locks and role changes apply immediately.
pub struct MeetbookHandler {
    engine: Arc<Engine>,
    auth: Arc<MeetbookAuthSource>,
    /// Account created by this connection while it was a guest.
    registered: OnceLock<Ulid>,
    query_parser: Arc<MeetbookQueryParser>,
    listening: Mutex<Vec<(String, broadcast::Receiver<Event>)>>,
}

impl MeetbookHandler {
    pub fn new(engine: Arc<Engine>, auth: Arc<MeetbookAuthSource>) -> Self {
        Self {
            engine,
            auth,
            registered: OnceLock::new(),
            query_parser: Arc::new(MeetbookQueryParser),
            listening: Mutex::new(Vec::new()),
        }
    }

    fn login<C: ClientInfo>(client: &C) -> PgWireResult<String> {
        client
            .metadata()
            .get(METADATA_USER)
            .cloned()
            .ok_or_else(|| user_error("28000", "no user in startup message".into()))
    }

    /// Parse, run and time one statement, then flush pending notifications.
    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let login = Self::login(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(&login, cmd).await;

        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);

        self.flush_notifications(client).await?;
        result
    }

    /// Identity for the next statement, or `None` for a guest that has not
    /// registered yet. A guest connection only ever acts as the account it
    /// created itself.
    fn resolve(&self, login: &str) -> PgWireResult<Option<Identity>> {
        if let Some(who) = self.engine.identify(login) {
            let own = !self.auth.is_guest() || self.registered.get() == Some(&who.user_id);
            return if own {
                Ok(Some(who))
            } else {
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                Err(user_error(
                    "28000",
                    format!("account {login} exists; reconnect with its password"),
                ))
            };
        }
        if self.engine.user_by_name(login).is_some() || !self.auth.is_guest() {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            return Err(user_error("28000", format!("account {login} is locked or removed")));
        }
        Ok(None)
    }

    /// Statements from a login with no account: only self-registration as a member.
    async fn register_self(&self, login: &str, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertUser {
                id,
                username,
                email,
                role: Role::Member,
                password,
            } if username == login => {
                let user = self
                    .engine
                    .register_user(None, id, username, email, Role::Member, &password)
                    .await
                    .map_err(engine_err)?;
                let _ = self.registered.set(user.id);
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertUser { .. } => {
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                Err(user_error(
                    "42501",
                    format!("login {login} may only register itself as a member"),
                ))
            }
            _ => {
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                Err(user_error("28000", format!("unknown user: {login}")))
            }
        }
    }

    async fn execute_command(&self, login: &str, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        let Some(who) = self.resolve(login)? else {
            return self.register_self(login, cmd).await;
        };

        match cmd {
            Command::InsertUser {
                id,
                username,
                email,
                role,
                password,
            } => {
                engine
                    .register_user(Some(&who), id, username, email, role, &password)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateUser { id, update } => {
                engine.update_user(&who, id, update).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteUser { id } => {
                engine.delete_user(&who, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertRoom { room } => {
                engine.create_room(&who, room).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoom { id, update } => {
                engine.update_room(&who, id, update).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteRoom { id } => {
                engine.retire_room(&who, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking {
                id,
                room_id,
                start,
                end,
                title,
            } => {
                engine
                    .book(&who, id, room_id, start, end, title)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateBooking { id, start, end } => {
                engine.reschedule(&who, id, start, end).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                if who.is_admin() {
                    engine.admin_cancel(&who, id).await.map_err(engine_err)?;
                } else {
                    engine.cancel(&who, id).await.map_err(engine_err)?;
                }
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings {
                room_id,
                user_id,
                start,
                end,
            } => {
                let window = TimeWindow { start, end };
                let bookings = match (room_id, start, end) {
                    // A fully bounded room query is the room's occupancy view.
                    (Some(room_id), Some(start), Some(end)) if user_id.is_none() => engine
                        .find_active_bookings(room_id, start, end)
                        .await
                        .map_err(engine_err)?,
                    _ if who.is_admin() => engine
                        .filtered_bookings(&who, room_id, user_id, window)
                        .await
                        .map_err(engine_err)?,
                    _ => {
                        if user_id.is_some_and(|u| u != who.user_id) {
                            return Err(engine_err(EngineError::Permission(
                                "members can only list their own bookings",
                            )));
                        }
                        engine
                            .user_bookings(who.user_id, room_id, window, true)
                            .await
                            .map_err(engine_err)?
                    }
                };
                booking_rows(bookings)
            }
            Command::SelectRooms { filter } => room_rows(engine.list_rooms(&filter).await),
            Command::SelectUsers { filter } => user_rows(engine.list_users(&who, &filter).map_err(engine_err)?),
            Command::SelectSchedule { room_id, day } => {
                let schedule = engine
                    .room_schedule(room_id, day, now_ms())
                    .await
                    .map_err(engine_err)?;
                schedule_rows(schedule)
            }
            Command::SelectFrequentBookers { day, ascending } => {
                let ranked = engine.frequent_bookers(day, ascending).await.map_err(engine_err)?;
                frequent_booker_rows(ranked)
            }
            Command::Sweep => {
                who.require_admin().map_err(engine_err)?;
                let report = engine.sweep_non_compliant(now_ms()).await;
                sweep_rows(report.cancelled)
            }
            Command::Listen { channel } => {
                let room_id = parse_channel(&channel)?;
                let rx = engine.notify.subscribe(room_id);
                let mut listening = self.listening.lock().await;
                if !listening.iter().any(|(c, _)| *c == channel) {
                    listening.push((channel, rx));
                }
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.listening.lock().await.retain(|(c, _)| *c != channel);
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.listening.lock().await.clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }

    /// Deliver queued room events to the client as NotificationResponse messages.
    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let mut pending = Vec::new();
        {
            let mut listening = self.listening.lock().await;
            for (channel, rx) in listening.iter_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(event) => pending.push((channel.clone(), event_payload(&event))),
                        Err(broadcast::error::TryRecvError::Lagged(n)) => {
                            debug!("{channel}: dropped {n} lagged events");
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        for (channel, payload) in pending {
            client
                .send(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    0, channel, payload,
                )))
                .await?;
        }
        Ok(())
    }
}

fn parse_channel(channel: &str) -> PgWireResult<Ulid> {
    let id = channel.strip_prefix(CHANNEL_PREFIX).ok_or_else(|| {
        user_error(
            "42000",
            format!("invalid channel: {channel} (expected {CHANNEL_PREFIX}{{id}})"),
        )
    })?;
    Ulid::from_string(id).map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("room_id", Type::VARCHAR),
        text_field("user_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
        text_field("status", Type::VARCHAR),
        text_field("confirm_code", Type::VARCHAR),
        text_field("title", Type::VARCHAR),
    ]
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("code", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("location", Type::VARCHAR),
        text_field("capacity", Type::INT8),
        text_field("facilities", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
    ]
}

fn user_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("username", Type::VARCHAR),
        text_field("email", Type::VARCHAR),
        text_field("role", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id", Type::VARCHAR),
        text_field("room_code", Type::VARCHAR),
        text_field("kind", Type::VARCHAR),
        text_field("booking_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
    ]
}

fn frequent_booker_schema() -> Vec<FieldInfo> {
    vec![
        text_field("user_id", Type::VARCHAR),
        text_field("username", Type::VARCHAR),
        text_field("booking_count", Type::INT8),
    ]
}

fn sweep_schema() -> Vec<FieldInfo> {
    vec![
        text_field("booking_id", Type::VARCHAR),
        text_field("reason", Type::VARCHAR),
    ]
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(bookings: Vec<Booking>) -> PgWireResult<Response> {
    rows_response(booking_schema(), bookings, |enc, b| {
        enc.encode_field(&b.id.to_string())?;
        enc.encode_field(&b.room_id.to_string())?;
        enc.encode_field(&b.user_id.to_string())?;
        enc.encode_field(&b.span.start)?;
        enc.encode_field(&b.span.end)?;
        enc.encode_field(&b.status.as_str().to_string())?;
        enc.encode_field(&b.confirm_code)?;
        enc.encode_field(&b.title)
    })
}

fn room_rows(rooms: Vec<Room>) -> PgWireResult<Response> {
    rows_response(room_schema(), rooms, |enc, r| {
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.code)?;
        enc.encode_field(&r.display_name)?;
        enc.encode_field(&r.location)?;
        enc.encode_field(&i64::from(r.capacity))?;
        enc.encode_field(&r.facilities.join(","))?;
        enc.encode_field(&r.status.as_str().to_string())
    })
}

fn user_rows(users: Vec<User>) -> PgWireResult<Response> {
    rows_response(user_schema(), users, |enc, u| {
        enc.encode_field(&u.id.to_string())?;
        enc.encode_field(&u.username)?;
        enc.encode_field(&u.email)?;
        enc.encode_field(&u.role.as_str().to_string())?;
        enc.encode_field(&u.status().as_str().to_string())
    })
}

/// Bookings and free gaps of the day interleaved by start time.
fn schedule_rows(schedule: RoomSchedule) -> PgWireResult<Response> {
    let mut entries: Vec<(&'static str, Option<String>, Span)> = schedule
        .bookings
        .iter()
        .map(|b| ("booking", Some(b.id.to_string()), b.span))
        .chain(schedule.free.iter().map(|s| ("free", None, *s)))
        .collect();
    entries.sort_by_key(|(_, _, span)| span.start);

    let room_id = schedule.room_id.to_string();
    let room_code = schedule.room_code;
    rows_response(schedule_schema(), entries, |enc, (kind, booking_id, span)| {
        enc.encode_field(&room_id)?;
        enc.encode_field(&room_code)?;
        enc.encode_field(&kind.to_string())?;
        enc.encode_field(&booking_id)?;
        enc.encode_field(&span.start)?;
        enc.encode_field(&span.end)
    })
}

fn frequent_booker_rows(rows: Vec<FrequentBooker>) -> PgWireResult<Response> {
    rows_response(frequent_booker_schema(), rows, |enc, r| {
        enc.encode_field(&r.user_id.to_string())?;
        enc.encode_field(&r.username)?;
        enc.encode_field(&(r.booking_count as i64))
    })
}

fn sweep_rows(cancelled: Vec<(Ulid, crate::engine::Violation)>) -> PgWireResult<Response> {
    rows_response(sweep_schema(), cancelled, |enc, (id, violation)| {
        enc.encode_field(&id.to_string())?;
        enc.encode_field(&violation.as_str().to_string())
    })
}

/// Result columns a statement will produce, judged from its text alone so
/// statements with unbound `$n` parameters can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim().to_ascii_uppercase();
    if upper.starts_with("SWEEP") {
        return sweep_schema();
    }
    if !upper.starts_with("SELECT") {
        return vec![];
    }
    let mut words = upper.split_whitespace();
    let table = words
        .by_ref()
        .find(|w| *w == "FROM")
        .and_then(|_| words.next())
        .map(|t| t.trim_matches(|c: char| c == '"' || c == ';'))
        .map(|t| t.rsplit('.').next().unwrap_or(t));
    match table {
        Some("FREQUENT_BOOKERS") => frequent_booker_schema(),
        Some("SCHEDULE") => schedule_schema(),
        Some("ROOMS") => room_schema(),
        Some("BOOKINGS") => booking_schema(),
        Some("USERS") => user_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for MeetbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MeetbookQueryParser;

#[async_trait]
impl QueryParser for MeetbookQueryParser {
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
impl ExtendedQueryHandler for MeetbookHandler {
    type Statement = String;
    type QueryParser = MeetbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
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
    let mut result = portal.statement.statement.to_string();

    // Highest index first so `$1` never clobbers the prefix of `$10`.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

/// Handlers for one connection. The SCRAM exchange state lives in the
/// startup handler, so every connection gets its own factory.
pub struct MeetbookFactory {
    handler: Arc<MeetbookHandler>,
    auth_handler: Arc<SASLAuthStartupHandler<DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MeetbookFactory {
    pub fn new(engine: Arc<Engine>, guest_credential: Arc<Credential>) -> Self {
        let auth_source = Arc::new(MeetbookAuthSource::new(engine.clone(), guest_credential));
        let scram = ScramAuth::new(auth_source.clone());
        let param_provider = Arc::new(DefaultServerParameterProvider::default());
        Self {
            handler: Arc::new(MeetbookHandler::new(engine, auth_source)),
            auth_handler: Arc::new(SASLAuthStartupHandler::new(param_provider).with_scram(scram)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MeetbookFactory {
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
    engine: Arc<Engine>,
    guest_credential: Arc<Credential>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = MeetbookFactory::new(engine, guest_credential);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Permission(_) => "42501",
        EngineError::Conflict(_) => "23P01",
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidState(_) => "55000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::ThresholdExceeded(_) => "23514",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
