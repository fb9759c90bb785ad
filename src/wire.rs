use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenants: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = SlotwiseFactory::new(tenants, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Auth ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SharedPasswordSource {
    password: String,
}

#[async_trait]
impl AuthSource for SharedPasswordSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Handler ──────────────────────────────────────────────────────

struct Subscription {
    channel: String,
    rx: broadcast::Receiver<Event>,
}

/// Per-connection handler. The database name of the connection is the
/// hostname its tenant is resolved from.
pub struct SlotwiseHandler {
    tenants: Arc<TenantManager>,
    query_parser: Arc<SlotwiseQueryParser>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SlotwiseHandler {
    pub fn new(tenants: Arc<TenantManager>) -> Self {
        Self {
            tenants,
            query_parser: Arc::new(SlotwiseQueryParser),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let host = client.metadata().get("database").cloned().unwrap_or_default();
        self.tenants.engine_for_host(&host).map_err(engine_err)
    }

    /// Parse, execute and record one statement, then flush pending notifications.
    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(client, cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!("{label} failed: {e}");
        }

        self.flush_notifications(client).await?;
        result
    }

    async fn execute_command<C: ClientInfo>(&self, client: &C, cmd: Command) -> PgWireResult<Response> {
        // Tenant administration works from any connection.
        match cmd {
            Command::InsertTenant { id, domain } => {
                self.tenants.register_tenant(id, &domain).await.map_err(engine_err)?;
                return Ok(Response::Execution(Tag::new("INSERT").with_rows(1)));
            }
            Command::UpdateTenantDomain { id, domain } => {
                self.tenants.change_domain(id, &domain).await.map_err(engine_err)?;
                return Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)));
            }
            Command::UpdateTenantActive { id, active } => {
                self.tenants.set_active(id, active).await.map_err(engine_err)?;
                return Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)));
            }
            Command::SelectTenant { domain } => {
                let id = self.tenants.resolve(&domain).map_err(engine_err)?;
                let tenant = self.tenants.get(&id).ok_or_else(|| engine_err(EngineError::NotFound(id)))?;
                return tenant_rows(vec![tenant]);
            }
            Command::Unlisten { channel } => {
                let mut subs = lock_subscriptions(&self.subscriptions);
                match channel {
                    Some(channel) => subs.retain(|s| s.channel != channel),
                    None => subs.clear(),
                }
                return Ok(Response::Execution(Tag::new("UNLISTEN")));
            }
            _ => {}
        }

        let engine = self.resolve_engine(client)?;
        match cmd {
            Command::InsertStaff { staff } => {
                let count = staff.len();
                for (id, name) in staff {
                    engine.create_staff(id, name).await.map_err(engine_err)?;
                }
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::DeleteStaff { id } => {
                engine.remove_staff(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertSchedules { rows } => {
                let count = rows.len();
                let mut grouped: BTreeMap<(Ulid, u32), (chrono::Weekday, Vec<Span>)> = BTreeMap::new();
                for row in rows {
                    grouped
                        .entry((row.staff_id, row.weekday.num_days_from_monday()))
                        .or_insert_with(|| (row.weekday, Vec::new()))
                        .1
                        .push(row.hours);
                }
                for ((staff_id, _), (weekday, hours)) in grouped {
                    engine.add_schedule_hours(staff_id, weekday, hours).await.map_err(engine_err)?;
                }
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::DeleteSchedule { staff_id, weekday } => {
                engine.clear_schedule(staff_id, weekday).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertOverrides { rows } => {
                let count = rows.len();
                let mut grouped: BTreeMap<(Ulid, chrono::NaiveDate), Vec<Span>> = BTreeMap::new();
                for row in rows {
                    let hours = grouped.entry((row.staff_id, row.date)).or_default();
                    hours.extend(row.hours);
                }
                for ((staff_id, date), hours) in grouped {
                    engine.add_override_hours(staff_id, date, hours).await.map_err(engine_err)?;
                }
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::DeleteOverride { staff_id, date } => {
                let removed = engine.clear_override(staff_id, date).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(usize::from(removed))))
            }
            Command::InsertBooking { booking } => {
                engine.create_booking(booking).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::BatchInsertBookings { bookings } => {
                let count = bookings.len();
                engine.create_bookings(bookings).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::UpdateBookingStatus { id, status } => {
                engine.set_booking_status(id, status).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::RescheduleBooking { id, start, end, staff_id } => {
                engine.reschedule_booking(id, start, end, staff_id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectSlots { staff_id, date, duration_min } => {
                let slots = engine.get_slots(staff_id, date, duration_min).await.map_err(engine_err)?;
                slot_rows(staff_id, slots)
            }
            Command::SelectConflict { staff_id, start, end, exclude_id } => {
                let conflict = engine.has_conflict(staff_id, start, end, exclude_id).await.map_err(engine_err)?;
                let schema = Arc::new(conflict_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&conflict)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectStaff => staff_rows(engine.list_staff().await),
            Command::SelectSchedules { staff_id } => {
                let mut rows = Vec::new();
                for id in staff_ids(&engine, staff_id).await {
                    match engine.get_schedule(id).await {
                        Ok(schedule) => rows.extend(schedule),
                        Err(EngineError::NotFound(_)) if staff_id.is_none() => {}
                        Err(e) => return Err(engine_err(e)),
                    }
                }
                schedule_rows(rows)
            }
            Command::SelectOverrides { staff_id } => {
                let mut rows = Vec::new();
                for id in staff_ids(&engine, staff_id).await {
                    match engine.get_overrides(id).await {
                        Ok(overrides) => rows.extend(overrides),
                        Err(EngineError::NotFound(_)) if staff_id.is_none() => {}
                        Err(e) => return Err(engine_err(e)),
                    }
                }
                override_rows(rows)
            }
            Command::SelectBookings { staff_id, ids, window } => {
                let mut bookings = if !ids.is_empty() {
                    engine.get_bookings_by_id(&ids).await.map_err(engine_err)?
                } else if let Some(staff_id) = staff_id {
                    engine.get_bookings(staff_id, window).await.map_err(engine_err)?
                } else {
                    engine.list_bookings().await
                };
                bookings.retain(|b| {
                    staff_id.is_none_or(|s| b.staff_id == s)
                        && window.is_none_or(|w| Span::new(b.start, b.end).overlaps(&w))
                });
                booking_rows(bookings)
            }
            Command::Listen { channel } => {
                let staff_id = channel
                    .strip_prefix("staff_")
                    .and_then(|id| Ulid::from_string(id).ok())
                    .ok_or_else(|| {
                        user_error("42602", format!("invalid channel: {channel} (expected staff_{{id}})"))
                    })?;
                if engine.get_staff(&staff_id).is_none() {
                    return Err(engine_err(EngineError::NotFound(staff_id)));
                }
                let mut subs = lock_subscriptions(&self.subscriptions);
                if !subs.iter().any(|s| s.channel == channel) {
                    let rx = engine.notify.subscribe(staff_id);
                    subs.push(Subscription { channel, rx });
                }
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::InsertTenant { .. }
            | Command::UpdateTenantDomain { .. }
            | Command::UpdateTenantActive { .. }
            | Command::SelectTenant { .. }
            | Command::Unlisten { .. } => Err(user_error("XX000", "tenant command fell through".into())),
        }
    }

    /// Deliver everything received on this connection's channels since the last statement.
    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let pending = {
            let mut subs = lock_subscriptions(&self.subscriptions);
            let mut pending = Vec::new();
            subs.retain_mut(|sub| loop {
                match sub.rx.try_recv() {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(payload) => pending.push((sub.channel.clone(), payload)),
                        Err(e) => warn!("cannot encode event for {}: {e}", sub.channel),
                    },
                    Err(broadcast::error::TryRecvError::Empty) => break true,
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!("{}: listener lagged, {n} events dropped", sub.channel);
                    }
                    Err(broadcast::error::TryRecvError::Closed) => break false,
                }
            });
            pending
        };
        if pending.is_empty() {
            return Ok(());
        }

        let pid = i32::try_from(std::process::id()).unwrap_or(0);
        for (channel, payload) in pending {
            client
                .feed(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    pid, channel, payload,
                )))
                .await?;
        }
        client.flush().await?;
        Ok(())
    }
}

fn lock_subscriptions(subs: &Mutex<Vec<Subscription>>) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
    subs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn staff_ids(engine: &Engine, staff_id: Option<Ulid>) -> Vec<Ulid> {
    match staff_id {
        Some(id) => vec![id],
        None => engine.list_staff().await.into_iter().map(|s| s.id).collect(),
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn tenant_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("domain"), boolean("active")]
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![text("staff_id"), int8("start"), int8("end")]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![boolean("conflict")]
}

fn staff_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("name")]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![text("staff_id"), text("weekday"), text("start"), text("end")]
}

fn override_schema() -> Vec<FieldInfo> {
    vec![text("staff_id"), text("date"), text("start"), text("end")]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("staff_id"),
        text("service_id"),
        text("client"),
        int8("start"),
        int8("end"),
        text("status"),
    ]
}

/// Result columns of a statement, for Describe in the extended protocol.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_whitespace()
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c: char| c == '"' || c == ';').to_string())
        .unwrap_or_default();
    match table.as_str() {
        "tenants" => tenant_schema(),
        "slots" => slot_schema(),
        "conflicts" => conflict_schema(),
        "staff" => staff_schema(),
        "schedules" => schedule_schema(),
        "overrides" => override_schema(),
        "bookings" => booking_schema(),
        _ => vec![],
    }
}

/// Encode `items` into a result set, one row per item.
fn rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    mut encode: impl FnMut(&mut DataRowEncoder, T) -> PgWireResult<()>,
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

fn tenant_rows(tenants: Vec<Tenant>) -> PgWireResult<Response> {
    rows(tenant_schema(), tenants, |enc, t| {
        enc.encode_field(&t.id.to_string())?;
        enc.encode_field(&t.domain)?;
        enc.encode_field(&t.active)
    })
}

fn slot_rows(staff_id: Ulid, slots: Vec<Span>) -> PgWireResult<Response> {
    let sid = staff_id.to_string();
    rows(slot_schema(), slots, |enc, slot| {
        enc.encode_field(&sid)?;
        enc.encode_field(&slot.start)?;
        enc.encode_field(&slot.end)
    })
}

fn staff_rows(staff: Vec<StaffInfo>) -> PgWireResult<Response> {
    rows(staff_schema(), staff, |enc, s| {
        enc.encode_field(&s.id.to_string())?;
        enc.encode_field(&s.name)
    })
}

fn schedule_rows(schedule: Vec<ScheduleInfo>) -> PgWireResult<Response> {
    rows(schedule_schema(), schedule, |enc, s| {
        enc.encode_field(&s.staff_id.to_string())?;
        enc.encode_field(&s.weekday.to_string().to_lowercase())?;
        enc.encode_field(&format_time_of_day(s.hours.start))?;
        enc.encode_field(&format_time_of_day(s.hours.end))
    })
}

fn override_rows(overrides: Vec<OverrideInfo>) -> PgWireResult<Response> {
    rows(override_schema(), overrides, |enc, o| {
        enc.encode_field(&o.staff_id.to_string())?;
        enc.encode_field(&o.date.to_string())?;
        enc.encode_field(&o.hours.map(|h| format_time_of_day(h.start)))?;
        enc.encode_field(&o.hours.map(|h| format_time_of_day(h.end)))
    })
}

fn booking_rows(bookings: Vec<BookingInfo>) -> PgWireResult<Response> {
    rows(booking_schema(), bookings, |enc, b| {
        enc.encode_field(&b.id.to_string())?;
        enc.encode_field(&b.staff_id.to_string())?;
        enc.encode_field(&b.service_id.to_string())?;
        enc.encode_field(&b.client)?;
        enc.encode_field(&b.start)?;
        enc.encode_field(&b.end)?;
        enc.encode_field(&b.status.to_string())
    })
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for SlotwiseHandler {
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
pub struct SlotwiseQueryParser;

#[async_trait]
impl QueryParser for SlotwiseQueryParser {
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
impl ExtendedQueryHandler for SlotwiseHandler {
    type Statement = String;
    type QueryParser = SlotwiseQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(&self, client: &mut C, portal: &Portal<Self::Statement>, _max_rows: usize) -> PgWireResult<Response>
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
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if let Ok(n) = sql[start..end].parse::<usize>() {
                max = max.max(n);
            }
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    // Highest first so `$1` never clobbers the prefix of `$10`.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotwiseFactory {
    handler: Arc<SlotwiseHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SharedPasswordSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotwiseFactory {
    pub fn new(tenants: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotwiseHandler::new(tenants)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPasswordSource { password },
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotwiseFactory {
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

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for an engine error, chosen by its kind.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Conflict(_) => "23P01",
        _ => match e.kind() {
            "not_found" => "42704",
            "invalid_interval" => "22007",
            "validation" => "22023",
            _ => "58030",
        },
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), format!("{}: {e}", e.kind()))
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_count() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(count_params("SELECT * FROM slots WHERE staff_id = $1 AND date = $2 AND duration = $3"), 3);
        assert_eq!(count_params("UPDATE bookings SET status = $10 WHERE id = $2"), 10);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn describe_schema_follows_table() {
        let cols: Vec<String> = result_schema("SELECT * FROM bookings WHERE staff_id = $1")
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(cols, ["id", "staff_id", "service_id", "client", "start", "end", "status"]);
        assert_eq!(result_schema("select * from conflicts where staff_id = $1").len(), 1);
        assert!(result_schema("INSERT INTO staff (id) VALUES ($1)").is_empty());
    }

    #[test]
    fn sqlstate_by_kind() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::Conflict(id)), "23P01");
        assert_eq!(sqlstate(&EngineError::AlreadyExists(id)), "23505");
        assert_eq!(sqlstate(&EngineError::NotFound(id)), "42704");
        assert_eq!(sqlstate(&EngineError::TenantNotFound("x.com".into())), "42704");
        assert_eq!(sqlstate(&EngineError::InvalidInterval { start: 5, end: 1 }), "22007");
        assert_eq!(sqlstate(&EngineError::HasBookings(id)), "22023");
        assert_eq!(sqlstate(&EngineError::Store("disk".into())), "58030");
    }
}
