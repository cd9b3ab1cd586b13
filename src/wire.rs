use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{Sink, SinkExt, stream};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::SalonAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::Recipient;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::{Tenant, TenantManager};

/// Serve one client connection until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SalonFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// `(channel, payload)` waiting to be written to the client.
type PendingNotification = (String, String);

/// One handler per connection. LISTEN subscriptions forward into `pending`;
/// queued notifications are written ahead of the next statement's results.
pub struct SalonHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SalonQueryParser>,
    pending_tx: mpsc::UnboundedSender<PendingNotification>,
    pending_rx: Mutex<mpsc::UnboundedReceiver<PendingNotification>>,
    listeners: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SalonHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Self {
            tenant_manager,
            query_parser: Arc::new(SalonQueryParser),
            pending_tx,
            pending_rx: Mutex::new(pending_rx),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_tenant<C: ClientInfo>(&self, client: &C) -> PgWireResult<Tenant> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .tenant(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let pending: Vec<PendingNotification> = {
            let mut rx = self.pending_rx.lock().await;
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        let pid = std::process::id() as i32;
        for (channel, payload) in pending {
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(pid, channel, payload),
                ))
                .await?;
        }
        Ok(())
    }

    async fn listen(&self, tenant: &Tenant, channel: String) -> PgWireResult<()> {
        let recipient = Recipient::from_channel(&channel).ok_or_else(|| {
            user_error(
                "42000",
                format!("invalid channel: {channel} (expected client_{{id}} or stylist_{{id}})"),
            )
        })?;
        let mut listeners = self.listeners.lock().await;
        if listeners.contains_key(&channel) {
            return Ok(());
        }

        let mut rx = tenant.hub.subscribe(&recipient);
        let tx = self.pending_tx.clone();
        let name = channel.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(n) => {
                        if tx.send((name.clone(), n.to_json())).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %name, skipped, "listener lagged, notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        debug!(%channel, "listening");
        listeners.insert(channel, forwarder);
        Ok(())
    }

    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        self.flush_notifications(client).await?;

        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&tenant, cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, tenant: &Tenant, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine: &Engine = &tenant.engine;
        match cmd {
            Command::UpsertBranch { branch } => {
                engine.upsert_branch(branch).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::InsertCalendarEntry { entry } => {
                engine.add_calendar_entry(entry).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteCalendarEntry { id } => {
                engine.remove_calendar_entry(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment { appointment } => {
                let created = engine
                    .create_appointment(appointment)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![appointment_rows(&[created])?])
            }
            Command::Reschedule {
                id,
                appointment_date,
                duration,
            } => {
                let moved = engine
                    .reschedule_to(id, appointment_date, duration)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![appointment_rows(&[moved])?])
            }
            Command::ChangeStatus { id, status } => {
                let changed = engine.update_status(id, status).await.map_err(engine_err)?;
                Ok(vec![appointment_rows(&[changed])?])
            }
            Command::CancelAppointment { id } => {
                engine.cancel_appointment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectAvailability {
                branch_id,
                date,
                duration,
                stylist_ids,
            } => {
                let availability = engine
                    .get_available_slots(&branch_id, &stylist_ids, date, duration)
                    .await;
                Ok(vec![availability_rows(&availability)?])
            }
            Command::SelectAppointments { branch_id, date } => {
                let appointments = engine
                    .appointments_for_day(&branch_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![appointment_rows(&appointments)?])
            }
            Command::Listen { channel } => {
                self.listen(tenant, channel).await?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

impl Drop for SalonHandler {
    fn drop(&mut self) {
        for (_, forwarder) in self.listeners.get_mut().drain() {
            forwarder.abort();
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("time", Type::INT8),
        field("available", Type::BOOL),
        field("message", Type::VARCHAR),
    ]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("branch_id", Type::VARCHAR),
        field("appointment_date", Type::INT8),
        field("duration", Type::INT4),
        field("status", Type::VARCHAR),
        field("stylists", Type::VARCHAR),
        field("client_id", Type::VARCHAR),
        field("client_name", Type::VARCHAR),
        field("guest", Type::BOOL),
        field("reminder_sent", Type::BOOL),
    ]
}

/// One row per candidate slot. A day with no slots still yields a single
/// row carrying the reason, with NULL time.
fn availability_rows(availability: &Availability) -> PgWireResult<Response> {
    let schema = Arc::new(availability_schema());
    let message = availability.message.as_deref();
    let mut rows: Vec<PgWireResult<_>> = Vec::with_capacity(availability.slots.len().max(1));
    if availability.slots.is_empty() {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&None::<i64>)?;
        encoder.encode_field(&false)?;
        encoder.encode_field(&message)?;
        rows.push(Ok(encoder.take_row()));
    }
    for slot in &availability.slots {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&slot.time)?;
        encoder.encode_field(&slot.available)?;
        encoder.encode_field(&message)?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn appointment_rows(appointments: &[Appointment]) -> PgWireResult<Response> {
    let schema = Arc::new(appointment_schema());
    let mut rows: Vec<PgWireResult<_>> = Vec::with_capacity(appointments.len());
    for a in appointments {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&a.id.to_string())?;
        encoder.encode_field(&a.branch_id)?;
        encoder.encode_field(&a.appointment_date)?;
        encoder.encode_field(&(a.duration_minutes() as i32))?;
        encoder.encode_field(&a.status.as_str())?;
        encoder.encode_field(&a.assigned_stylists().join(","))?;
        encoder.encode_field(&a.client_id)?;
        encoder.encode_field(&a.client_name)?;
        encoder.encode_field(&a.is_guest)?;
        encoder.encode_field(&a.reminder_sent)?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Columns a statement will return, decided from its text alone since
/// bound parameters are not known at describe time.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    let is_select = upper.starts_with("SELECT");
    if is_select && upper.contains("AVAILABILITY") {
        return availability_schema();
    }
    let touches_appointment = ["APPOINTMENTS", "RESCHEDULES", "STATUS_CHANGES"]
        .iter()
        .any(|t| upper.contains(t));
    if (is_select || upper.starts_with("INSERT")) && touches_appointment {
        appointment_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SalonHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SalonQueryParser;

#[async_trait]
impl QueryParser for SalonQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SalonHandler {
    type Statement = String;
    type QueryParser = SalonQueryParser;

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
        let mut responses = self.run(client, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
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

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text-format parameters as quoted literals. Highest index
/// first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SalonFactory {
    handler: Arc<SalonHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SalonAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SalonFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(SalonHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SalonAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SalonFactory {
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
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Closed(_) => "P0002",
        EngineError::LeadTime(_) => "P0003",
        EngineError::NotFound { .. } => "P0004",
        EngineError::InvalidTransition { .. } => "P0005",
        EngineError::Configuration(_) => "P0006",
        EngineError::SlotUnavailable { .. } => "23P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Wal(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
