use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::SlotAuthSource;
use crate::ledger::LedgerError;
use crate::model::*;
use crate::observability;
use crate::service::{parse_date, BookingService};
use crate::sql::{self, BookingFilter, BookingValues, CancelFilter, Command, ResultTable};

pub struct SlotHandler {
    service: Arc<BookingService>,
    query_parser: Arc<SlotQueryParser>,
}

impl SlotHandler {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self {
            service,
            query_parser: Arc::new(SlotQueryParser),
        }
    }

    /// Parse, run and time one statement. Result columns use `format`.
    async fn run(&self, query: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(ledger_err)
    }

    async fn execute_command(
        &self,
        cmd: Command,
        format: &Format,
    ) -> Result<Response, LedgerError> {
        match cmd {
            Command::SelectAvailability {
                date,
                available_only,
            } => {
                let view = self.service.get_availability(&date).await?;
                Ok(availability_response(&view, available_only, format))
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::Id(id) => vec![self.service.get_booking(id).await?],
                    BookingFilter::OnDate(date) => {
                        let date = parse_date(&date)?;
                        self.service.list_bookings(date, date).await?
                    }
                    BookingFilter::Between { from, to } => {
                        self.service
                            .list_bookings(parse_date(&from)?, parse_date(&to)?)
                            .await?
                    }
                };
                Ok(bookings_response(&bookings, format))
            }
            Command::InsertBooking { values } => {
                let booking = self.service.create_booking(draft_from(values)?).await?;
                Ok(bookings_response(std::slice::from_ref(&booking), format))
            }
            Command::UpdateBookingStatus { id, status } => {
                let booking = self.service.update_status(id, &status).await?;
                Ok(bookings_response(std::slice::from_ref(&booking), format))
            }
            Command::CancelBooking { target } => {
                let target = match target {
                    CancelFilter::Id(id) => CancelTarget::Id(id),
                    CancelFilter::ClientOnDate { client_name, date } => {
                        CancelTarget::ClientOnDate {
                            client_name,
                            date: parse_date(&date)?,
                        }
                    }
                };
                let booking = self.service.cancel_booking(target).await?;
                Ok(bookings_response(std::slice::from_ref(&booking), format))
            }
        }
    }
}

fn draft_from(values: BookingValues) -> Result<BookingDraft, LedgerError> {
    let start_time = TimeOfDay::parse(&values.start_time)
        .ok_or(LedgerError::Validation("start_time must be HH:MM"))?;
    let status = match values.status.as_deref() {
        Some(s) => Some(BookingStatus::parse(s).ok_or(LedgerError::Validation("unknown status"))?),
        None => None,
    };
    Ok(BookingDraft {
        client_name: values.client_name,
        client_phone: values.client_phone,
        date: parse_date(&values.date)?,
        start_time,
        vehicle_type: values.vehicle_type,
        vehicle_plate: values.vehicle_plate,
        service_type: values.service_type,
        extras: values.extras,
        price_cents: values.price_cents,
        status,
        notes: values.notes,
    })
}

fn columns(defs: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    defs.iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn availability_schema(format: &Format) -> Vec<FieldInfo> {
    columns(
        &[
            ("date", Type::VARCHAR),
            ("start", Type::VARCHAR),
            ("end", Type::VARCHAR),
            ("duration_minutes", Type::INT4),
            ("is_booked", Type::BOOL),
            ("provenance", Type::VARCHAR),
            ("stale", Type::BOOL),
        ],
        format,
    )
}

fn bookings_schema(format: &Format) -> Vec<FieldInfo> {
    columns(
        &[
            ("id", Type::VARCHAR),
            ("client_name", Type::VARCHAR),
            ("client_phone", Type::VARCHAR),
            ("date", Type::VARCHAR),
            ("start_time", Type::VARCHAR),
            ("end_time", Type::VARCHAR),
            ("vehicle_type", Type::VARCHAR),
            ("vehicle_plate", Type::VARCHAR),
            ("service_type", Type::VARCHAR),
            ("extras", Type::VARCHAR),
            ("price", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("notes", Type::VARCHAR),
            ("created_at", Type::INT8),
            ("updated_at", Type::INT8),
        ],
        format,
    )
}

/// Row shape for a statement before it runs, taken from the table it
/// targets. Statements that will not parse describe no columns.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    match sql::result_table(sql) {
        Ok(ResultTable::Availability) => availability_schema(format),
        Ok(ResultTable::Bookings) => bookings_schema(format),
        Err(_) => vec![],
    }
}

fn availability_response(
    view: &AvailabilityView,
    available_only: bool,
    format: &Format,
) -> Response {
    let schema = Arc::new(availability_schema(format));
    let date = view.date.to_string();
    let shown: Vec<(&TimeSlot, bool)> = if available_only {
        view.available_slots().map(|slot| (slot, false)).collect()
    } else {
        view.slots.iter().map(|s| (&s.slot, s.is_booked)).collect()
    };
    let rows: Vec<PgWireResult<_>> = shown
        .into_iter()
        .map(|(slot, is_booked)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&date)?;
            encoder.encode_field(&slot.start.to_string())?;
            encoder.encode_field(&slot.end.to_string())?;
            encoder.encode_field(&i32::from(slot.duration_minutes))?;
            encoder.encode_field(&is_booked)?;
            encoder.encode_field(&view.provenance.as_str().to_string())?;
            encoder.encode_field(&view.stale)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Cents as a decimal string, `2550` → `"25.50"`.
pub fn format_price(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn bookings_response(bookings: &[Booking], format: &Format) -> Response {
    let schema = Arc::new(bookings_schema(format));
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let end = b.start_time.plus_minutes(crate::slots::SLOT_MINUTES);
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.client_name)?;
            encoder.encode_field(&b.client_phone)?;
            encoder.encode_field(&b.date.to_string())?;
            encoder.encode_field(&b.start_time.to_string())?;
            encoder.encode_field(&end.to_string())?;
            encoder.encode_field(&b.vehicle_type)?;
            encoder.encode_field(&b.vehicle_plate)?;
            encoder.encode_field(&b.service_type)?;
            encoder.encode_field(&b.extras.join(","))?;
            encoder.encode_field(&format_price(b.price_cents))?;
            encoder.encode_field(&b.status.as_str().to_string())?;
            encoder.encode_field(&b.notes)?;
            encoder.encode_field(&b.created_at)?;
            encoder.encode_field(&b.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for SlotHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotQueryParser;

#[async_trait]
impl QueryParser for SlotQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(
            stmt,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotHandler {
    type Statement = String;
    type QueryParser = SlotQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        debug!("extended query: {sql}");
        self.run(&sql, &portal.result_column_format).await
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
            result_schema(&target.statement, &Format::UnifiedText),
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
            &target.result_column_format,
        )))
    }
}

/// Byte range and number of each `$N` placeholder outside quoted text.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                // A doubled quote closes and reopens, which leaves us inside.
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let start = i;
                i += 1;
                let digits = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[digits..i].parse::<usize>()
                    && n > 0
                {
                    found.push((start..i, n));
                }
            }
            None => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in one left-to-right
/// pass. Inlined text is never scanned again.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = params.get(n - 1) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotFactory {
    handler: Arc<SlotHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotFactory {
    pub fn new(service: Arc<BookingService>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotHandler::new(service)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SlotAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotFactory {
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
    service: Arc<BookingService>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SlotFactory::new(service, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each ledger failure.
pub fn sqlstate(e: &LedgerError) -> &'static str {
    match e {
        LedgerError::InvalidDate(_) => "22007",
        LedgerError::SlotConflict { .. } => "23505",
        LedgerError::ClosedDay(_)
        | LedgerError::InvalidSlot { .. }
        | LedgerError::Validation(_)
        | LedgerError::LimitExceeded(_) => "23514",
        LedgerError::BookingNotFound(_) => "P0002",
        LedgerError::InvalidTransition(_) => "55000",
        LedgerError::StoreUnavailable(_) => "58030",
    }
}

fn ledger_err(e: LedgerError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
