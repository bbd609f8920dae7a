use std::fmt::Debug;
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
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::auth::ListboardAuthSource;
use crate::engine::{Dashboard, EngineError};
use crate::observability::{self, EMPTY_RESULTS_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::session::{Session, SessionError, SessionManager};
use crate::sql::{self, Command, ViewKind, ViewQuery};

pub struct ListboardHandler {
    sessions: Arc<SessionManager>,
    query_parser: Arc<ListboardQueryParser>,
}

impl ListboardHandler {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            query_parser: Arc::new(ListboardQueryParser),
        }
    }

    /// Session name = the database the client connected to.
    fn session_name<C: ClientInfo>(client: &C) -> String {
        client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }

    async fn run(&self, name: String, sql: &str) -> PgWireResult<Response> {
        let started = Instant::now();
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        let result = self.execute_command(&name, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => debug!("session {name}: {label} in {:?}", started.elapsed()),
            Err(e) => warn!("session {name}: {label} failed: {e}"),
        }
        result
    }

    async fn execute_command(&self, name: &str, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::Refresh => {
                let session = self.sessions.reload(name).await.map_err(session_err)?;
                Ok(Response::Execution(
                    Tag::new("REFRESH").with_rows(session.snapshot().listings.len()),
                ))
            }
            Command::Select(query) => {
                let session = self.sessions.get_or_load(name).await.map_err(session_err)?;
                select_view(&session, &query)
            }
        }
    }
}

/// One recomputation pass for `query`, encoded as the view's rows.
fn select_view(session: &Session, query: &ViewQuery) -> PgWireResult<Response> {
    let schema = view_schema(query.view);
    let label = observability::view_label(query.view);
    let empty = |is_empty: bool| {
        if is_empty {
            metrics::counter!(EMPTY_RESULTS_TOTAL, "command" => label).increment(1);
        }
    };

    match query.view {
        ViewKind::CityOverview => {
            let view = session.city_overview();
            empty(view.is_empty());
            rows_response(schema, view.rows(), |enc, row| {
                enc.encode_field(&row.city_id)?;
                enc.encode_field(&row.city_name)?;
                enc.encode_field(&(row.count as i64))
            })
        }
        ViewKind::FilterOptions => {
            let options = session.filter_options();
            let rows: Vec<(String, String)> = options
                .cities
                .into_iter()
                .map(|c| ("city".to_string(), c))
                .chain(options.amenities.into_iter().map(|a| ("amenity".to_string(), a)))
                .collect();
            rows_response(schema, &rows, |enc, (kind, value)| {
                enc.encode_field(kind)?;
                enc.encode_field(value)
            })
        }
        _ => {
            let spec = query.to_spec(session.default_filter());
            let dash: Dashboard = session
                .recompute(&spec, query.bin_count())
                .map_err(engine_err)?;
            dashboard_view(query.view, schema, &dash, empty)
        }
    }
}

fn dashboard_view(
    view: ViewKind,
    schema: Vec<FieldInfo>,
    dash: &Dashboard,
    empty: impl Fn(bool),
) -> PgWireResult<Response> {
    match view {
        ViewKind::Listings => {
            empty(dash.listings.is_empty());
            rows_response(schema, dash.listings.rows(), |enc, l| {
                enc.encode_field(&l.id)?;
                enc.encode_field(&l.price)?;
                enc.encode_field(&l.nb_rooms)?;
                enc.encode_field(&l.num_bathrooms)?;
                enc.encode_field(&l.surface_area)?;
                enc.encode_field(&l.city_id)
            })
        }
        ViewKind::ListingsByCity => {
            empty(dash.by_city.is_empty());
            rows_response(schema, dash.by_city.rows(), |enc, row| {
                enc.encode_field(&row.city_id)?;
                enc.encode_field(&row.city_name)?;
                enc.encode_field(&(row.count as i64))
            })
        }
        ViewKind::PriceHistogram => {
            empty(dash.price_histogram.is_empty());
            rows_response(schema, dash.price_histogram.rows(), |enc, bin| {
                enc.encode_field(&bin.lower)?;
                enc.encode_field(&bin.upper)?;
                enc.encode_field(&(bin.count as i64))
            })
        }
        ViewKind::PriceByCity => {
            empty(dash.price_by_city.is_empty());
            rows_response(schema, dash.price_by_city.rows(), |enc, row| {
                enc.encode_field(&row.city_name)?;
                enc.encode_field(&row.price)
            })
        }
        ViewKind::SurfaceVsPrice => {
            empty(dash.surface_vs_price.is_empty());
            rows_response(schema, dash.surface_vs_price.rows(), |enc, row| {
                enc.encode_field(&row.surface_area)?;
                enc.encode_field(&row.price)
            })
        }
        ViewKind::CityMap => {
            empty(dash.city_map.is_empty());
            rows_response(schema, dash.city_map.rows(), |enc, m| {
                enc.encode_field(&m.city_name)?;
                enc.encode_field(&m.latitude)?;
                enc.encode_field(&m.longitude)?;
                enc.encode_field(&(m.count as i64))
            })
        }
        ViewKind::CityOverview | ViewKind::FilterOptions => Err(user_error(
            "XX000",
            format!("{} is not a filtered dashboard view", observability::view_label(view)),
        )),
    }
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    rows: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let data: Vec<PgWireResult<_>> = rows
        .iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, row)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(data))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

pub fn view_schema(view: ViewKind) -> Vec<FieldInfo> {
    match view {
        ViewKind::Listings => vec![
            field("id", Type::INT8),
            field("price", Type::FLOAT8),
            field("nb_rooms", Type::INT8),
            field("num_bathrooms", Type::INT8),
            field("surface_area", Type::FLOAT8),
            field("city_id", Type::INT8),
        ],
        ViewKind::ListingsByCity | ViewKind::CityOverview => vec![
            field("city_id", Type::INT8),
            field("city", Type::VARCHAR),
            field("count", Type::INT8),
        ],
        ViewKind::PriceHistogram => vec![
            field("bin_start", Type::FLOAT8),
            field("bin_end", Type::FLOAT8),
            field("count", Type::INT8),
        ],
        ViewKind::PriceByCity => vec![field("city", Type::VARCHAR), field("price", Type::FLOAT8)],
        ViewKind::SurfaceVsPrice => vec![
            field("surface_area", Type::FLOAT8),
            field("price", Type::FLOAT8),
        ],
        ViewKind::CityMap => vec![
            field("city", Type::VARCHAR),
            field("latitude", Type::FLOAT8),
            field("longitude", Type::FLOAT8),
            field("count", Type::INT8),
        ],
        ViewKind::FilterOptions => vec![field("kind", Type::VARCHAR), field("value", Type::VARCHAR)],
    }
}

/// Result schema for a statement, empty for anything that is not a view read.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    sql::target_view(sql).map(view_schema).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for ListboardHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let name = Self::session_name(client);
        Ok(vec![self.run(name, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ListboardQueryParser;

#[async_trait]
impl QueryParser for ListboardQueryParser {
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
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ListboardHandler {
    type Statement = String;
    type QueryParser = ListboardQueryParser;

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
        let name = Self::session_name(client);
        let sql = substitute_params(portal);
        self.run(name, &sql).await
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
            statement_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(statement_schema(
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
/// Numeric filters accept quoted numbers, so every value is bound as a string literal.
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass over `sql`: inserted values are never rescanned, and
/// `$N` inside a quoted literal or past the bound parameters is left as is.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;

    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            result.push(c);
            continue;
        }
        if c != '$' || in_literal {
            result.push(c);
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }
        let bound = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&sql[i..end]),
        }
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ListboardFactory {
    handler: Arc<ListboardHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ListboardAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ListboardFactory {
    pub fn new(sessions: Arc<SessionManager>, password: String) -> Self {
        let auth_source = ListboardAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ListboardHandler::new(sessions)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ListboardFactory {
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
    sessions: Arc<SessionManager>,
    password: String,
) -> std::io::Result<()> {
    let factory = ListboardFactory::new(sessions, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error("22023", e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

fn session_err(e: SessionError) -> PgWireError {
    user_error("08006", format!("session error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM listings"), 0);
        assert_eq!(
            count_params("SELECT * FROM listings WHERE price BETWEEN $1 AND $2 AND city = $3"),
            3
        );
        assert_eq!(count_params("SELECT * FROM listings WHERE price <= $12"), 12);
    }

    #[test]
    fn bind_params_is_single_pass() {
        let sql = "SELECT * FROM listings WHERE city = $2 AND amenity = $1";
        let params = [Some("Piscine".as_bytes()), Some("$1 O'Brien".as_bytes())];
        assert_eq!(
            bind_params(sql, &params),
            "SELECT * FROM listings WHERE city = '$1 O''Brien' AND amenity = 'Piscine'"
        );
    }

    #[test]
    fn bind_params_handles_ten_and_null() {
        let mut params: Vec<Option<&[u8]>> = vec![Some(b"x".as_slice()); 10];
        params[2] = None;
        params[9] = Some(b"ten".as_slice());
        assert_eq!(bind_params("$10 $1 $3", &params), "'ten' 'x' NULL");
        // unbound index and quoted placeholders stay untouched
        assert_eq!(bind_params("$11 '$1' $", &params), "$11 '$1' $");
    }

    #[test]
    fn every_view_has_a_schema() {
        for view in [
            ViewKind::Listings,
            ViewKind::ListingsByCity,
            ViewKind::PriceHistogram,
            ViewKind::PriceByCity,
            ViewKind::SurfaceVsPrice,
            ViewKind::CityMap,
            ViewKind::CityOverview,
            ViewKind::FilterOptions,
        ] {
            assert!(!view_schema(view).is_empty());
        }
    }

    #[test]
    fn statement_schema_for_non_views_is_empty() {
        assert!(statement_schema("REFRESH").is_empty());
        assert!(statement_schema("SELECT * FROM nowhere").is_empty());
        assert_eq!(
            statement_schema("SELECT * FROM listings WHERE price <= $1").len(),
            6
        );
    }
}
