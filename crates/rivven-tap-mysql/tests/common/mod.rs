//! Shared helpers for integration tests
//!
//! `MockConnection` answers queries from a script of SQL fragments and
//! records every statement it sees, so tests can assert on both results and
//! the exact SQL issued.

#![allow(dead_code)]

use async_trait::async_trait;
use rivven_tap_mysql::prelude::*;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

/// Install a test-writer tracing subscriber once per test binary
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rivven_tap_mysql=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Build a row from `(column, value)` pairs
pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs.iter().map(|(name, _)| name.to_string()).collect(),
        pairs.iter().map(|(_, value)| value.clone()).collect(),
    )
}

/// An `information_schema.COLUMNS` row
pub fn column_row(name: &str, column_type: &str, nullable: bool) -> Row {
    row(&[
        ("column_name", name.into()),
        ("column_type", column_type.into()),
        ("is_nullable", if nullable { "YES" } else { "NO" }.into()),
    ])
}

/// A `SHOW columns` row
pub fn show_column_row(field: &str, type_text: &str, nullable: bool) -> Row {
    row(&[
        ("Field", field.into()),
        ("Type", type_text.into()),
        ("Null", if nullable { "YES" } else { "NO" }.into()),
        ("Key", "".into()),
        ("Default", Value::Null),
        ("Extra", "".into()),
    ])
}

/// An `information_schema.TABLES` row
pub fn relation_row(name: &str, is_view: bool) -> Row {
    row(&[
        ("table_name", name.into()),
        ("table_type", if is_view { "VIEW" } else { "BASE TABLE" }.into()),
    ])
}

/// An `information_schema.STATISTICS` row
pub fn index_row(index: &str, column: &str, unique: bool) -> Row {
    row(&[
        ("index_name", index.into()),
        ("column_name", column.into()),
        ("non_unique", Value::Int64(if unique { 0 } else { 1 })),
    ])
}

#[derive(Clone)]
struct Scripted {
    fragment: String,
    params: Option<Vec<Value>>,
    outcome: std::result::Result<Vec<Row>, String>,
    table: bool,
}

fn between<'a>(sql: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = sql.find(open)? + open.len();
    let len = sql[start..].find(close)?;
    Some(&sql[start..start + len])
}

fn key_of(row: &Row, key: &str) -> i64 {
    row.get_by_name(key).and_then(Value::as_i64).unwrap_or(i64::MIN)
}

/// Evaluate an integer `key >= ?` filter and `ORDER BY key ASC` over `rows`
fn scan_rows(sql: &str, params: &[Value], mut rows: Vec<Row>) -> Vec<Row> {
    if let (Some(key), Some(bound)) = (
        between(sql, " WHERE `", "` >= ?"),
        params.first().and_then(Value::as_i64),
    ) {
        rows.retain(|r| key_of(r, key) >= bound);
    }
    if let Some(key) = between(sql, " ORDER BY `", "` ASC") {
        rows.sort_by_key(|r| key_of(r, key));
    }
    rows
}

/// One statement seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Scripted connection
///
/// Clones share the script and the statement log.
#[derive(Clone, Default)]
pub struct MockConnection {
    script: Arc<Mutex<Vec<Scripted>>>,
    log: Arc<Mutex<Vec<Executed>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any statement containing `fragment` with `rows`
    pub fn on(self, fragment: &str, rows: Vec<Row>) -> Self {
        self.push(fragment, None, Ok(rows))
    }

    /// Serve `rows` as a table, applying the integer watermark filter and
    /// ordering found in the statement
    pub fn on_table(self, fragment: &str, rows: Vec<Row>) -> Self {
        self.script.lock().unwrap().push(Scripted {
            fragment: fragment.to_string(),
            params: None,
            outcome: Ok(rows),
            table: true,
        });
        self
    }

    /// Answer statements containing `fragment` and bound to exactly `params`
    pub fn on_params(self, fragment: &str, params: Vec<Value>, rows: Vec<Row>) -> Self {
        self.push(fragment, Some(params), Ok(rows))
    }

    /// Fail any statement containing `fragment`
    pub fn fail_on(self, fragment: &str, message: &str) -> Self {
        self.push(fragment, None, Err(message.to_string()))
    }

    fn push(
        self,
        fragment: &str,
        params: Option<Vec<Value>>,
        outcome: std::result::Result<Vec<Row>, String>,
    ) -> Self {
        self.script.lock().unwrap().push(Scripted {
            fragment: fragment.to_string(),
            params,
            outcome,
            table: false,
        });
        self
    }

    /// Every statement issued so far, in order
    pub fn executed(&self) -> Vec<Executed> {
        self.log.lock().unwrap().clone()
    }

    /// SQL of every statement issued so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.executed().into_iter().map(|e| e.sql).collect()
    }

    /// Number of statements containing `fragment`
    pub fn count(&self, fragment: &str) -> usize {
        self.statements()
            .iter()
            .filter(|sql| sql.contains(fragment))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn respond(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.log.lock().unwrap().push(Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        let script = self.script.lock().unwrap();
        let hit = script.iter().find(|s| {
            sql.contains(&s.fragment) && s.params.as_deref().map_or(true, |p| p == params)
        });
        match hit {
            Some(Scripted {
                outcome: Ok(rows),
                table: true,
                ..
            }) => Ok(scan_rows(sql, params, rows.clone())),
            Some(Scripted {
                outcome: Ok(rows), ..
            }) => Ok(rows.clone()),
            Some(Scripted {
                outcome: Err(message),
                ..
            }) => Err(Error::Query {
                message: message.clone(),
                sql: Some(sql.to_string()),
                source: None,
            }),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.respond(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.respond(sql, params).map(|rows| rows.len() as u64)
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        let rows = self.respond(sql, params)?;
        Ok(Box::new(VecRowStream::new(rows)))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out clones of one mock connection
#[derive(Clone, Default)]
pub struct MockFactory {
    pub conn: MockConnection,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockFactory {
    pub fn new(conn: MockConnection) -> Self {
        Self {
            conn,
            urls: Arc::default(),
        }
    }

    /// URLs passed to `connect`, in order
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.urls.lock().unwrap().push(config.url.clone());
        Ok(Box::new(self.conn.clone()))
    }
}

/// Tunnel opener that records requests and hands out a fixed local address
#[derive(Clone)]
pub struct MockTunnelOpener {
    pub local: SocketAddr,
    requests: Arc<Mutex<Vec<TunnelRequest>>>,
    closes: Arc<AtomicUsize>,
}

impl Default for MockTunnelOpener {
    fn default() -> Self {
        Self {
            local: SocketAddr::from(([127, 0, 0, 1], 40_000)),
            requests: Arc::default(),
            closes: Arc::default(),
        }
    }
}

impl MockTunnelOpener {
    pub fn requests(&self) -> Vec<TunnelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct MockTunnel {
    local: SocketAddr,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Tunnel for MockTunnel {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TunnelOpener for MockTunnelOpener {
    async fn open(&self, request: &TunnelRequest) -> Result<Box<dyn Tunnel>> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(Box::new(MockTunnel {
            local: self.local,
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// Config with discrete connection fields and a forced dialect
pub fn test_config(is_vitess: Option<bool>) -> TapConfig {
    TapConfig {
        host: Some("db.internal".into()),
        user: Some("tap".into()),
        password: Some("secret".into()),
        database: Some("shop".into()),
        is_vitess,
        ..Default::default()
    }
}

/// Open a session over `conn`
pub async fn open_session(conn: &MockConnection, is_vitess: Option<bool>) -> Session {
    Session::open_with(test_config(is_vitess), &MockFactory::new(conn.clone()), None)
        .await
        .expect("session opens")
}
