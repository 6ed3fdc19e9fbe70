//! MySQL backend implementation for rivven-tap-mysql
//!
//! Provides the `mysql_async` driver behind the [`Connection`] seam:
//! - Connection with buffered and streaming queries
//! - Column-type aware value conversion for both text and binary protocol
//! - Connection factory

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, OptsBuilder, QueryResult};
use rust_decimal::Decimal;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, RowStream};
use crate::error::{Error, Result};
use crate::types::{widen_f32, Row, Value};

/// Collation id MySQL reports for binary strings
const BINARY_CHARSET: u16 = 63;

/// Convert a Value to a MySQL compatible parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int8(n) => mysql_async::Value::from(*n),
        Value::Int16(n) => mysql_async::Value::from(*n),
        Value::Int32(n) => mysql_async::Value::from(*n),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::Float32(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        // Sent as text so the server keeps full precision
        Value::Decimal(d) => mysql_async::Value::from(d.to_string()),
        Value::String(s) => mysql_async::Value::from(s.clone()),
        Value::Bytes(b) => mysql_async::Value::from(b.clone()),
        Value::Date(d) => {
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => {
            let date = dt.date();
            let time = dt.time();
            mysql_async::Value::Date(
                date.year() as u16,
                date.month() as u8,
                date.day() as u8,
                time.hour() as u8,
                time.minute() as u8,
                time.second() as u8,
                time.nanosecond() / 1000,
            )
        }
        Value::Json(j) => mysql_async::Value::from(j.to_string()),
        Value::Interval(micros) => interval_to_sql(*micros),
    }
}

fn interval_to_sql(micros: i64) -> mysql_async::Value {
    let negative = micros < 0;
    let total = micros.unsigned_abs();
    let micro = (total % 1_000_000) as u32;
    let secs = total / 1_000_000;
    let days = (secs / 86_400) as u32;
    let rem = secs % 86_400;
    mysql_async::Value::Time(
        negative,
        days,
        (rem / 3600) as u8,
        ((rem % 3600) / 60) as u8,
        (rem % 60) as u8,
        micro,
    )
}

fn is_date_column(column: &Column) -> bool {
    matches!(
        column.column_type(),
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE
    )
}

fn is_integer_column(column: &Column) -> bool {
    matches!(
        column.column_type(),
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR
    )
}

fn unsigned_to_value(n: u64) -> Value {
    match i64::try_from(n) {
        Ok(n) => Value::Int64(n),
        Err(_) => Value::Decimal(Decimal::from(n)),
    }
}

fn calendar_value(
    column: &Column,
    (year, month, day, hour, min, sec, micro): (u16, u8, u8, u8, u8, u8, u32),
) -> Value {
    // Zero dates ('0000-00-00') have no calendar representation
    let Some(date) = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
    else {
        return Value::Null;
    };
    if is_date_column(column) {
        return Value::Date(date);
    }
    match NaiveTime::from_hms_micro_opt(u32::from(hour), u32::from(min), u32::from(sec), micro) {
        Some(time) => Value::DateTime(NaiveDateTime::new(date, time)),
        None => Value::Null,
    }
}

fn time_value(negative: bool, days: u32, hour: u8, min: u8, sec: u8, micro: u32) -> Value {
    if !negative && days == 0 {
        if let Some(time) =
            NaiveTime::from_hms_micro_opt(u32::from(hour), u32::from(min), u32::from(sec), micro)
        {
            return Value::Time(time);
        }
    }
    let total_secs = i64::from(days) * 86_400
        + i64::from(hour) * 3600
        + i64::from(min) * 60
        + i64::from(sec);
    let micros = total_secs * 1_000_000 + i64::from(micro);
    Value::Interval(if negative { -micros } else { micros })
}

/// Parse a text-protocol TIME such as `-01:30:00` or `838:59:59.5`
fn parse_text_time(text: &str) -> Option<Value> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut parts = body.splitn(3, ':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let min: u8 = parts.next()?.parse().ok()?;
    let sec_part = parts.next()?;
    let (sec, micro) = match sec_part.split_once('.') {
        Some((s, frac)) => {
            let digits = format!("{:0<6}", frac);
            (s.parse().ok()?, digits.get(..6)?.parse().ok()?)
        }
        None => (sec_part.parse().ok()?, 0),
    };
    Some(time_value(
        negative,
        hours / 24,
        (hours % 24) as u8,
        min,
        sec,
        micro,
    ))
}

fn conversion_error(column: &Column, text: &str, what: &str) -> Error {
    Error::type_conversion(format!(
        "column '{}': cannot parse '{}' as {}",
        column.name_str(),
        text,
        what
    ))
}

/// Convert a text-encoded value using the column's wire type
fn text_to_value(bytes: Vec<u8>, column: &Column) -> Result<Value> {
    let column_type = column.column_type();
    if column_type == ColumnType::MYSQL_TYPE_BIT
        || (column.character_set() == BINARY_CHARSET
            && matches!(
                column_type,
                ColumnType::MYSQL_TYPE_BLOB
                    | ColumnType::MYSQL_TYPE_TINY_BLOB
                    | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
                    | ColumnType::MYSQL_TYPE_LONG_BLOB
                    | ColumnType::MYSQL_TYPE_VAR_STRING
                    | ColumnType::MYSQL_TYPE_STRING
                    | ColumnType::MYSQL_TYPE_VARCHAR
            ))
    {
        return Ok(Value::Bytes(bytes));
    }

    if column_type == ColumnType::MYSQL_TYPE_JSON {
        return serde_json::from_slice(&bytes)
            .map(Value::Json)
            .map_err(|e| Error::type_conversion(format!("invalid JSON document: {e}")));
    }

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return Ok(Value::Bytes(e.into_bytes())),
    };

    let value = match column_type {
        _ if is_integer_column(column) => {
            if column.flags().contains(ColumnFlags::UNSIGNED_FLAG) {
                text.parse::<u64>()
                    .map(unsigned_to_value)
                    .map_err(|_| conversion_error(column, &text, "integer"))?
            } else {
                text.parse::<i64>()
                    .map(Value::Int64)
                    .map_err(|_| conversion_error(column, &text, "integer"))?
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT => text
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| conversion_error(column, &text, "float"))?,
        ColumnType::MYSQL_TYPE_DOUBLE => text
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| conversion_error(column, &text, "double"))?,
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map(Value::Decimal)
                .map_err(|_| conversion_error(column, &text, "decimal"))?
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            match NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
                Ok(date) => Value::Date(date),
                Err(_) if text.starts_with("0000-00-00") => Value::Null,
                Err(_) => return Err(conversion_error(column, &text, "date")),
            }
        }
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            match NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f") {
                Ok(dt) => Value::DateTime(dt),
                Err(_) if text.starts_with("0000-00-00") => Value::Null,
                Err(_) => return Err(conversion_error(column, &text, "datetime")),
            }
        }
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            parse_text_time(&text).ok_or_else(|| conversion_error(column, &text, "time"))?
        }
        _ => Value::String(text),
    };
    Ok(value)
}

/// Convert a MySQL value to a Value, using column metadata to keep
/// calendar dates distinct from midnight date-times
fn mysql_value_to_value(val: mysql_async::Value, column: &Column) -> Result<Value> {
    Ok(match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => return text_to_value(b, column),
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => unsigned_to_value(n),
        mysql_async::Value::Float(f) => Value::Float64(widen_f32(f)),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            calendar_value(column, (year, month, day, hour, min, sec, micro))
        }
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => {
            time_value(neg, days, hour, min, sec, micro)
        }
    })
}

fn convert_row(mut row: mysql_async::Row) -> Result<Row> {
    let columns = row.columns();
    let mut names = Vec::with_capacity(columns.len());
    let mut values = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        names.push(column.name_str().into_owned());
        let raw: mysql_async::Value = row.take(idx).unwrap_or(mysql_async::Value::NULL);
        values.push(mysql_value_to_value(raw, column)?);
    }
    Ok(Row::new(names, values))
}

/// Forward every row of an open result set into `tx`
///
/// Stops early, draining the cursor, once the receiver is gone or a row
/// fails to convert.
async fn pump_rows<P: Protocol>(
    mut result: QueryResult<'_, '_, P>,
    tx: &mpsc::Sender<Result<Row>>,
) -> std::result::Result<(), mysql_async::Error> {
    while let Some(row) = result.next().await? {
        let converted = convert_row(row);
        let failed = converted.is_err();
        if tx.send(converted).await.is_err() || failed {
            debug!("Row stream closed early, draining result set");
            break;
        }
    }
    result.drop_result().await
}

/// Row stream fed by the task that owns the result cursor
struct ChannelRowStream {
    rx: mpsc::Receiver<Result<Row>>,
}

impl RowStream for ChannelRowStream {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move { self.rx.recv().await.transpose() })
    }
}

/// MySQL connection implementation
///
/// The underlying [`Conn`] sits behind a mutex. A streaming query holds the
/// lock until its cursor is exhausted or dropped, so later statements wait
/// for the scan to finish instead of interleaving with it.
pub struct MySqlConnection {
    conn: Arc<Mutex<Option<Conn>>>,
}

impl MySqlConnection {
    /// Create a new MySQL connection from an existing connection
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Create a new connection from configuration
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let opts = mysql_async::Opts::from_url(&config.url)
            .map_err(|e| Error::config(format!("Invalid MySQL connection string: {}", e)))?;
        let opts = OptsBuilder::from_opts(opts);

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let conn = tokio::time::timeout(timeout, Conn::new(opts))
            .await
            .map_err(|_| {
                Error::connection(format!(
                    "Timed out connecting to MySQL after {}ms",
                    config.connect_timeout_ms
                ))
            })?
            .map_err(|e| Error::connection_with_source("Failed to connect to MySQL", e))?;

        Ok(Self::new(conn))
    }
}

fn unavailable() -> Error {
    Error::connection("Connection not available")
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(unavailable)?;

        debug!(sql = %sql, "Executing statement");
        if params.is_empty() {
            conn.query_drop(sql).await
        } else {
            let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
            conn.exec_drop(sql, mysql_params).await
        }
        .map_err(|e| Error::query_with_source("Failed to execute statement", sql, e))?;

        Ok(conn.affected_rows())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(unavailable)?;

        debug!(sql = %sql, params = params.len(), "Executing query");
        let result: Vec<mysql_async::Row> = if params.is_empty() {
            conn.query::<mysql_async::Row, _>(sql).await
        } else {
            let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
            conn.exec::<mysql_async::Row, _, _>(sql, mysql_params).await
        }
        .map_err(|e| Error::query_with_source("Failed to execute query", sql, e))?;

        result.into_iter().map(convert_row).collect()
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        let mut guard = Arc::clone(&self.conn).lock_owned().await;
        if guard.is_none() {
            return Err(unavailable());
        }

        let (tx, rx) = mpsc::channel(1);
        let sql = sql.to_string();
        let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();

        debug!(sql = %sql, params = mysql_params.len(), "Opening row stream");
        tokio::spawn(async move {
            let Some(conn) = guard.as_mut() else {
                return;
            };
            let outcome = if mysql_params.is_empty() {
                match conn.query_iter(sql.as_str()).await {
                    Ok(result) => pump_rows(result, &tx).await,
                    Err(e) => Err(e),
                }
            } else {
                match conn.exec_iter(sql.as_str(), mysql_params).await {
                    Ok(result) => pump_rows(result, &tx).await,
                    Err(e) => Err(e),
                }
            };
            if let Err(e) = outcome {
                warn!(error = %e, "Streaming query failed");
                let _ = tx
                    .send(Err(Error::query_with_source(
                        "Failed to execute streaming query",
                        sql,
                        e,
                    )))
                    .await;
            }
        });

        Ok(Box::new(ChannelRowStream { rx }))
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("Failed to close connection", e))?;
        }
        Ok(())
    }
}

/// MySQL connection factory
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnectionFactory;

impl MySqlConnectionFactory {
    /// Create a new MySQL connection factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let conn = MySqlConnection::connect(config).await?;
        Ok(Box::new(conn))
    }
}
