//! Extraction engine
//!
//! Runs one scan per request and yields conformed records lazily. With a
//! replication key, rows arrive in ascending key order, and with a starting
//! value only rows whose key is `>=` that value are read. The bound is
//! inclusive, so the row holding the previous watermark is emitted again and
//! downstream consumers must tolerate that duplicate.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::BackendStrategy;
use crate::catalog::CatalogEntry;
use crate::connection::Connection;
use crate::dialect::{MySqlDialect, ScanQuery};
use crate::error::{Error, Result};
use crate::record::{conform_row, Record};
use crate::schema::TableColumn;
use crate::types::Value;

/// Lazily produced records of one scan
pub type RecordStream<'a> = BoxStream<'a, Result<Record>>;

/// Partition context supplied by the orchestrator
pub type PartitionContext = serde_json::Map<String, serde_json::Value>;

/// What to read from one catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Entry being read
    pub catalog_entry: CatalogEntry,
    /// Columns to project, all columns when empty
    #[serde(default)]
    pub selected_columns: Vec<String>,
    /// Watermark column
    #[serde(default)]
    pub replication_key: Option<String>,
    /// Inclusive lower bound for the watermark column
    #[serde(default)]
    pub starting_value: Option<Value>,
    /// Partition context, rejected when non-empty
    #[serde(default)]
    pub partition: Option<PartitionContext>,
}

impl ExtractionRequest {
    /// Request derived from the entry's selection and replication key
    pub fn new(catalog_entry: CatalogEntry) -> Self {
        Self {
            selected_columns: catalog_entry.selected_column_names(),
            replication_key: catalog_entry.replication_key.clone(),
            catalog_entry,
            starting_value: None,
            partition: None,
        }
    }

    /// Set the inclusive starting watermark
    pub fn with_starting_value(mut self, value: impl Into<Value>) -> Self {
        self.starting_value = Some(value.into());
        self
    }

    /// Override the projected columns
    pub fn with_selected_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a partition context
    pub fn with_partition(mut self, partition: PartitionContext) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Stream id of the target entry
    pub fn stream_id(&self) -> &str {
        &self.catalog_entry.tap_stream_id
    }
}

/// Reject partitioned requests before any query is issued
pub fn check_partition(request: &ExtractionRequest) -> Result<()> {
    match &request.partition {
        Some(partition) if !partition.is_empty() => Err(Error::unsupported(format!(
            "Stream '{}' does not support partitioning.",
            request.stream_id()
        ))),
        _ => Ok(()),
    }
}

fn find_column<'c>(columns: &'c [TableColumn], name: &str) -> Option<&'c TableColumn> {
    columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Build the scan SQL and its bound parameters
pub fn build_scan_sql(
    columns: &[TableColumn],
    request: &ExtractionRequest,
) -> Result<(String, Vec<Value>)> {
    let entry = &request.catalog_entry;

    let projection: Vec<&str> = if request.selected_columns.is_empty() {
        columns.iter().map(|c| c.name.as_str()).collect()
    } else {
        columns
            .iter()
            .filter(|c| {
                request
                    .selected_columns
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(&c.name))
            })
            .map(|c| c.name.as_str())
            .collect()
    };
    if projection.is_empty() {
        return Err(Error::schema(format!(
            "no selected columns exist on stream '{}'",
            entry.tap_stream_id
        )));
    }

    let key = match request.replication_key.as_deref() {
        Some(key) => Some(
            find_column(columns, key)
                .ok_or_else(|| Error::ColumnNotFound {
                    table: entry.full_table_name(),
                    column: key.to_string(),
                })?
                .name
                .as_str(),
        ),
        None => None,
    };

    let params: Vec<Value> = match (key, &request.starting_value) {
        (Some(_), Some(start)) if !start.is_null() => vec![start.clone()],
        _ => Vec::new(),
    };

    let sql = MySqlDialect.build_scan(&ScanQuery {
        schema: Some(&entry.schema_name),
        table: &entry.table_name,
        columns: &projection,
        replication_key: key,
        filter_from_start: !params.is_empty(),
    });
    Ok((sql, params))
}

/// Run one scan and stream its records
///
/// `columns` is the resolved column metadata of the target table. The
/// returned stream holds the connection's only open cursor until it is
/// exhausted or dropped.
pub async fn extract<'a>(
    conn: &'a dyn Connection,
    strategy: &'a dyn BackendStrategy,
    columns: &[TableColumn],
    request: &ExtractionRequest,
) -> Result<RecordStream<'a>> {
    check_partition(request)?;
    let (sql, params) = build_scan_sql(columns, request)?;

    strategy.prepare_scan(conn).await?;

    let stream_id = request.stream_id().to_string();
    info!(
        stream = %stream_id,
        replication_key = ?request.replication_key,
        incremental = !params.is_empty(),
        "Starting stream"
    );
    debug!(stream = %stream_id, sql = %sql, "Scan query");

    let mut rows = conn.query_stream(&sql, &params).await?;
    Ok(Box::pin(async_stream::try_stream! {
        let mut records = 0u64;
        while let Some(row) = rows.next().await? {
            records += 1;
            yield conform_row(&row);
        }
        info!(stream = %stream_id, records, "Finished stream");
    }))
}
