//! Catalog value objects
//!
//! A [`CatalogEntry`] describes one relation in one schema. Entries carry no
//! reference back to the session; the orchestrator edits selection and the
//! replication key between discovery and extraction and hands the entry back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::{Error, Result};
use crate::typemap::PortableType;

/// Delimiter between schema and table in stream ids
pub const STREAM_ID_DELIMITER: &str = "-";

/// Stream id for a relation: `<schema>-<table>`
pub fn stream_id(schema: &str, table: &str) -> String {
    format!("{schema}{STREAM_ID_DELIMITER}{table}")
}

/// Fully qualified table name used as the column cache key
pub fn full_table_name(schema: &str, table: &str) -> String {
    format!("{schema}.{table}")
}

/// Split a fully qualified name back into `(schema, table)`
pub fn parse_full_table_name(full_table_name: &str) -> Result<(&str, &str)> {
    full_table_name
        .split_once('.')
        .filter(|(schema, table)| !schema.is_empty() && !table.is_empty())
        .ok_or_else(|| {
            Error::schema(format!(
                "expected '<schema>.<table>', got '{full_table_name}'"
            ))
        })
}

/// How a stream is replicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    /// Every run reads the whole relation
    #[default]
    FullTable,
    /// Runs resume from a replication key watermark
    Incremental,
    /// Change log based (never offered by this connector)
    LogBased,
}

/// Replication modes a stream supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationCapabilities {
    /// Full-table reads are always possible
    pub supports_full_table: bool,
    /// Incremental reads need a replication key
    pub supports_incremental: bool,
    /// Log-based replication is out of scope
    pub supports_log_based: bool,
}

/// Immutable description of a column as the server reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Native type text (e.g. `varchar(255)`) or type class name
    pub native_type: String,
    /// Whether NULL is allowed
    pub nullable: bool,
}

/// A column in a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogColumn {
    /// Column as reported by the server
    #[serde(flatten)]
    pub descriptor: ColumnDescriptor,
    /// Portable type of the column
    pub portable_type: PortableType,
}

impl CatalogColumn {
    /// Create a column
    pub fn new(
        name: impl Into<String>,
        native_type: impl Into<String>,
        nullable: bool,
        portable_type: PortableType,
    ) -> Self {
        Self {
            descriptor: ColumnDescriptor {
                name: name.into(),
                native_type: native_type.into(),
                nullable,
            },
            portable_type,
        }
    }

    /// Column name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

fn default_selected() -> bool {
    true
}

/// One relation in one schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stream id, `<schema>-<table>`
    pub tap_stream_id: String,
    /// Stream name, same as the id
    pub stream: String,
    /// Table or view name
    pub table_name: String,
    /// Schema (database) name
    pub schema_name: String,
    /// Whether the relation is a view
    pub is_view: bool,
    /// Columns in native order
    pub columns: Vec<CatalogColumn>,
    /// Primary key, else first unique index
    #[serde(default)]
    pub key_properties: Option<Vec<String>>,
    /// Replication method
    #[serde(default)]
    pub replication_method: ReplicationMethod,
    /// Column used as the incremental watermark
    #[serde(default)]
    pub replication_key: Option<String>,
    /// Database name, when not implied by the connection
    #[serde(default)]
    pub database: Option<String>,
    /// Estimated row count
    #[serde(default)]
    pub row_count: Option<u64>,
    /// Whether the stream is selected for extraction
    #[serde(default = "default_selected")]
    pub selected: bool,
    /// Columns excluded from extraction
    #[serde(default)]
    pub deselected_columns: Vec<String>,
}

impl CatalogEntry {
    /// Create an entry with full-table replication and every column selected
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        is_view: bool,
        columns: Vec<CatalogColumn>,
    ) -> Self {
        let schema_name = schema_name.into();
        let table_name = table_name.into();
        let id = stream_id(&schema_name, &table_name);
        Self {
            tap_stream_id: id.clone(),
            stream: id,
            table_name,
            schema_name,
            is_view,
            columns,
            key_properties: None,
            replication_method: ReplicationMethod::FullTable,
            replication_key: None,
            database: None,
            row_count: None,
            selected: true,
            deselected_columns: Vec::new(),
        }
    }

    /// Fully qualified `schema.table`
    pub fn full_table_name(&self) -> String {
        full_table_name(&self.schema_name, &self.table_name)
    }

    /// Replication modes available for this entry
    pub fn capabilities(&self) -> ReplicationCapabilities {
        ReplicationCapabilities {
            supports_full_table: true,
            supports_incremental: self.replication_key.is_some(),
            supports_log_based: false,
        }
    }

    /// Find a column by name (case-insensitive)
    pub fn column(&self, name: &str) -> Option<&CatalogColumn> {
        self.columns
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Set the replication key, switching to incremental replication
    ///
    /// Fails when the column does not exist on the entry.
    pub fn set_replication_key(&mut self, key: Option<&str>) -> Result<()> {
        match key {
            Some(key) => {
                let column = self.column(key).ok_or_else(|| Error::ColumnNotFound {
                    table: self.tap_stream_id.clone(),
                    column: key.to_string(),
                })?;
                self.replication_key = Some(column.name().to_string());
                self.replication_method = ReplicationMethod::Incremental;
            }
            None => {
                self.replication_key = None;
                self.replication_method = ReplicationMethod::FullTable;
            }
        }
        Ok(())
    }

    /// Exclude a column from extraction
    pub fn deselect_column(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self
            .deselected_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&name))
        {
            self.deselected_columns.push(name);
        }
    }

    fn is_column_selected(&self, name: &str) -> bool {
        let is_key = self
            .replication_key
            .as_deref()
            .is_some_and(|k| k.eq_ignore_ascii_case(name));
        is_key
            || !self
                .deselected_columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Selected column names in native order
    ///
    /// The replication key stays selected even when deselected.
    pub fn selected_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(CatalogColumn::name)
            .filter(|name| self.is_column_selected(name))
            .map(str::to_string)
            .collect()
    }

    /// JSON-Schema for the selected columns
    pub fn json_schema(&self) -> JsonValue {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for column in &self.columns {
            if !self.is_column_selected(column.name()) {
                continue;
            }
            let nullable = column.descriptor.nullable;
            properties.insert(
                column.name().to_string(),
                column.portable_type.json_schema(nullable),
            );
            if !nullable {
                required.push(JsonValue::String(column.name().to_string()));
            }
        }
        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = JsonValue::Array(required);
        }
        schema
    }
}

/// Discovered catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// One entry per relation per schema
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    /// Wrap discovered entries
    pub fn new(streams: Vec<CatalogEntry>) -> Self {
        Self { streams }
    }

    /// Parse a catalog document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("Invalid catalog document: {e}")))
    }

    /// Render the catalog document
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Failed to serialize catalog: {e}")))
    }

    /// Look up an entry by stream id
    pub fn get(&self, tap_stream_id: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|s| s.tap_stream_id == tap_stream_id)
    }

    /// Mutable lookup by stream id
    pub fn get_mut(&mut self, tap_stream_id: &str) -> Option<&mut CatalogEntry> {
        self.streams
            .iter_mut()
            .find(|s| s.tap_stream_id == tap_stream_id)
    }

    /// Entries selected for extraction
    pub fn selected(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.streams.iter().filter(|s| s.selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> CatalogEntry {
        CatalogEntry::new(
            "shop",
            "orders",
            false,
            vec![
                CatalogColumn::new("id", "INTEGER", false, PortableType::Integer),
                CatalogColumn::new("note", "TEXT", true, PortableType::String),
                CatalogColumn::new("updated_at", "DATETIME", true, PortableType::DateTime),
            ],
        )
    }

    #[test]
    fn test_stream_id() {
        assert_eq!(stream_id("shop", "orders"), "shop-orders");
        assert_eq!(orders().tap_stream_id, "shop-orders");
        assert_eq!(orders().stream, "shop-orders");
    }

    #[test]
    fn test_parse_full_table_name() {
        assert_eq!(
            parse_full_table_name("shop.orders").unwrap(),
            ("shop", "orders")
        );
        assert!(parse_full_table_name("orders").is_err());
        assert!(parse_full_table_name(".orders").is_err());
    }

    #[test]
    fn test_capabilities_follow_replication_key() {
        let mut entry = orders();
        assert!(!entry.capabilities().supports_incremental);
        assert!(entry.capabilities().supports_full_table);

        entry.set_replication_key(Some("UPDATED_AT")).unwrap();
        assert_eq!(entry.replication_key.as_deref(), Some("updated_at"));
        assert_eq!(entry.replication_method, ReplicationMethod::Incremental);
        assert!(entry.capabilities().supports_incremental);
        assert!(!entry.capabilities().supports_log_based);
    }

    #[test]
    fn test_unknown_replication_key_rejected() {
        let mut entry = orders();
        let err = entry.set_replication_key(Some("missing")).unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { .. }));
    }

    #[test]
    fn test_selection_keeps_replication_key() {
        let mut entry = orders();
        entry.set_replication_key(Some("updated_at")).unwrap();
        entry.deselect_column("note");
        entry.deselect_column("updated_at");
        assert_eq!(entry.selected_column_names(), vec!["id", "updated_at"]);
    }

    #[test]
    fn test_json_schema_required() {
        let schema = orders().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["id"]["type"], "integer");
        assert_eq!(schema["properties"]["updated_at"]["format"], "date-time");
        assert_eq!(schema["required"], json!(["id"]));
    }

    #[test]
    fn test_catalog_roundtrip_defaults() {
        let json = r#"{"streams":[{
            "tap_stream_id":"shop-orders","stream":"shop-orders",
            "table_name":"orders","schema_name":"shop","is_view":false,
            "columns":[{"name":"id","native_type":"INTEGER","nullable":false,"portable_type":"integer"}]
        }]}"#;
        let catalog = Catalog::from_json(json).unwrap();
        let entry = catalog.get("shop-orders").unwrap();
        assert!(entry.selected);
        assert_eq!(entry.replication_method, ReplicationMethod::FullTable);
        assert_eq!(entry.columns[0].name(), "id");

        let rendered = catalog.to_json().unwrap();
        assert_eq!(Catalog::from_json(&rendered).unwrap(), catalog);
    }
}
