//! Schema reflection for rivven-tap-mysql
//!
//! Read-only introspection over a [`Connection`]:
//! - schema and relation enumeration
//! - generic column reflection through `information_schema`
//! - key properties from the primary key or a unique index
//! - raw `SHOW columns` listing

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::column_type::ColumnType;
use crate::connection::Connection;
use crate::dialect::MySqlDialect;
use crate::error::{Error, Result};
use crate::types::{Row, Value};

const LIST_SCHEMAS_SQL: &str = "SHOW DATABASES";

const LIST_RELATIONS_SQL: &str = r#"
    SELECT TABLE_NAME AS table_name, TABLE_TYPE AS table_type
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ? AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
    ORDER BY TABLE_NAME
"#;

const LIST_COLUMNS_SQL: &str = r#"
    SELECT COLUMN_NAME AS column_name, COLUMN_TYPE AS column_type, IS_NULLABLE AS is_nullable
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

const LIST_INDEXES_SQL: &str = r#"
    SELECT INDEX_NAME AS index_name, COLUMN_NAME AS column_name, NON_UNIQUE AS non_unique
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    ORDER BY INDEX_NAME, SEQ_IN_INDEX
"#;

/// A table or view inside a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Relation name
    pub name: String,
    /// Whether the relation is a view
    pub is_view: bool,
}

/// A column with its constructed native type
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    /// Column name
    pub name: String,
    /// Concrete native type
    pub column_type: ColumnType,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Native type text as reported by the server
    pub type_text: String,
}

/// One row of `SHOW columns` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowColumn {
    /// `Field`
    pub field: String,
    /// `Type`
    pub type_text: String,
    /// `Null == "YES"`
    pub nullable: bool,
}

fn required_string(row: &Row, column: &str) -> Result<String> {
    row.get_string(column)
        .ok_or_else(|| Error::schema(format!("metadata row is missing '{column}'")))
}

/// List every schema visible to the connected user
pub async fn list_schemas(conn: &dyn Connection) -> Result<Vec<String>> {
    let rows = conn.query(LIST_SCHEMAS_SQL, &[]).await?;
    Ok(rows
        .into_iter()
        .filter_map(|r| r.get(0).and_then(Value::as_string))
        .collect())
}

/// List base tables and views in a schema
pub async fn list_relations(conn: &dyn Connection, schema: &str) -> Result<Vec<Relation>> {
    let rows = conn
        .query(LIST_RELATIONS_SQL, &[Value::String(schema.to_string())])
        .await?;

    rows.iter()
        .map(|row| {
            Ok(Relation {
                name: required_string(row, "table_name")?,
                is_view: row
                    .get_string("table_type")
                    .is_some_and(|t| t.eq_ignore_ascii_case("VIEW")),
            })
        })
        .collect()
}

/// Reflect columns in ordinal order
///
/// Types that cannot be resolved degrade to the null type class with a
/// warning instead of failing.
pub async fn reflect_columns(
    conn: &dyn Connection,
    schema: &str,
    table: &str,
) -> Result<Vec<TableColumn>> {
    let rows = conn
        .query(
            LIST_COLUMNS_SQL,
            &[
                Value::String(schema.to_string()),
                Value::String(table.to_string()),
            ],
        )
        .await?;

    rows.iter()
        .map(|row| {
            let name = required_string(row, "column_name")?;
            let type_text = required_string(row, "column_type")?;
            let column_type = ColumnType::reflect(&type_text);
            if column_type.is_null_type() {
                warn!(
                    schema = %schema,
                    table = %table,
                    column = %name,
                    type_text = %type_text,
                    "Did not recognize type, column will be read as a string"
                );
            }
            Ok(TableColumn {
                name,
                column_type,
                nullable: row
                    .get_string("is_nullable")
                    .is_some_and(|n| n.eq_ignore_ascii_case("YES")),
                type_text,
            })
        })
        .collect()
}

/// Key properties: the primary key, else the first unique index
pub async fn key_properties(
    conn: &dyn Connection,
    schema: &str,
    table: &str,
) -> Result<Option<Vec<String>>> {
    let rows = conn
        .query(
            LIST_INDEXES_SQL,
            &[
                Value::String(schema.to_string()),
                Value::String(table.to_string()),
            ],
        )
        .await?;

    // Group by index name; BTreeMap keeps "first unique index" deterministic
    let mut unique: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in &rows {
        let non_unique = row
            .get_by_name("non_unique")
            .and_then(Value::as_i64)
            .map(|n| n != 0)
            .unwrap_or(true);
        if non_unique {
            continue;
        }
        let index = required_string(row, "index_name")?;
        let column = required_string(row, "column_name")?;
        unique.entry(index).or_default().push(column);
    }

    if let Some(pk) = unique.remove("PRIMARY") {
        return Ok(Some(pk));
    }
    let fallback = unique.into_values().next();
    if fallback.is_some() {
        debug!(schema = %schema, table = %table, "No primary key, using unique index");
    }
    Ok(fallback)
}

/// Raw `SHOW columns` listing, in server order
pub async fn show_columns(
    conn: &dyn Connection,
    schema: &str,
    table: &str,
) -> Result<Vec<ShowColumn>> {
    let sql = MySqlDialect.show_columns_sql(schema, table);
    let rows = conn.query(&sql, &[]).await?;

    rows.iter()
        .map(|row| {
            Ok(ShowColumn {
                field: required_string(row, "Field")?,
                type_text: required_string(row, "Type")?,
                nullable: row.get_string("Null").as_deref() == Some("YES"),
            })
        })
        .collect()
}
