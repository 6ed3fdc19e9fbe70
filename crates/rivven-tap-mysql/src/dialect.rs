//! SQL generation for MySQL-compatible servers
//!
//! Scan queries are built with sea-query's `MysqlQueryBuilder`; the few
//! statements with no sea-query counterpart (`SHOW columns`) are formatted
//! here with the same identifier quoting.

use sea_query::{Alias, Asterisk, Expr, IntoIden, MysqlQueryBuilder, Order, Query, TableRef};

/// Placeholder for a bound parameter
pub const PLACEHOLDER: &str = "?";

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

/// A bounded or watermark-filtered table scan
#[derive(Debug, Clone, Default)]
pub struct ScanQuery<'a> {
    /// Schema (database) holding the table
    pub schema: Option<&'a str>,
    /// Table or view name
    pub table: &'a str,
    /// Projected columns, all columns when empty
    pub columns: &'a [&'a str],
    /// Column used for ordering and the watermark filter
    pub replication_key: Option<&'a str>,
    /// Whether a `replication_key >= ?` filter is bound
    pub filter_from_start: bool,
}

/// MySQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Quote an identifier (schema, table, column name)
    pub fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    /// Quote a `schema.table` pair
    pub fn qualified_table(&self, schema: &str, table: &str) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(schema),
            self.quote_identifier(table)
        )
    }

    /// `SHOW columns` for a table or view
    pub fn show_columns_sql(&self, schema: &str, table: &str) -> String {
        format!("SHOW columns from {}", self.qualified_table(schema, table))
    }

    /// Build the SELECT for a scan
    ///
    /// With a replication key the rows come back in ascending key order, and
    /// when `filter_from_start` is set only rows with a key greater than or
    /// equal to the bound value are returned. Equality is included so a row
    /// sharing the last watermark is read again.
    pub fn build_scan(&self, scan: &ScanQuery<'_>) -> String {
        let mut stmt = Query::select();
        stmt.from(sea_table_ref(scan.schema, scan.table));

        if scan.columns.is_empty() {
            stmt.column(Asterisk);
        } else {
            for col in scan.columns {
                stmt.column(Alias::new(*col));
            }
        }

        if let Some(key) = scan.replication_key {
            if scan.filter_from_start {
                // A bare custom operand renders as `(?)`, so the whole predicate is custom
                stmt.and_where(Expr::cust(format!(
                    "{} >= {}",
                    self.quote_identifier(key),
                    PLACEHOLDER
                )));
            }
            stmt.order_by(Alias::new(key), Order::Asc);
        }

        stmt.to_string(MysqlQueryBuilder)
    }
}
