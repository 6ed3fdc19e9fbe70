//! Schema discovery
//!
//! Walks schemas and their relations, producing one [`CatalogEntry`] per
//! relation. Per-relation introspection is delegated to the session's
//! [`BackendStrategy`].

use tracing::{debug, info};

use crate::backend::BackendStrategy;
use crate::catalog::{CatalogColumn, CatalogEntry};
use crate::connection::Connection;
use crate::error::Result;
use crate::schema::{self, Relation};
use crate::typemap::map_type;

/// Discover catalog entries
///
/// A non-empty `schema_filter` is used verbatim, so unknown names simply
/// produce no entries. Otherwise every visible schema is walked, system
/// schemas included.
pub async fn discover(
    conn: &dyn Connection,
    strategy: &dyn BackendStrategy,
    schema_filter: &[String],
) -> Result<Vec<CatalogEntry>> {
    let schemas = if schema_filter.is_empty() {
        schema::list_schemas(conn).await?
    } else {
        schema_filter.to_vec()
    };

    let mut entries = Vec::new();
    for schema_name in &schemas {
        let relations = schema::list_relations(conn, schema_name).await?;
        info!(
            schema = %schema_name,
            relations = relations.len(),
            dialect = %strategy.kind(),
            "Discovering schema"
        );
        for relation in &relations {
            debug!(schema = %schema_name, relation = %relation.name, is_view = relation.is_view, "Describing relation");
            entries.push(strategy.describe_relation(conn, schema_name, relation).await?);
        }
    }
    Ok(entries)
}

/// Catalog entry built from generic reflection
pub async fn reflect_entry(
    conn: &dyn Connection,
    schema_name: &str,
    relation: &Relation,
) -> Result<CatalogEntry> {
    let columns = schema::reflect_columns(conn, schema_name, &relation.name)
        .await?
        .into_iter()
        .map(|col| {
            let portable = col.column_type.portable_type();
            CatalogColumn::new(col.name, col.type_text, col.nullable, portable)
        })
        .collect();

    let mut entry = CatalogEntry::new(schema_name, &relation.name, relation.is_view, columns);
    entry.key_properties = schema::key_properties(conn, schema_name, &relation.name).await?;
    Ok(entry)
}

/// Catalog entry for a view on Vitess, from raw `SHOW columns` output
///
/// Types are mapped from the raw text, so no key properties, replication
/// key, row count or database are known.
pub async fn raw_view_entry(
    conn: &dyn Connection,
    schema_name: &str,
    view_name: &str,
) -> Result<CatalogEntry> {
    let columns = schema::show_columns(conn, schema_name, view_name)
        .await?
        .into_iter()
        .map(|col| {
            let portable = map_type(&col.type_text);
            CatalogColumn::new(col.field, col.type_text, col.nullable, portable)
        })
        .collect();

    Ok(CatalogEntry::new(schema_name, view_name, true, columns))
}
