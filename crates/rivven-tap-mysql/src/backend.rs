//! Backend capability detection
//!
//! Stock MySQL and the Vitess-based PlanetScale engine differ in two places:
//! views cannot be reflected through the usual metadata path on Vitess, and
//! bulk scans there need the OLAP workload. Both differences live behind
//! [`BackendStrategy`], chosen once per session from the detected
//! [`DialectKind`].

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::catalog::CatalogEntry;
use crate::column_type::ColumnType;
use crate::connection::Connection;
use crate::discovery;
use crate::error::Result;
use crate::schema::{self, Relation, TableColumn};

/// Probe matching PlanetScale's `version_comment`
pub const VITESS_PROBE_SQL: &str = "select variable_value from performance_schema.global_variables where variable_name='version_comment' and variable_value like 'PlanetScale%'";

/// Workload directive issued before a bulk scan on Vitess
pub const OLAP_WORKLOAD_SQL: &str = "set workload=olap";

/// Server dialect family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    /// Stock MySQL (or MariaDB)
    Standard,
    /// Vitess / PlanetScale
    DistributedVariant,
}

impl DialectKind {
    /// The strategy implementing this dialect's code paths
    pub fn strategy(self) -> Arc<dyn BackendStrategy> {
        match self {
            Self::Standard => Arc::new(StandardBackend),
            Self::DistributedVariant => Arc::new(VitessBackend),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::DistributedVariant => write!(f, "vitess"),
        }
    }
}

/// Classify the server, honoring an explicit override
///
/// With an override no query is issued. Otherwise the PlanetScale probe
/// runs and any returned row means Vitess. Probe failures propagate.
pub async fn detect_dialect(
    conn: &dyn Connection,
    is_vitess_override: Option<bool>,
) -> Result<DialectKind> {
    if let Some(is_vitess) = is_vitess_override {
        let kind = if is_vitess {
            DialectKind::DistributedVariant
        } else {
            DialectKind::Standard
        };
        info!(dialect = %kind, "Using configured dialect");
        return Ok(kind);
    }

    info!("No is_vitess configuration provided, dynamically checking if we are using a Vitess instance");
    let rows = conn.query(VITESS_PROBE_SQL, &[]).await?;
    if rows.is_empty() {
        info!("Instance is not a Vitess instance, using standard configuration");
        Ok(DialectKind::Standard)
    } else {
        info!("Instance has been detected to be a Vitess (PlanetScale) instance, using Vitess configuration");
        Ok(DialectKind::DistributedVariant)
    }
}

/// Dialect-specific introspection and scan preparation
#[async_trait]
pub trait BackendStrategy: Send + Sync {
    /// Dialect this strategy implements
    fn kind(&self) -> DialectKind;

    /// Build the catalog entry for one relation
    async fn describe_relation(
        &self,
        conn: &dyn Connection,
        schema: &str,
        relation: &Relation,
    ) -> Result<CatalogEntry> {
        discovery::reflect_entry(conn, schema, relation).await
    }

    /// Resolve column metadata used for extraction
    async fn table_columns(
        &self,
        conn: &dyn Connection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<TableColumn>> {
        schema::reflect_columns(conn, schema, table).await
    }

    /// Prepare the connection for a bulk scan
    async fn prepare_scan(&self, _conn: &dyn Connection) -> Result<()> {
        Ok(())
    }
}

/// Stock MySQL: generic reflection everywhere, no scan directive
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardBackend;

#[async_trait]
impl BackendStrategy for StandardBackend {
    fn kind(&self) -> DialectKind {
        DialectKind::Standard
    }
}

/// Vitess / PlanetScale
#[derive(Debug, Clone, Copy, Default)]
pub struct VitessBackend;

#[async_trait]
impl BackendStrategy for VitessBackend {
    fn kind(&self) -> DialectKind {
        DialectKind::DistributedVariant
    }

    async fn describe_relation(
        &self,
        conn: &dyn Connection,
        schema: &str,
        relation: &Relation,
    ) -> Result<CatalogEntry> {
        if relation.is_view {
            discovery::raw_view_entry(conn, schema, &relation.name).await
        } else {
            discovery::reflect_entry(conn, schema, relation).await
        }
    }

    async fn table_columns(
        &self,
        conn: &dyn Connection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<TableColumn>> {
        schema::show_columns(conn, schema, table)
            .await?
            .into_iter()
            .map(|col| {
                Ok(TableColumn {
                    column_type: ColumnType::parse(&col.type_text)?,
                    name: col.field,
                    nullable: col.nullable,
                    type_text: col.type_text,
                })
            })
            .collect()
    }

    async fn prepare_scan(&self, conn: &dyn Connection) -> Result<()> {
        conn.execute(OLAP_WORKLOAD_SQL, &[]).await?;
        Ok(())
    }
}
