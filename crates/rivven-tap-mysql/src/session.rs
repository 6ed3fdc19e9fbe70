//! Connector session
//!
//! A [`Session`] owns one connection (optionally routed through an SSH
//! tunnel), the dialect detected for it and a per-table column cache.
//! Discovery and extraction run through the session one at a time.
//!
//! ```rust,ignore
//! use futures::{FutureExt, TryStreamExt};
//! use rivven_tap_mysql::prelude::*;
//!
//! let config = TapConfig::from_json(r#"{"connection_url": "mysql://tap:secret@db/shop"}"#)?;
//! let count = run_scoped(config, None, |session| {
//!     async move {
//!         let entries = session.discover_catalog_entries().await?;
//!         let mut total = 0;
//!         for entry in entries {
//!             let records: Vec<Record> = session
//!                 .extract(ExtractionRequest::new(entry))
//!                 .await?
//!                 .try_collect()
//!                 .await?;
//!             total += records.len();
//!         }
//!         Ok(total)
//!     }
//!     .boxed()
//! })
//! .await?;
//! ```

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{detect_dialect, BackendStrategy, DialectKind};
use crate::catalog::{parse_full_table_name, CatalogEntry};
use crate::config::TapConfig;
use crate::connection::{Connection, ConnectionFactory};
use crate::discovery;
use crate::error::{Error, Result};
use crate::extract::{self, check_partition, ExtractionRequest, RecordStream};
use crate::mysql::MySqlConnectionFactory;
use crate::schema::TableColumn;
use crate::tunnel::{NoTunnel, Tunnel, TunnelOpener, TunnelRequest};

/// An open connector session
pub struct Session {
    config: TapConfig,
    conn: Box<dyn Connection>,
    tunnel: Option<Box<dyn Tunnel>>,
    strategy: Option<Arc<dyn BackendStrategy>>,
    columns: HashMap<String, Vec<TableColumn>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("tunnel", &self.tunnel.as_ref().map(|t| t.local_addr()))
            .field("dialect", &self.strategy.as_ref().map(|s| s.kind()))
            .field("cached_tables", &self.columns.len())
            .finish()
    }
}

async fn close_tunnel(tunnel: Option<Box<dyn Tunnel>>) -> Result<()> {
    match tunnel {
        Some(mut tunnel) => {
            let result = tunnel.close().await;
            debug!("SSH tunnel closed");
            result
        }
        None => Ok(()),
    }
}

impl Session {
    /// Open a session against MySQL
    pub async fn open(config: TapConfig, opener: Option<&dyn TunnelOpener>) -> Result<Self> {
        Self::open_with(config, &MySqlConnectionFactory::new(), opener).await
    }

    /// Open a session with a custom connection factory
    ///
    /// An enabled tunnel is opened first and the connection is pointed at its
    /// local end. If connecting fails the tunnel is closed again.
    pub async fn open_with(
        config: TapConfig,
        factory: &dyn ConnectionFactory,
        opener: Option<&dyn TunnelOpener>,
    ) -> Result<Self> {
        config.validate_connection()?;

        let tunnel = match config.enabled_tunnel() {
            Some(ssh) => {
                let (remote_host, remote_port) = config.remote_address()?;
                let request = TunnelRequest {
                    ssh: ssh.clone(),
                    remote_host,
                    remote_port,
                };
                let tunnel = opener.unwrap_or(&NoTunnel).open(&request).await?;
                info!(
                    bastion = %request.ssh.host,
                    local = %tunnel.local_addr(),
                    "SSH tunnel open"
                );
                Some(tunnel)
            }
            None => None,
        };

        let via = tunnel.as_ref().map(|t| t.local_addr());
        let connected = match config.connection_config(via) {
            Ok(conn_config) => {
                debug!(config = ?conn_config, "Connecting");
                factory.connect(&conn_config).await
            }
            Err(e) => Err(e),
        };
        let conn = match connected {
            Ok(conn) => conn,
            Err(e) => {
                if let Err(close_err) = close_tunnel(tunnel).await {
                    warn!(error = %close_err, "Failed to close SSH tunnel");
                }
                return Err(e);
            }
        };

        Ok(Self {
            config,
            conn,
            tunnel,
            strategy: None,
            columns: HashMap::new(),
        })
    }

    /// Session configuration
    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// The underlying connection
    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    async fn strategy(&mut self) -> Result<Arc<dyn BackendStrategy>> {
        if let Some(strategy) = &self.strategy {
            return Ok(Arc::clone(strategy));
        }
        let kind = detect_dialect(self.conn.as_ref(), self.config.is_vitess).await?;
        let strategy = kind.strategy();
        self.strategy = Some(Arc::clone(&strategy));
        Ok(strategy)
    }

    /// Dialect of the connected server, detected on first use
    pub async fn dialect(&mut self) -> Result<DialectKind> {
        Ok(self.strategy().await?.kind())
    }

    /// Discover catalog entries, restricted to `filter_schemas` when set
    pub async fn discover_catalog_entries(&mut self) -> Result<Vec<CatalogEntry>> {
        let strategy = self.strategy().await?;
        discovery::discover(
            self.conn.as_ref(),
            strategy.as_ref(),
            &self.config.filter_schemas,
        )
        .await
    }

    async fn cached_columns(&mut self, full_table_name: &str) -> Result<&[TableColumn]> {
        if !self.columns.contains_key(full_table_name) {
            let (schema, table) = parse_full_table_name(full_table_name)?;
            let strategy = self.strategy().await?;
            let columns = strategy
                .table_columns(self.conn.as_ref(), schema, table)
                .await?;
            debug!(table = %full_table_name, columns = columns.len(), "Cached table columns");
            self.columns.insert(full_table_name.to_string(), columns);
        }
        self.columns
            .get(full_table_name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::internal(format!("column cache miss for {full_table_name}")))
    }

    /// Columns of `schema.table` in native order
    ///
    /// Metadata is fetched once per table. A non-empty `column_filter`
    /// keeps only the named columns, compared case-insensitively.
    pub async fn get_table_columns(
        &mut self,
        full_table_name: &str,
        column_filter: Option<&[String]>,
    ) -> Result<Vec<TableColumn>> {
        let columns = self.cached_columns(full_table_name).await?;
        Ok(match column_filter {
            Some(filter) if !filter.is_empty() => columns
                .iter()
                .filter(|c| filter.iter().any(|f| f.eq_ignore_ascii_case(&c.name)))
                .cloned()
                .collect(),
            _ => columns.to_vec(),
        })
    }

    fn apply_start_date(&self, request: &mut ExtractionRequest) -> Result<()> {
        if request.starting_value.is_some() {
            return Ok(());
        }
        let Some(key) = request.replication_key.as_deref() else {
            return Ok(());
        };
        let temporal = request
            .catalog_entry
            .column(key)
            .is_some_and(|c| c.portable_type.is_temporal());
        if !temporal {
            return Ok(());
        }
        if let Some(start) = self.config.start_value()? {
            debug!(stream = %request.stream_id(), start = ?start, "Using start_date as starting value");
            request.starting_value = Some(start);
        }
        Ok(())
    }

    /// Extract one catalog entry
    ///
    /// The returned stream borrows the session, so only one scan runs at a
    /// time. Without a starting value, a date/time replication key starts
    /// from `start_date` when configured.
    pub async fn extract(&mut self, mut request: ExtractionRequest) -> Result<RecordStream<'_>> {
        check_partition(&request)?;
        self.apply_start_date(&mut request)?;

        let full_table_name = request.catalog_entry.full_table_name();
        let columns = self.cached_columns(&full_table_name).await?.to_vec();
        let strategy = self
            .strategy
            .as_deref()
            .ok_or_else(|| Error::internal("dialect not resolved"))?;
        extract::extract(self.conn.as_ref(), strategy, &columns, &request).await
    }

    /// Close the connection, then the tunnel
    ///
    /// Both are attempted. The first failure is returned.
    pub async fn close(mut self) -> Result<()> {
        let conn_result = self.conn.close().await;
        let tunnel_result = close_tunnel(self.tunnel.take()).await;
        info!("Session closed");
        conn_result.and(tunnel_result)
    }
}

/// Run `f` on a MySQL session that is closed on every exit path
pub async fn run_scoped<T, F>(
    config: TapConfig,
    opener: Option<&dyn TunnelOpener>,
    f: F,
) -> Result<T>
where
    F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T>>,
{
    run_scoped_with(config, &MySqlConnectionFactory::new(), opener, f).await
}

/// [`run_scoped`] with a custom connection factory
pub async fn run_scoped_with<T, F>(
    config: TapConfig,
    factory: &dyn ConnectionFactory,
    opener: Option<&dyn TunnelOpener>,
    f: F,
) -> Result<T>
where
    F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T>>,
{
    let mut session = Session::open_with(config, factory, opener).await?;
    let outcome = f(&mut session).await;
    let closed = session.close().await;
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "Failed to close session after error");
            }
            Err(e)
        }
    }
}
