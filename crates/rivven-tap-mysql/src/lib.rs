//! # rivven-tap-mysql
//!
//! Extraction connector for MySQL-compatible databases, including the
//! Vitess-based PlanetScale engine.
//!
//! ## Features
//!
//! - **Schema Discovery**: one catalog entry per table and view, with portable
//!   column types, key properties and replication capabilities
//! - **Dialect Detection**: stock MySQL vs. Vitess, probed once per session or
//!   forced through configuration
//! - **Extraction**: full-table and incremental scans streamed lazily, with an
//!   inclusive `>=` watermark on the replication key
//! - **Row Conformance**: dates stay dates, date-times render as ISO-8601,
//!   JSON documents pass through unchanged
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_tap_mysql::prelude::*;
//!
//! let config = TapConfig::from_json(r#"{"connection_url": "mysql://tap:secret@db/shop"}"#)?;
//! let mut session = Session::open(config, None).await?;
//!
//! let mut entry = session
//!     .discover_catalog_entries()
//!     .await?
//!     .into_iter()
//!     .find(|e| e.tap_stream_id == "shop-orders")
//!     .unwrap();
//! entry.set_replication_key(Some("updated_at"))?;
//!
//! let request = ExtractionRequest::new(entry).with_starting_value(Value::from(41_i64));
//! let mut records = session.extract(request).await?;
//! while let Some(record) = records.try_next().await? {
//!     println!("{}", serde_json::Value::Object(record));
//! }
//! drop(records);
//! session.close().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod backend;
pub mod catalog;
pub mod column_type;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod mysql;
pub mod record;
pub mod schema;
pub mod session;
pub mod tunnel;
pub mod typemap;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::column_type::ColumnType;
    pub use crate::typemap::{map_type, map_type_class, PortableType};
    pub use crate::types::{Row, Value};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, RowStream, VecRowStream,
    };
    pub use crate::mysql::{MySqlConnection, MySqlConnectionFactory};

    // Dialect and backend
    pub use crate::backend::{detect_dialect, BackendStrategy, DialectKind};
    pub use crate::dialect::MySqlDialect;

    // Catalog and discovery
    pub use crate::catalog::{
        Catalog, CatalogColumn, CatalogEntry, ReplicationCapabilities, ReplicationMethod,
    };
    pub use crate::schema::TableColumn;

    // Extraction
    pub use crate::extract::{ExtractionRequest, PartitionContext, RecordStream};
    pub use crate::record::Record;

    // Session and configuration
    pub use crate::config::{SensitiveString, SshTunnelConfig, TapConfig};
    pub use crate::session::{run_scoped, run_scoped_with, Session};
    pub use crate::tunnel::{Tunnel, TunnelOpener, TunnelRequest};

    pub use futures::TryStreamExt;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use session::Session;
pub use types::Value;
