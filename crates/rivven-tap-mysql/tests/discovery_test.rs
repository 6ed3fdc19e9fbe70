//! Tests for dialect detection and schema discovery

mod common;

use common::*;
use rivven_tap_mysql::backend::{OLAP_WORKLOAD_SQL, VITESS_PROBE_SQL};
use rivven_tap_mysql::prelude::*;

const TABLES: &str = "information_schema.TABLES";
const COLUMNS: &str = "information_schema.COLUMNS";
const STATISTICS: &str = "information_schema.STATISTICS";

// ==================== Dialect Detection ====================

#[tokio::test]
async fn test_override_skips_probe() {
    init_test_logging();
    let conn = MockConnection::new().on(
        VITESS_PROBE_SQL,
        vec![row(&[("variable_value", "PlanetScale".into())])],
    );

    assert_eq!(
        detect_dialect(&conn, Some(false)).await.unwrap(),
        DialectKind::Standard
    );
    assert_eq!(
        detect_dialect(&conn, Some(true)).await.unwrap(),
        DialectKind::DistributedVariant
    );
    assert!(conn.statements().is_empty());
}

#[tokio::test]
async fn test_probe_row_means_vitess() {
    let conn = MockConnection::new().on(
        VITESS_PROBE_SQL,
        vec![row(&[("variable_value", "PlanetScale Vitess".into())])],
    );
    assert_eq!(
        detect_dialect(&conn, None).await.unwrap(),
        DialectKind::DistributedVariant
    );
    assert_eq!(conn.statements(), vec![VITESS_PROBE_SQL.to_string()]);
}

#[tokio::test]
async fn test_no_probe_row_means_standard() {
    let conn = MockConnection::new();
    assert_eq!(
        detect_dialect(&conn, None).await.unwrap(),
        DialectKind::Standard
    );
}

#[tokio::test]
async fn test_probe_failure_propagates() {
    let conn = MockConnection::new().fail_on("performance_schema", "access denied");
    let err = detect_dialect(&conn, None).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Query);
}

#[tokio::test]
async fn test_session_detects_dialect_once() {
    let conn = MockConnection::new();
    let mut session = open_session(&conn, None).await;

    assert_eq!(session.dialect().await.unwrap(), DialectKind::Standard);
    assert_eq!(session.dialect().await.unwrap(), DialectKind::Standard);
    session.discover_catalog_entries().await.unwrap();

    assert_eq!(conn.count("performance_schema.global_variables"), 1);
}

// ==================== Discovery ====================

fn shop_tables() -> MockConnection {
    MockConnection::new()
        .on_params(TABLES, vec!["shop".into()], vec![relation_row("orders", false)])
        .on_params(
            COLUMNS,
            vec!["shop".into(), "orders".into()],
            vec![
                column_row("id", "int unsigned", false),
                column_row("placed_on", "date", true),
                column_row("updated_at", "datetime(6)", true),
                column_row("amount", "decimal(10,2)", true),
                column_row("payload", "json", true),
                column_row("status", "enum('new','paid')", true),
                column_row("is_gift", "tinyint(1)", true),
                column_row("shape", "geometry", true),
            ],
        )
        .on_params(
            STATISTICS,
            vec!["shop".into(), "orders".into()],
            vec![index_row("PRIMARY", "id", true)],
        )
}

#[tokio::test]
async fn test_schema_filter_is_used_verbatim() {
    init_test_logging();
    let conn = shop_tables();
    let mut config = test_config(Some(false));
    config.filter_schemas = vec!["shop".into(), "does_not_exist".into()];
    let mut session = Session::open_with(config, &MockFactory::new(conn.clone()), None)
        .await
        .unwrap();

    let entries = session.discover_catalog_entries().await.unwrap();

    let ids: Vec<_> = entries.iter().map(|e| e.tap_stream_id.as_str()).collect();
    assert_eq!(ids, vec!["shop-orders"]);
    assert_eq!(conn.count("SHOW DATABASES"), 0);
    assert_eq!(conn.count(TABLES), 2);
}

#[tokio::test]
async fn test_all_schemas_without_filter() {
    let conn = shop_tables().on(
        "SHOW DATABASES",
        vec![
            row(&[("Database", "information_schema".into())]),
            row(&[("Database", "shop".into())]),
        ],
    );
    let mut session = open_session(&conn, Some(false)).await;

    let entries = session.discover_catalog_entries().await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(conn.count("SHOW DATABASES"), 1);
    let table_params: Vec<_> = conn
        .executed()
        .into_iter()
        .filter(|e| e.sql.contains(TABLES))
        .map(|e| e.params)
        .collect();
    assert_eq!(
        table_params,
        vec![
            vec![Value::from("information_schema")],
            vec![Value::from("shop")]
        ]
    );
}

#[tokio::test]
async fn test_standard_entry_shape() {
    let conn = shop_tables();
    let mut config = test_config(Some(false));
    config.filter_schemas = vec!["shop".into()];
    let mut session = Session::open_with(config, &MockFactory::new(conn), None)
        .await
        .unwrap();

    let entries = session.discover_catalog_entries().await.unwrap();
    let entry = &entries[0];

    assert_eq!(entry.stream, "shop-orders");
    assert_eq!(entry.table_name, "orders");
    assert_eq!(entry.schema_name, "shop");
    assert!(!entry.is_view);
    assert_eq!(entry.key_properties, Some(vec!["id".to_string()]));
    assert_eq!(entry.replication_method, ReplicationMethod::FullTable);

    let names: Vec<_> = entry.columns.iter().map(|c| c.name()).collect();
    assert_eq!(
        names,
        vec!["id", "placed_on", "updated_at", "amount", "payload", "status", "is_gift", "shape"]
    );

    let types: Vec<_> = entry.columns.iter().map(|c| c.portable_type).collect();
    assert_eq!(
        types,
        vec![
            PortableType::Integer,
            PortableType::Date,
            PortableType::DateTime,
            PortableType::Number,
            PortableType::Object,
            PortableType::String,
            PortableType::Integer,
            PortableType::String,
        ]
    );
    assert!(!entry.columns[0].descriptor.nullable);
    assert_eq!(entry.columns[0].descriptor.native_type, "int unsigned");
}

#[tokio::test]
async fn test_vitess_view_uses_raw_show_columns() {
    init_test_logging();
    let conn = MockConnection::new()
        .on_params(
            TABLES,
            vec!["shop".into()],
            vec![relation_row("orders", false), relation_row("order_totals", true)],
        )
        .on(
            "SHOW columns from `shop`.`order_totals`",
            vec![
                show_column_row("order_id", "int", false),
                show_column_row("total", "decimal(12,2)", true),
                show_column_row("meta", "json", true),
                show_column_row("state", "enum('a','b')", true),
            ],
        )
        .on_params(
            COLUMNS,
            vec!["shop".into(), "orders".into()],
            vec![column_row("id", "bigint", false)],
        );
    let mut config = test_config(Some(true));
    config.filter_schemas = vec!["shop".into()];
    let mut session = Session::open_with(config, &MockFactory::new(conn.clone()), None)
        .await
        .unwrap();

    let entries = session.discover_catalog_entries().await.unwrap();
    assert_eq!(entries.len(), 2);

    let view = entries.iter().find(|e| e.is_view).unwrap();
    assert_eq!(view.tap_stream_id, "shop-order_totals");
    assert!(view.key_properties.is_none());
    assert!(view.replication_key.is_none());
    let types: Vec<_> = view.columns.iter().map(|c| c.portable_type).collect();
    assert_eq!(
        types,
        vec![
            PortableType::Integer,
            PortableType::Number,
            PortableType::String,
            PortableType::String,
        ]
    );
    assert_eq!(view.columns[2].descriptor.native_type, "json");

    // The view never goes through information_schema reflection
    let view_reflections = conn
        .executed()
        .into_iter()
        .filter(|e| e.sql.contains(COLUMNS) && e.params.contains(&Value::from("order_totals")))
        .count();
    assert_eq!(view_reflections, 0);

    // Discovery alone never switches the workload
    assert_eq!(conn.count(OLAP_WORKLOAD_SQL), 0);
}

#[tokio::test]
async fn test_standard_view_uses_reflection() {
    let conn = MockConnection::new()
        .on_params(TABLES, vec!["shop".into()], vec![relation_row("v", true)])
        .on_params(
            COLUMNS,
            vec!["shop".into(), "v".into()],
            vec![column_row("doc", "json", true)],
        );
    let mut config = test_config(Some(false));
    config.filter_schemas = vec!["shop".into()];
    let mut session = Session::open_with(config, &MockFactory::new(conn.clone()), None)
        .await
        .unwrap();

    let entries = session.discover_catalog_entries().await.unwrap();

    assert!(entries[0].is_view);
    assert_eq!(entries[0].columns[0].portable_type, PortableType::Object);
    assert_eq!(conn.count("SHOW columns"), 0);
}

#[tokio::test]
async fn test_unique_index_fallback_for_keys() {
    let conn = MockConnection::new()
        .on_params(TABLES, vec!["shop".into()], vec![relation_row("users", false)])
        .on_params(
            COLUMNS,
            vec!["shop".into(), "users".into()],
            vec![column_row("email", "varchar(255)", false)],
        )
        .on(
            STATISTICS,
            vec![
                index_row("by_created", "created_at", false),
                index_row("email_uq", "email", true),
            ],
        );
    let mut config = test_config(Some(false));
    config.filter_schemas = vec!["shop".into()];
    let mut session = Session::open_with(config, &MockFactory::new(conn), None)
        .await
        .unwrap();

    let entries = session.discover_catalog_entries().await.unwrap();
    assert_eq!(entries[0].key_properties, Some(vec!["email".to_string()]));
}

#[tokio::test]
async fn test_catalog_round_trip() {
    let conn = shop_tables();
    let mut config = test_config(Some(false));
    config.filter_schemas = vec!["shop".into()];
    let mut session = Session::open_with(config, &MockFactory::new(conn), None)
        .await
        .unwrap();

    let catalog = Catalog::new(session.discover_catalog_entries().await.unwrap());
    let json = catalog.to_json().unwrap();
    let parsed = Catalog::from_json(&json).unwrap();
    assert_eq!(parsed, catalog);

    let schema = parsed.get("shop-orders").unwrap().json_schema();
    assert_eq!(schema["properties"]["placed_on"]["format"], "date");
    assert_eq!(schema["properties"]["payload"]["type"], "object");
    assert_eq!(schema["properties"]["id"]["type"], "integer");
    assert_eq!(schema["required"], serde_json::json!(["id"]));
}
