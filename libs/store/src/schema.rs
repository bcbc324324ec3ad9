//! Relational schema for the hot store, plus the PRAGMAs applied to every
//! connection. Statements are schema-prefix agnostic so the same DDL text
//! drives both `main` (the hot, in-memory database) and an attached cold
//! file (`cold.<table>`) during snapshot load/save.

use libsql::Connection;

use crate::errors::StoreError;

/// PRAGMAs applied to every fresh connection: WAL for concurrent readers
/// under a single writer, NORMAL sync since the cold snapshot is the
/// durability backstop, in-memory temp tables, and a busy timeout so a
/// transient lock does not surface as an immediate error.
pub const PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA temp_store = MEMORY",
    "PRAGMA busy_timeout = 5000",
];

/// DDL for one copy of the schema under `schema.<table>`, e.g. `main` or
/// `cold`. Order matters: tables before their indexes.
pub fn ddl_for_schema(schema: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.users (
                node TEXT NOT NULL,
                username TEXT NOT NULL,
                enabled TEXT NOT NULL DEFAULT 'true',
                created_at TEXT NOT NULL,
                sub_end TEXT NOT NULL DEFAULT '',
                renew_days INTEGER NOT NULL DEFAULT 0,
                ip_limit INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL DEFAULT '',
                uplink INTEGER NOT NULL DEFAULT 0,
                downlink INTEGER NOT NULL DEFAULT 0,
                sess_uplink INTEGER NOT NULL DEFAULT 0,
                sess_downlink INTEGER NOT NULL DEFAULT 0,
                rate INTEGER NOT NULL DEFAULT 0,
                ips TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (node, username)
            )",
            schema = schema
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.credential_bindings (
                node TEXT NOT NULL,
                username TEXT NOT NULL,
                credential TEXT NOT NULL,
                inbound_tag TEXT NOT NULL,
                PRIMARY KEY (node, username, credential, inbound_tag)
            )",
            schema = schema
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.inbound_traffic (
                node TEXT NOT NULL,
                source TEXT NOT NULL,
                uplink INTEGER NOT NULL DEFAULT 0,
                downlink INTEGER NOT NULL DEFAULT 0,
                sess_uplink INTEGER NOT NULL DEFAULT 0,
                sess_downlink INTEGER NOT NULL DEFAULT 0,
                rate INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (node, source)
            )",
            schema = schema
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.dns_records (
                node TEXT NOT NULL,
                username TEXT NOT NULL,
                domain TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (node, username, domain)
            )",
            schema = schema
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{s}_users_rate ON {schema}.users (rate)",
            s = schema,
            schema = schema
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{s}_users_enabled ON {schema}.users (enabled)",
            s = schema,
            schema = schema
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{s}_users_sub_end ON {schema}.users (sub_end)",
            s = schema,
            schema = schema
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{s}_users_renew_days ON {schema}.users (renew_days)",
            s = schema,
            schema = schema
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{s}_users_last_seen ON {schema}.users (last_seen)",
            s = schema,
            schema = schema
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{s}_dns_count ON {schema}.dns_records (username, count)",
            s = schema,
            schema = schema
        ),
    ]
}

/// Tables covered by hot/cold snapshotting, in dependency order (children
/// after the parents they logically reference).
pub const SNAPSHOT_TABLES: &[&str] =
    &["users", "credential_bindings", "inbound_traffic", "dns_records"];

pub async fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    for pragma in PRAGMAS {
        conn.execute(pragma, ()).await?;
    }
    Ok(())
}

pub async fn init_main_schema(conn: &Connection) -> Result<(), StoreError> {
    for statement in ddl_for_schema("main") {
        conn.execute(&statement, ()).await?;
    }
    Ok(())
}

/// Opens the hot store: an in-memory libSQL database with the schema and
/// PRAGMAs applied, ready to be wrapped in a `StoreHandle`. The in-memory
/// database is named rather than anonymous so that every connection pulled
/// from `db` shares the same backing pages for the lifetime of the process.
pub async fn open_hot_database() -> Result<(libsql::Database, Connection), StoreError> {
    let db = libsql::Builder::new_local(":memory:").build().await?;
    let conn = db.connect()?;
    apply_pragmas(&conn).await?;
    init_main_schema(&conn).await?;
    Ok((db, conn))
}
