// [libs/store/src/snapshot.rs]
//! Hot/cold persistence duality (§4.1). The hot store is the in-memory
//! database that receives every write; the cold store is an on-disk file
//! synchronized by `ATTACH DATABASE`-based copy in small batches so a
//! snapshot never holds readers off the hot store for more than one batch.

use std::path::Path;

use libsql::Connection;
use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::schema::{ddl_for_schema, SNAPSHOT_TABLES};

/// Row batch size per copy step, approximating the "~500 pages" budget in
/// §4.1 at the row granularity the libSQL client exposes.
const SNAPSHOT_BATCH_ROWS: i64 = 500;

/// Takes a consistent copy of every snapshot table from `main` into the
/// attached cold file at `cold_path`, overwriting its prior contents.
/// Yields between batches so the hot store's single writer lane is never
/// monopolized for more than one batch at a time.
pub async fn snapshot_hot_to_cold(hot: &Connection, cold_path: &str) -> Result<(), StoreError> {
    debug!(cold_path, "starting hot-to-cold snapshot");
    attach_cold(hot, cold_path).await?;

    for statement in ddl_for_schema("cold") {
        hot.execute(&statement, ()).await?;
    }

    for table in SNAPSHOT_TABLES {
        hot.execute(&format!("DELETE FROM cold.{table}"), ()).await?;

        let mut offset: i64 = 0;
        loop {
            let copied = hot
                .execute(
                    &format!(
                        "INSERT INTO cold.{table} SELECT * FROM main.{table} LIMIT {SNAPSHOT_BATCH_ROWS} OFFSET {offset}"
                    ),
                    (),
                )
                .await?;
            if copied == 0 {
                break;
            }
            offset += SNAPSHOT_BATCH_ROWS;
            tokio::task::yield_now().await;
        }
    }

    detach_cold(hot).await?;
    info!(cold_path, "hot-to-cold snapshot complete");
    Ok(())
}

/// Loads the cold file's contents into the hot store, used once at startup.
/// Returns `false` without touching the hot store when the cold file does
/// not yet exist on disk (first run) or carries no recognizable schema.
pub async fn load_cold_into_hot(hot: &Connection, cold_path: &str) -> Result<bool, StoreError> {
    if !Path::new(cold_path).exists() {
        info!(cold_path, "no cold store file found, starting with an empty hot store");
        return Ok(false);
    }

    attach_cold(hot, cold_path).await?;

    let has_schema = {
        let mut rows = hot
            .query(
                "SELECT 1 FROM cold.sqlite_master WHERE type = 'table' AND name = 'users'",
                (),
            )
            .await?;
        rows.next().await?.is_some()
    };

    if !has_schema {
        warn!(cold_path, "cold store file exists but has no recognizable schema, skipping load");
        detach_cold(hot).await?;
        return Ok(false);
    }

    for table in SNAPSHOT_TABLES {
        hot.execute(&format!("DELETE FROM main.{table}"), ()).await?;

        let mut offset: i64 = 0;
        loop {
            let copied = hot
                .execute(
                    &format!(
                        "INSERT INTO main.{table} SELECT * FROM cold.{table} LIMIT {SNAPSHOT_BATCH_ROWS} OFFSET {offset}"
                    ),
                    (),
                )
                .await?;
            if copied == 0 {
                break;
            }
            offset += SNAPSHOT_BATCH_ROWS;
            tokio::task::yield_now().await;
        }
    }

    detach_cold(hot).await?;
    info!(cold_path, "cold-to-hot load complete");
    Ok(true)
}

async fn attach_cold(hot: &Connection, cold_path: &str) -> Result<(), StoreError> {
    hot.execute(&format!("ATTACH DATABASE '{cold_path}' AS cold"), ())
        .await?;
    Ok(())
}

async fn detach_cold(hot: &Connection) -> Result<(), StoreError> {
    hot.execute("DETACH DATABASE cold", ()).await?;
    Ok(())
}
