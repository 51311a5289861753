//! Read-only listing of recently updated albums.

use std::time::Instant;

use super::model::AlbumSummary;
use super::{Result, StoreContext, ALBUMS, MARKETING_BUDGET};
use crate::observability::metrics::record_query;
use crate::storage::{Client, Statement, Timestamp};

/// Upper bound on the number of albums one listing returns.
pub const MAX_ALBUM_LIMIT: u32 = 1000;

const RECENT_ALBUMS: &str = r#"SELECT SingerId, AlbumId, MarketingBudget, LastUpdateTime
FROM Albums
ORDER BY LastUpdateTime DESC, SingerId, AlbumId
LIMIT @max"#;

// Before the budget column exists every row reports it as absent.
const RECENT_ALBUMS_UNMIGRATED: &str = r#"SELECT SingerId, AlbumId, NULL AS MarketingBudget, LastUpdateTime
FROM Albums
ORDER BY LastUpdateTime DESC, SingerId, AlbumId
LIMIT @max"#;

/// List at most `limit` albums, most recently updated first.
///
/// Runs in a single read-only transaction. `limit` is capped at
/// [`MAX_ALBUM_LIMIT`]; asking for more albums than exist returns all of them.
/// Rows with equal `LastUpdateTime` are ordered by key.
pub async fn list_recent_albums(client: &Client, limit: u32) -> Result<Vec<AlbumSummary>> {
    let max = limit.min(MAX_ALBUM_LIMIT);
    let started = Instant::now();

    let result = client
        .read_only_transaction(move |txn| {
            let migrated = txn
                .has_column(ALBUMS, MARKETING_BUDGET)
                .context(|| format!("inspect schema of {ALBUMS}"))?;
            let sql = if migrated {
                RECENT_ALBUMS
            } else {
                RECENT_ALBUMS_UNMIGRATED
            };
            let stmt = Statement::new(sql).bind("max", i64::from(max));
            txn.query(&stmt, |row| {
                Ok(AlbumSummary {
                    singer_id: row.get(0)?,
                    album_id: row.get(1)?,
                    marketing_budget: row.get(2)?,
                    last_update_time: row.get::<_, Option<i64>>(3)?.map(Timestamp::from_micros),
                })
            })
            .context(|| format!("list {max} most recent albums"))
        })
        .await;

    record_query(started.elapsed().as_secs_f64(), result.is_ok());
    if let Ok(albums) = &result {
        tracing::debug!(limit = max, returned = albums.len(), "Listed recent albums");
    }
    result
}
