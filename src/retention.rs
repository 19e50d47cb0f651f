//! Retention sweep for imported records.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::importer::META_IMPORTED;
use crate::storage::ContentStore;

/// Permanently delete imported records created more than `retention_days` ago.
///
/// Only records carrying the import marker are considered. A record that
/// fails to delete is logged and skipped, and is not counted.
///
/// Returns the number of records deleted.
pub async fn cleanup_old_jobs<S: ContentStore>(store: &S, retention_days: u32) -> Result<u64> {
    let cutoff = Utc::now()
        .checked_sub_signed(Duration::days(i64::from(retention_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let candidates = store
        .find_records_by_meta_before(META_IMPORTED, "1", cutoff)
        .await
        .context("Failed to list expired imported records")?;

    let mut deleted: u64 = 0;
    for record in &candidates {
        match store.delete_record(record.id).await {
            Ok(true) => deleted += 1,
            Ok(false) => {
                tracing::debug!(post_id = record.id, "Record already gone");
            }
            Err(e) => {
                tracing::warn!(post_id = record.id, error = %e, "Failed to delete expired record");
            }
        }
    }

    tracing::info!(deleted, retention_days, cutoff = %cutoff, "Retention sweep complete");
    Ok(deleted)
}
