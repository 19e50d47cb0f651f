//! Collaborator seams consumed by the import pipeline.
//!
//! [`Database`](super::Database) implements all three traits; tests can
//! substitute their own doubles for any of them.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::types::{ContentRecord, Feed, NewRecord};

/// Content storage: the destination side of an import.
#[allow(async_fn_in_trait)]
pub trait ContentStore {
    /// Create a record, returning its id.
    async fn create_record(&self, record: &NewRecord) -> Result<i64>;

    /// Insert or overwrite metadata key/value pairs on a record.
    async fn update_record_meta(&self, post_id: i64, meta: &[(&str, String)]) -> Result<()>;

    /// All records carrying metadata `key` equal to `value`, oldest first.
    async fn find_records_by_meta(&self, key: &str, value: &str) -> Result<Vec<ContentRecord>>;

    /// Like [`find_records_by_meta`](Self::find_records_by_meta), limited to
    /// records created strictly before `before`.
    async fn find_records_by_meta_before(
        &self,
        key: &str,
        value: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<ContentRecord>>;

    /// Replace the terms of `taxonomy` on a record.
    async fn set_record_terms(&self, post_id: i64, taxonomy: &str, terms: &[&str]) -> Result<()>;

    /// Permanently delete a record with its metadata and terms.
    /// Returns `false` when no such record existed.
    async fn delete_record(&self, post_id: i64) -> Result<bool>;
}

/// Feed configuration as seen by the scheduler.
#[allow(async_fn_in_trait)]
pub trait FeedStore {
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>>;

    /// Active feeds whose `next_run` is unset or at or before `now`.
    async fn get_due_feeds(&self, now: DateTime<Utc>) -> Result<Vec<Feed>>;

    /// Persist run bookkeeping after an import attempt.
    async fn record_feed_run(
        &self,
        feed_id: i64,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()>;

    /// Take the named lock unless a holder acquired it less than `stale_after` ago.
    async fn try_acquire_run_lock(
        &self,
        name: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool>;

    async fn release_run_lock(&self, name: &str) -> Result<()>;
}

/// Key-value settings.
#[allow(async_fn_in_trait)]
pub trait SettingsStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
