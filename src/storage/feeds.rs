use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use super::schema::Database;
use super::store::FeedStore;
use super::types::{Feed, FeedDbRow, FeedStatus, NewFeed};

const FEED_COLUMNS: &str = r#"
    id, name, source, keyword, location, limit_jobs, page_number, author_id,
    job_category, job_type, frequency, status, last_run, next_run, created_at
"#;

/// Delay before a newly created feed first becomes due.
const FIRST_RUN_DELAY_HOURS: i64 = 1;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Create a feed from operator input.
    ///
    /// The feed first becomes due one hour after creation.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<i64> {
        feed.validate()?;
        let now = Utc::now();
        let next_run = now + Duration::hours(FIRST_RUN_DELAY_HOURS);

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (
                name, source, keyword, location, limit_jobs, page_number, author_id,
                job_category, job_type, frequency, status, next_run, created_at, updated_at
            )
            VALUES (?, 'whatjobs', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(feed.display_name())
        .bind(feed.keyword.trim())
        .bind(feed.location.trim())
        .bind(feed.limit as i64)
        .bind(feed.page as i64)
        .bind(feed.author_id)
        .bind(feed.category.trim())
        .bind(feed.job_type.trim())
        .bind(feed.frequency.as_str())
        .bind(feed.status.as_str())
        .bind(next_run.timestamp())
        .bind(now.timestamp())
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert feed")?;

        tracing::info!(feed_id = id, name = %feed.display_name(), "Feed created");
        Ok(id)
    }

    /// Overwrite a feed's configuration. Run bookkeeping is left untouched.
    ///
    /// Returns `false` when no feed has the given id.
    pub async fn update_feed(&self, feed_id: i64, feed: &NewFeed) -> Result<bool> {
        feed.validate()?;
        let result = sqlx::query(
            r#"
            UPDATE feeds SET
                name = ?, keyword = ?, location = ?, limit_jobs = ?, page_number = ?,
                author_id = ?, job_category = ?, job_type = ?, frequency = ?, status = ?,
                updated_at = ?
            WHERE id = ?
        "#,
        )
        .bind(feed.display_name())
        .bind(feed.keyword.trim())
        .bind(feed.location.trim())
        .bind(feed.limit as i64)
        .bind(feed.page as i64)
        .bind(feed.author_id)
        .bind(feed.category.trim())
        .bind(feed.job_type.trim())
        .bind(feed.frequency.as_str())
        .bind(feed.status.as_str())
        .bind(Utc::now().timestamp())
        .bind(feed_id)
        .execute(&self.pool)
        .await
        .context("Failed to update feed")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a feed. Records it already imported stay in content storage.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Pause or activate a feed.
    pub async fn set_feed_status(&self, feed_id: i64, status: FeedStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE feeds SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().timestamp())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All feeds, newest first.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedDbRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id DESC"))
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }
}

impl FeedStore for Database {
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let row: Option<FeedDbRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    async fn get_due_feeds(&self, now: DateTime<Utc>) -> Result<Vec<Feed>> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(&format!(
            r#"
            SELECT {FEED_COLUMNS} FROM feeds
            WHERE status = 'active' AND (next_run IS NULL OR next_run <= ?)
            ORDER BY next_run IS NOT NULL, next_run, id
        "#
        ))
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    async fn record_feed_run(
        &self,
        feed_id: i64,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE feeds SET last_run = ?, next_run = ?, updated_at = ? WHERE id = ?")
            .bind(last_run.timestamp())
            .bind(next_run.timestamp())
            .bind(last_run.timestamp())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_acquire_run_lock(
        &self,
        name: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<bool> {
        // Insert, or take over a lock whose holder has gone quiet for too long
        let result = sqlx::query(
            r#"
            INSERT INTO run_locks (name, acquired_at) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET acquired_at = excluded.acquired_at
            WHERE run_locks.acquired_at < ?
        "#,
        )
        .bind(name)
        .bind(now.timestamp())
        .bind((now - stale_after).timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_run_lock(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM run_locks WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
