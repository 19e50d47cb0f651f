//! Feed orchestration: fetch a feed's jobs, import them, reschedule the feed.

use chrono::{Duration, Utc};
use thiserror::Error;

use crate::api::{ApiError, JobsApi, SearchParams};
use crate::importer::{ImportOutcome, Importer, RunSummary};
use crate::storage::{ContentStore, Feed, FeedStore, PostStatus};

/// Lock held by [`Scheduler::run_due_feeds`] for the length of a batch.
pub const RUN_LOCK_NAME: &str = "run_due_feeds";

/// Age in hours after which a batch lock is assumed abandoned by a crashed run.
pub const RUN_LOCK_STALE_HOURS: i64 = 2;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Feed {0} not found")]
    NotFound(i64),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] ApiError),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

/// Outcome of one [`Scheduler::run_due_feeds`] invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs imported across all feeds
    pub imported: usize,
    /// Another invocation held the batch lock; nothing ran
    pub skipped_locked: bool,
}

pub struct Scheduler<'a, S> {
    store: &'a S,
    api: &'a JobsApi,
    default_status: PostStatus,
}

impl<'a, S> Scheduler<'a, S>
where
    S: ContentStore + FeedStore,
{
    pub fn new(store: &'a S, api: &'a JobsApi, default_status: PostStatus) -> Self {
        Self {
            store,
            api,
            default_status,
        }
    }

    /// Run one feed by id, regardless of its status or schedule.
    ///
    /// # Errors
    ///
    /// - [`RunError::NotFound`]: no feed with this id
    /// - [`RunError::Fetch`]: the API call failed; the feed's run timestamps
    ///   are left untouched so it stays due
    /// - [`RunError::Storage`]: the feed store failed
    pub async fn run_feed(&self, feed_id: i64) -> Result<RunSummary, RunError> {
        let feed = self
            .store
            .get_feed(feed_id)
            .await
            .map_err(RunError::Storage)?
            .ok_or(RunError::NotFound(feed_id))?;

        self.run_loaded_feed(&feed).await
    }

    async fn run_loaded_feed(&self, feed: &Feed) -> Result<RunSummary, RunError> {
        tracing::info!(feed_id = feed.id, name = %feed.name, "Running feed");

        let jobs = self
            .api
            .fetch_jobs(&SearchParams::for_feed(feed))
            .await
            .map_err(|e| {
                tracing::error!(feed_id = feed.id, error = %e, "Failed to fetch jobs");
                RunError::Fetch(e)
            })?;

        let importer = Importer::new(self.store, self.default_status);
        let mut summary = RunSummary::default();
        for job in &jobs {
            let outcome = importer.import_job(job, feed).await;
            if let ImportOutcome::Rejected(reason) = &outcome {
                tracing::warn!(feed_id = feed.id, url = %job.url, reason = %reason, "Job rejected");
            }
            summary.record(&outcome);
        }

        let now = Utc::now();
        let next_run = now + feed.frequency.offset();
        self.store
            .record_feed_run(feed.id, now, next_run)
            .await
            .map_err(RunError::Storage)?;

        tracing::info!(
            feed_id = feed.id,
            imported = summary.imported,
            duplicates = summary.duplicates,
            errors = summary.errors,
            total = summary.total,
            next_run = %next_run,
            "Feed run complete"
        );
        Ok(summary)
    }

    /// Run every due feed in turn. A failing feed is logged and does not stop
    /// the batch.
    ///
    /// Returns a report with `skipped_locked` set, having run nothing, when
    /// another invocation holds a fresh batch lock.
    pub async fn run_due_feeds(&self) -> Result<BatchReport, RunError> {
        let now = Utc::now();
        let acquired = self
            .store
            .try_acquire_run_lock(RUN_LOCK_NAME, now, Duration::hours(RUN_LOCK_STALE_HOURS))
            .await
            .map_err(RunError::Storage)?;
        if !acquired {
            tracing::info!("Another run is in progress, skipping due feeds");
            return Ok(BatchReport {
                skipped_locked: true,
                ..BatchReport::default()
            });
        }

        let result = self.run_due_batch(now).await;

        if let Err(e) = self.store.release_run_lock(RUN_LOCK_NAME).await {
            tracing::warn!(error = %e, "Failed to release run lock");
        }
        result
    }

    async fn run_due_batch(&self, now: chrono::DateTime<Utc>) -> Result<BatchReport, RunError> {
        let feeds = self
            .store
            .get_due_feeds(now)
            .await
            .map_err(RunError::Storage)?;
        tracing::info!(count = feeds.len(), "Processing due feeds");

        let mut report = BatchReport::default();
        for feed in feeds.iter().filter(|f| f.is_due(now)) {
            report.processed += 1;
            match self.run_loaded_feed(feed).await {
                Ok(summary) => {
                    report.succeeded += 1;
                    report.imported += summary.imported;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(feed_id = feed.id, error = %e, "Feed run failed");
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            imported = report.imported,
            "Due feeds processed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RequestContext;
    use crate::storage::{Database, FeedStatus, Frequency, NewFeed};
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use url::Url;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ONE_JOB: &str = r#"<jobs><job>
        <title>Welder</title><snippet>Shop floor</snippet><url>https://jobs.example/w1</url>
    </job></jobs>"#;

    fn api_for(server: &MockServer) -> JobsApi {
        JobsApi::new(
            reqwest::Client::new(),
            Url::parse(&format!("{}/jobs.xml", server.uri())).unwrap(),
            Some(SecretString::from("pub")),
            RequestContext::default(),
        )
    }

    async fn add_feed(db: &Database, keyword: &str, frequency: Frequency) -> i64 {
        db.insert_feed(&NewFeed {
            keyword: keyword.into(),
            frequency,
            ..NewFeed::default()
        })
        .await
        .unwrap()
    }

    async fn make_due(db: &Database, feed_id: i64) {
        sqlx::query("UPDATE feeds SET next_run = NULL WHERE id = ?")
            .bind(feed_id)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_feed_unknown_id() {
        let server = MockServer::start().await;
        let db = Database::open(":memory:").await.unwrap();
        let api = api_for(&server);
        let scheduler = Scheduler::new(&db, &api, PostStatus::Publish);

        assert!(matches!(
            scheduler.run_feed(404).await,
            Err(RunError::NotFound(404))
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_schedule_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let id = add_feed(&db, "welder", Frequency::SixHours).await;
        let before = db.get_feed(id).await.unwrap().unwrap();

        let api = api_for(&server);
        let scheduler = Scheduler::new(&db, &api, PostStatus::Publish);
        let err = scheduler.run_feed(id).await.unwrap_err();
        assert!(matches!(err, RunError::Fetch(ApiError::Upstream { status: 500 })));

        let after = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(after.last_run, before.last_run);
        assert_eq!(after.next_run, before.next_run);
    }

    #[tokio::test]
    async fn test_unknown_frequency_reschedules_daily() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<jobs/>"))
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let id = add_feed(&db, "welder", Frequency::Hourly).await;
        sqlx::query("UPDATE feeds SET frequency = 'fortnightly' WHERE id = ?")
            .bind(id)
            .execute(&db.pool)
            .await
            .unwrap();

        let api = api_for(&server);
        let scheduler = Scheduler::new(&db, &api, PostStatus::Publish);
        let summary = scheduler.run_feed(id).await.unwrap();
        assert_eq!(summary, RunSummary::default());

        let feed = db.get_feed(id).await.unwrap().unwrap();
        let (last, next) = (feed.last_run.unwrap(), feed.next_run.unwrap());
        assert_eq!(next - last, Duration::hours(24));
    }

    #[tokio::test]
    async fn test_due_batch_isolates_failing_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("keyword", "broken"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("keyword", "welder"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ONE_JOB))
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let broken = add_feed(&db, "broken", Frequency::Daily).await;
        let good = add_feed(&db, "welder", Frequency::Daily).await;
        let idle = add_feed(&db, "idle", Frequency::Daily).await;
        make_due(&db, broken).await;
        make_due(&db, good).await;
        // `idle` is scheduled an hour out and must not run

        let api = api_for(&server);
        let scheduler = Scheduler::new(&db, &api, PostStatus::Publish);
        let report = scheduler.run_due_feeds().await.unwrap();

        assert_eq!(
            report,
            BatchReport {
                processed: 2,
                succeeded: 1,
                failed: 1,
                imported: 1,
                skipped_locked: false,
            }
        );
        assert!(db.get_feed(broken).await.unwrap().unwrap().last_run.is_none());
        assert!(db.get_feed(good).await.unwrap().unwrap().last_run.is_some());
        assert!(db.get_feed(idle).await.unwrap().unwrap().last_run.is_none());
    }

    #[tokio::test]
    async fn test_inactive_feeds_not_run_by_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ONE_JOB))
            .expect(0)
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let id = add_feed(&db, "welder", Frequency::Daily).await;
        make_due(&db, id).await;
        db.set_feed_status(id, FeedStatus::Inactive).await.unwrap();

        let api = api_for(&server);
        let scheduler = Scheduler::new(&db, &api, PostStatus::Publish);
        let report = scheduler.run_due_feeds().await.unwrap();
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_held_lock_skips_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ONE_JOB))
            .expect(0)
            .mount(&server)
            .await;

        let db = Database::open(":memory:").await.unwrap();
        let id = add_feed(&db, "welder", Frequency::Daily).await;
        make_due(&db, id).await;
        assert!(db
            .try_acquire_run_lock(RUN_LOCK_NAME, Utc::now(), Duration::hours(2))
            .await
            .unwrap());

        let api = api_for(&server);
        let scheduler = Scheduler::new(&db, &api, PostStatus::Publish);
        let report = scheduler.run_due_feeds().await.unwrap();
        assert!(report.skipped_locked);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_batch_releases_lock() {
        let server = MockServer::start().await;
        let db = Database::open(":memory:").await.unwrap();
        let api = api_for(&server);
        let scheduler = Scheduler::new(&db, &api, PostStatus::Publish);

        scheduler.run_due_feeds().await.unwrap();
        let second = scheduler.run_due_feeds().await.unwrap();
        assert!(!second.skipped_locked);
    }
}
