//! Dedup and persistence gateway: turns one [`JobRecord`] into a content record.
//!
//! The canonical job URL (stored under [`META_APPLICATION`]) is the dedup key
//! and is global across feeds: a URL imported by one feed is a duplicate for
//! every other feed.

use chrono::Utc;
use thiserror::Error;

use crate::api::JobRecord;
use crate::storage::{ContentStore, Feed, NewRecord, PostStatus, JOB_LISTING_POST_TYPE};
use crate::util::{sanitize_body, sanitize_text_field};

pub const META_LOCATION: &str = "_job_location";
pub const META_COMPANY: &str = "_company_name";
/// Canonical job URL, the dedup marker.
pub const META_APPLICATION: &str = "_application";
pub const META_SALARY: &str = "_job_salary";
pub const META_WEBSITE: &str = "_company_website";
/// Import marker, always `"1"` on pipeline-created records.
pub const META_IMPORTED: &str = "_jobfeeder_imported";
pub const META_FEED_ID: &str = "_jobfeeder_feed_id";
pub const META_SOURCE_URL: &str = "_jobfeeder_source_url";
pub const META_IMPORT_DATE: &str = "_jobfeeder_import_date";

pub const TAXONOMY_CATEGORY: &str = "job_listing_category";
pub const TAXONOMY_TYPE: &str = "job_listing_type";

// ============================================================================
// Outcome Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("Job is missing a title or description")]
    MissingFields,

    #[error("Job has no URL")]
    MissingUrl,

    #[error("Storage error: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported { post_id: i64 },
    Duplicate,
    Rejected(RejectReason),
}

/// Per-run tally of import outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub imported: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub total: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &ImportOutcome) {
        self.total += 1;
        match outcome {
            ImportOutcome::Imported { .. } => self.imported += 1,
            ImportOutcome::Duplicate => self.duplicates += 1,
            ImportOutcome::Rejected(_) => self.errors += 1,
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

pub struct Importer<'a, S> {
    store: &'a S,
    default_status: PostStatus,
}

impl<'a, S: ContentStore> Importer<'a, S> {
    pub fn new(store: &'a S, default_status: PostStatus) -> Self {
        Self {
            store,
            default_status,
        }
    }

    /// Persist `job` as a content record on behalf of `feed` unless its URL
    /// was already imported. Never fails: every problem becomes a rejection.
    pub async fn import_job(&self, job: &JobRecord, feed: &Feed) -> ImportOutcome {
        let url = job.url.trim();
        if url.is_empty() {
            return ImportOutcome::Rejected(RejectReason::MissingUrl);
        }

        match self.store.find_records_by_meta(META_APPLICATION, url).await {
            Ok(existing) if !existing.is_empty() => {
                tracing::debug!(feed_id = feed.id, url = %url, "Skipping duplicate job");
                return ImportOutcome::Duplicate;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %url, error = %e, "Duplicate check failed");
                return ImportOutcome::Rejected(RejectReason::Persistence(format!("{e:#}")));
            }
        }

        let title = sanitize_text_field(&job.title);
        let body = sanitize_body(&job.description);
        if title.is_empty() || body.is_empty() {
            return ImportOutcome::Rejected(RejectReason::MissingFields);
        }

        let record = NewRecord {
            title,
            body,
            status: self.default_status,
            post_type: JOB_LISTING_POST_TYPE.to_string(),
            author_id: feed.author_id,
            created_at: job.posted_at,
        };

        let post_id = match self.store.create_record(&record).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %url, error = %e, "Failed to create record");
                return ImportOutcome::Rejected(RejectReason::Persistence(format!("{e:#}")));
            }
        };

        let meta = import_meta(job, url, feed);
        if let Err(e) = self.store.update_record_meta(post_id, &meta).await {
            tracing::warn!(post_id, url = %url, error = %e, "Failed to attach metadata, removing record");
            // Without its URL marker the record would defeat dedup on the next run
            if let Err(del) = self.store.delete_record(post_id).await {
                tracing::error!(post_id, error = %del, "Failed to remove half-created record");
            }
            return ImportOutcome::Rejected(RejectReason::Persistence(format!("{e:#}")));
        }

        for (taxonomy, term) in [
            (TAXONOMY_CATEGORY, feed.category.trim()),
            (TAXONOMY_TYPE, feed.job_type.trim()),
        ] {
            if term.is_empty() {
                continue;
            }
            if let Err(e) = self.store.set_record_terms(post_id, taxonomy, &[term]).await {
                tracing::warn!(post_id, taxonomy, error = %e, "Failed to tag record");
            }
        }

        tracing::debug!(feed_id = feed.id, post_id, "Imported job");
        ImportOutcome::Imported { post_id }
    }
}

fn import_meta(job: &JobRecord, url: &str, feed: &Feed) -> Vec<(&'static str, String)> {
    let imported_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    [
        (META_LOCATION, job.location.trim().to_string()),
        (META_COMPANY, job.company.trim().to_string()),
        (META_APPLICATION, url.to_string()),
        (META_SALARY, job.salary.trim().to_string()),
        (META_WEBSITE, job.site.trim().to_string()),
        (META_IMPORTED, "1".to_string()),
        (META_FEED_ID, feed.id.to_string()),
        (META_SOURCE_URL, url.to_string()),
        (META_IMPORT_DATE, imported_at),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ContentRecord, Database, FeedStore, NewFeed};
    use anyhow::{anyhow, Result};
    use chrono::{DateTime, Duration};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(url: &str) -> JobRecord {
        JobRecord {
            title: "Senior Nurse".into(),
            description: "Ward duties".into(),
            company: "NHS Trust".into(),
            location: "Leeds".into(),
            url: url.into(),
            salary: String::new(),
            job_type: "Full Time".into(),
            site: "nhs.example".into(),
            logo: String::new(),
            age: "2 days ago".into(),
            postcode: "LS1".into(),
            posted_at: DateTime::<Utc>::from_timestamp(1_750_000_000, 0).unwrap(),
        }
    }

    async fn db_with_feed(category: &str, job_type: &str) -> (Database, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .insert_feed(&NewFeed {
                keyword: "nurse".into(),
                category: category.into(),
                job_type: job_type.into(),
                author_id: 7,
                ..NewFeed::default()
            })
            .await
            .unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        (db, feed)
    }

    #[tokio::test]
    async fn test_import_creates_record_with_meta_and_terms() {
        let (db, feed) = db_with_feed("Healthcare", "full-time").await;
        let importer = Importer::new(&db, PostStatus::Draft);

        let outcome = importer.import_job(&job("https://jobs.example/1"), &feed).await;
        let post_id = match outcome {
            ImportOutcome::Imported { post_id } => post_id,
            other => panic!("Expected Imported, got {:?}", other),
        };

        let records = db
            .find_records_by_meta(META_APPLICATION, "https://jobs.example/1")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, post_id);
        assert_eq!(record.title, "Senior Nurse");
        assert_eq!(record.status, "draft");
        assert_eq!(record.post_type, JOB_LISTING_POST_TYPE);
        assert_eq!(record.author_id, 7);
        assert_eq!(record.created_at.timestamp(), 1_750_000_000);

        let meta = db.get_record_meta(post_id).await.unwrap();
        let value = |key: &str| {
            meta.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(value(META_LOCATION).as_deref(), Some("Leeds"));
        assert_eq!(value(META_COMPANY).as_deref(), Some("NHS Trust"));
        assert_eq!(value(META_WEBSITE).as_deref(), Some("nhs.example"));
        assert_eq!(value(META_IMPORTED).as_deref(), Some("1"));
        assert_eq!(value(META_FEED_ID), Some(feed.id.to_string()));
        assert_eq!(value(META_SOURCE_URL).as_deref(), Some("https://jobs.example/1"));
        assert!(value(META_IMPORT_DATE).is_some());
        // Empty salary is not stored
        assert_eq!(value(META_SALARY), None);

        assert_eq!(
            db.get_record_terms(post_id, TAXONOMY_CATEGORY).await.unwrap(),
            vec!["Healthcare".to_string()]
        );
        assert_eq!(
            db.get_record_terms(post_id, TAXONOMY_TYPE).await.unwrap(),
            vec!["full-time".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_import_is_duplicate_across_feeds() {
        let (db, feed) = db_with_feed("", "").await;
        let other_id = db
            .insert_feed(&NewFeed {
                location: "York".into(),
                ..NewFeed::default()
            })
            .await
            .unwrap();
        let other = db.get_feed(other_id).await.unwrap().unwrap();
        let importer = Importer::new(&db, PostStatus::Publish);

        let first = importer.import_job(&job("https://jobs.example/dup"), &feed).await;
        assert!(matches!(first, ImportOutcome::Imported { .. }));

        let again = importer.import_job(&job("https://jobs.example/dup"), &other).await;
        assert_eq!(again, ImportOutcome::Duplicate);
        assert_eq!(db.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_title_or_description_rejected() {
        let (db, feed) = db_with_feed("", "").await;
        let importer = Importer::new(&db, PostStatus::Publish);

        let mut no_title = job("https://jobs.example/a");
        no_title.title = "   ".into();
        assert_eq!(
            importer.import_job(&no_title, &feed).await,
            ImportOutcome::Rejected(RejectReason::MissingFields)
        );

        let mut markup_only = job("https://jobs.example/b");
        markup_only.title = "<b></b>".into();
        assert_eq!(
            importer.import_job(&markup_only, &feed).await,
            ImportOutcome::Rejected(RejectReason::MissingFields)
        );

        let mut no_body = job("https://jobs.example/c");
        no_body.description = String::new();
        assert_eq!(
            importer.import_job(&no_body, &feed).await,
            ImportOutcome::Rejected(RejectReason::MissingFields)
        );

        assert_eq!(db.count_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_url_rejected() {
        let (db, feed) = db_with_feed("", "").await;
        let importer = Importer::new(&db, PostStatus::Publish);

        assert_eq!(
            importer.import_job(&job("  "), &feed).await,
            ImportOutcome::Rejected(RejectReason::MissingUrl)
        );
    }

    #[tokio::test]
    async fn test_title_is_sanitized() {
        let (db, feed) = db_with_feed("", "").await;
        let importer = Importer::new(&db, PostStatus::Publish);

        let mut j = job("https://jobs.example/html");
        j.title = "<strong>Lead</strong>\n  Developer".into();
        importer.import_job(&j, &feed).await;

        let records = db
            .find_records_by_meta(META_APPLICATION, "https://jobs.example/html")
            .await
            .unwrap();
        assert_eq!(records[0].title, "Lead Developer");
    }

    #[test]
    fn test_run_summary_tally() {
        let mut summary = RunSummary::default();
        summary.record(&ImportOutcome::Imported { post_id: 1 });
        summary.record(&ImportOutcome::Duplicate);
        summary.record(&ImportOutcome::Rejected(RejectReason::MissingUrl));
        summary.record(&ImportOutcome::Imported { post_id: 2 });
        assert_eq!(
            summary,
            RunSummary {
                imported: 2,
                duplicates: 1,
                errors: 1,
                total: 4
            }
        );
    }

    // ========================================================================
    // Failing store doubles
    // ========================================================================

    /// Delegates to a real database but fails selected operations.
    struct FlakyStore {
        db: Database,
        fail_create: bool,
        fail_meta: bool,
        fail_terms: bool,
        deletes: AtomicUsize,
    }

    impl FlakyStore {
        async fn new() -> Self {
            Self {
                db: Database::open(":memory:").await.unwrap(),
                fail_create: false,
                fail_meta: false,
                fail_terms: false,
                deletes: AtomicUsize::new(0),
            }
        }
    }

    impl ContentStore for FlakyStore {
        async fn create_record(&self, record: &NewRecord) -> Result<i64> {
            if self.fail_create {
                return Err(anyhow!("disk full"));
            }
            self.db.create_record(record).await
        }

        async fn update_record_meta(&self, post_id: i64, meta: &[(&str, String)]) -> Result<()> {
            if self.fail_meta {
                return Err(anyhow!("meta table locked")
                    .context(format!("Failed to write metadata for record {post_id}")));
            }
            self.db.update_record_meta(post_id, meta).await
        }

        async fn find_records_by_meta(&self, key: &str, value: &str) -> Result<Vec<ContentRecord>> {
            self.db.find_records_by_meta(key, value).await
        }

        async fn find_records_by_meta_before(
            &self,
            key: &str,
            value: &str,
            before: DateTime<Utc>,
        ) -> Result<Vec<ContentRecord>> {
            self.db.find_records_by_meta_before(key, value, before).await
        }

        async fn set_record_terms(&self, post_id: i64, taxonomy: &str, terms: &[&str]) -> Result<()> {
            if self.fail_terms {
                return Err(anyhow!("unknown taxonomy"));
            }
            self.db.set_record_terms(post_id, taxonomy, terms).await
        }

        async fn delete_record(&self, post_id: i64) -> Result<bool> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.db.delete_record(post_id).await
        }
    }

    fn feed_stub(category: &str) -> Feed {
        let now = Utc::now();
        Feed {
            id: 3,
            name: "stub".into(),
            source: "whatjobs".into(),
            keyword: "nurse".into(),
            location: String::new(),
            limit: 10,
            page: 1,
            author_id: 1,
            category: category.into(),
            job_type: String::new(),
            frequency: crate::storage::Frequency::Daily,
            status: crate::storage::FeedStatus::Active,
            last_run: None,
            next_run: Some(now + Duration::hours(1)),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_failure_reports_storage_message() {
        let mut store = FlakyStore::new().await;
        store.fail_create = true;
        let importer = Importer::new(&store, PostStatus::Publish);

        assert_eq!(
            importer.import_job(&job("https://jobs.example/x"), &feed_stub("")).await,
            ImportOutcome::Rejected(RejectReason::Persistence("disk full".into()))
        );
    }

    #[tokio::test]
    async fn test_meta_failure_removes_half_created_record() {
        let mut store = FlakyStore::new().await;
        store.fail_meta = true;
        let importer = Importer::new(&store, PostStatus::Publish);

        let outcome = importer
            .import_job(&job("https://jobs.example/y"), &feed_stub(""))
            .await;
        assert!(matches!(outcome, ImportOutcome::Rejected(RejectReason::Persistence(_))));
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(store.db.count_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence_reason_keeps_error_chain() {
        let mut store = FlakyStore::new().await;
        store.fail_meta = true;
        let importer = Importer::new(&store, PostStatus::Publish);

        let outcome = importer
            .import_job(&job("https://jobs.example/chain"), &feed_stub(""))
            .await;
        let ImportOutcome::Rejected(RejectReason::Persistence(reason)) = &outcome else {
            panic!("expected a persistence rejection, got {outcome:?}");
        };
        assert!(reason.starts_with("Failed to write metadata for record "), "{reason}");
        assert!(reason.ends_with(": meta table locked"), "{reason}");
    }

    #[tokio::test]
    async fn test_term_failure_still_counts_as_imported() {
        let mut store = FlakyStore::new().await;
        store.fail_terms = true;
        let importer = Importer::new(&store, PostStatus::Publish);

        let outcome = importer
            .import_job(&job("https://jobs.example/z"), &feed_stub("Care"))
            .await;
        assert!(matches!(outcome, ImportOutcome::Imported { .. }));
        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
    }
}
