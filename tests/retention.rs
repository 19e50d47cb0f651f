//! Integration tests for the retention sweep.

use chrono::{Duration, Utc};
use jobfeeder::importer::{META_APPLICATION, META_IMPORTED};
use jobfeeder::retention::cleanup_old_jobs;
use jobfeeder::storage::{ContentStore, Database, NewRecord, PostStatus, JOB_LISTING_POST_TYPE};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

async fn imported_record(db: &Database, url: &str, age_days: i64) -> i64 {
    let id = db
        .create_record(&NewRecord {
            title: url.to_string(),
            body: "body".to_string(),
            status: PostStatus::Publish,
            post_type: JOB_LISTING_POST_TYPE.to_string(),
            author_id: 1,
            created_at: Utc::now() - Duration::days(age_days),
        })
        .await
        .unwrap();
    db.update_record_meta(
        id,
        &[
            (META_APPLICATION, url.to_string()),
            (META_IMPORTED, "1".to_string()),
        ],
    )
    .await
    .unwrap();
    db.set_record_terms(id, "job_listing_category", &["Ops"])
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn test_cleanup_deletes_only_expired_imports() {
    let db = test_db().await;
    let old = imported_record(&db, "https://jobs.example.com/old", 40).await;
    let fresh = imported_record(&db, "https://jobs.example.com/fresh", 5).await;

    assert_eq!(cleanup_old_jobs(&db, 30).await.unwrap(), 1);

    assert!(db
        .find_records_by_meta(META_APPLICATION, "https://jobs.example.com/old")
        .await
        .unwrap()
        .is_empty());
    assert!(db.get_record_meta(old).await.unwrap().is_empty());
    assert!(db
        .get_record_terms(old, "job_listing_category")
        .await
        .unwrap()
        .is_empty());

    let remaining = db.find_records_by_meta(META_IMPORTED, "1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, fresh);
}

#[tokio::test]
async fn test_cleanup_ignores_records_without_marker() {
    let db = test_db().await;
    let manual = db
        .create_record(&NewRecord {
            title: "Hand-written listing".to_string(),
            body: "body".to_string(),
            status: PostStatus::Publish,
            post_type: JOB_LISTING_POST_TYPE.to_string(),
            author_id: 1,
            created_at: Utc::now() - Duration::days(400),
        })
        .await
        .unwrap();

    assert_eq!(cleanup_old_jobs(&db, 30).await.unwrap(), 0);
    assert_eq!(db.count_records().await.unwrap(), 1);
    assert!(db.delete_record(manual).await.unwrap());
}

#[tokio::test]
async fn test_second_sweep_is_noop() {
    let db = test_db().await;
    imported_record(&db, "https://jobs.example.com/a", 31).await;
    imported_record(&db, "https://jobs.example.com/b", 90).await;

    assert_eq!(cleanup_old_jobs(&db, 30).await.unwrap(), 2);
    assert_eq!(cleanup_old_jobs(&db, 30).await.unwrap(), 0);
}
