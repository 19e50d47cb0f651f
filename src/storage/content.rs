use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::store::ContentStore;
use super::types::{ContentDbRow, ContentRecord, NewRecord};

impl ContentStore for Database {
    async fn create_record(&self, record: &NewRecord) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO posts (title, body, status, post_type, author_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(&record.title)
        .bind(&record.body)
        .bind(record.status.as_str())
        .bind(&record.post_type)
        .bind(record.author_id)
        .bind(record.created_at.timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_record_meta(&self, post_id: i64, meta: &[(&str, String)]) -> Result<()> {
        if meta.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("INSERT INTO post_meta (post_id, meta_key, meta_value) ");
        builder.push_values(meta, |mut b, (key, value)| {
            b.push_bind(post_id).push_bind(*key).push_bind(value);
        });
        builder.push(" ON CONFLICT(post_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value");

        builder
            .build()
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to write metadata for record {post_id}"))?;
        Ok(())
    }

    async fn find_records_by_meta(&self, key: &str, value: &str) -> Result<Vec<ContentRecord>> {
        let rows: Vec<ContentDbRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.title, p.body, p.status, p.post_type, p.author_id, p.created_at
            FROM posts p
            INNER JOIN post_meta pm ON p.id = pm.post_id
            WHERE pm.meta_key = ? AND pm.meta_value = ?
            ORDER BY p.created_at, p.id
        "#,
        )
        .bind(key)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentDbRow::into_record).collect())
    }

    async fn find_records_by_meta_before(
        &self,
        key: &str,
        value: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<ContentRecord>> {
        let rows: Vec<ContentDbRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.title, p.body, p.status, p.post_type, p.author_id, p.created_at
            FROM posts p
            INNER JOIN post_meta pm ON p.id = pm.post_id
            WHERE pm.meta_key = ? AND pm.meta_value = ? AND p.created_at < ?
            ORDER BY p.created_at, p.id
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(before.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentDbRow::into_record).collect())
    }

    async fn set_record_terms(&self, post_id: i64, taxonomy: &str, terms: &[&str]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM post_terms WHERE post_id = ? AND taxonomy = ?")
            .bind(post_id)
            .bind(taxonomy)
            .execute(&mut *tx)
            .await?;

        if !terms.is_empty() {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO post_terms (post_id, taxonomy, term) ");
            builder.push_values(terms, |mut b, term| {
                b.push_bind(post_id).push_bind(taxonomy).push_bind(*term);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_record(&self, post_id: i64) -> Result<bool> {
        // Children are removed explicitly so the delete does not depend on the
        // connection's foreign_keys pragma
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM post_meta WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM post_terms WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}

impl Database {
    /// All metadata on a record, ordered by key.
    pub async fn get_record_meta(&self, post_id: i64) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT meta_key, meta_value FROM post_meta WHERE post_id = ? ORDER BY meta_key",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Terms of one taxonomy on a record.
    pub async fn get_record_terms(&self, post_id: i64, taxonomy: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT term FROM post_terms WHERE post_id = ? AND taxonomy = ? ORDER BY term",
        )
        .bind(post_id)
        .bind(taxonomy)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(term,)| term).collect())
    }

    /// Total number of content records.
    pub async fn count_records(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
