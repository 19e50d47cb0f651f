use anyhow::Result;

use super::schema::Database;
use super::store::SettingsStore;

impl SettingsStore for Database {
    /// Get a single setting value by key, or `None` if not set.
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a setting value (UPSERT).
    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, SettingsStore};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_setting_returns_none() {
        let db = test_db().await;
        assert_eq!(db.get_setting("publisher_id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_overwrite_setting() {
        let db = test_db().await;
        db.set_setting("default_status", "draft").await.unwrap();
        assert_eq!(
            db.get_setting("default_status").await.unwrap().as_deref(),
            Some("draft")
        );

        db.set_setting("default_status", "pending").await.unwrap();
        assert_eq!(
            db.get_setting("default_status").await.unwrap().as_deref(),
            Some("pending")
        );
    }
}
