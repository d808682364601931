//! Raw record repository

use super::MetaDb;
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

/// A row as it was uploaded, before any cleaning
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: i64,
    pub last_update: Option<String>,
    pub brand_label: Option<String>,
    pub author_name: Option<String>,
    pub channel: Option<String>,
    pub message_type: Option<String>,
    pub text: Option<String>,
    pub tags: Option<String>,
    pub post_link: Option<String>,
    pub sentiment: Option<String>,
    pub caption: Option<String>,
    pub upload_batch_id: Option<String>,
    pub original_row_index: Option<String>,
    pub processed: bool,
    pub created_at: String,
}

/// A raw row to be appended to the store.
///
/// Every field accepts strings, numbers, booleans or null so that exports
/// with loosely typed columns load without a schema of their own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRawRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_update: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub brand_label: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub post_link: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sentiment: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub upload_batch_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub original_row_index: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl MetaDb {
    /// Append one raw row, returning its source_id
    pub async fn insert_raw(&self, record: &NewRawRecord) -> Result<i64> {
        let pool = self.pool();
        let mut conn = pool.acquire().await?;
        let id = insert_raw_on(&mut conn, record).await?;
        Ok(id)
    }

    /// Append raw rows in one transaction
    pub async fn insert_raw_batch(&self, records: &[NewRawRecord]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        for record in records {
            insert_raw_on(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.len() as u64)
    }

    /// Fetch unprocessed raw rows in ascending source_id order
    pub async fn fetch_unprocessed_raw(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query_as::<_, RawRecord>(
            "SELECT * FROM raw_records WHERE processed = 0 ORDER BY source_id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool())
        .await?;
        Ok(rows)
    }

    /// Flag raw rows as examined
    pub async fn mark_raw_processed(&self, source_ids: &[i64]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut updated = 0;
        for id in source_ids {
            updated += sqlx::query("UPDATE raw_records SET processed = 1 WHERE source_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// Re-open processed raw rows, optionally only for one upload batch
    pub async fn reset_raw_processed(&self, upload_batch_id: Option<&str>) -> Result<u64> {
        let result = match upload_batch_id {
            Some(batch) => {
                sqlx::query(
                    "UPDATE raw_records SET processed = 0 WHERE processed = 1 AND upload_batch_id = ?",
                )
                .bind(batch)
                .execute(&self.pool())
                .await?
            }
            None => {
                sqlx::query("UPDATE raw_records SET processed = 0 WHERE processed = 1")
                    .execute(&self.pool())
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    /// Get one raw row
    pub async fn get_raw(&self, source_id: i64) -> Result<Option<RawRecord>> {
        let row = sqlx::query_as::<_, RawRecord>("SELECT * FROM raw_records WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool())
            .await?;
        Ok(row)
    }

    pub async fn count_raw(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM raw_records")
            .fetch_one(&self.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_unprocessed_raw(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM raw_records WHERE processed = 0")
            .fetch_one(&self.pool())
            .await?;
        Ok(count)
    }
}

async fn insert_raw_on(
    conn: &mut sqlx::SqliteConnection,
    record: &NewRawRecord,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO raw_records (
            last_update, brand_label, author_name, channel, message_type, text, tags,
            post_link, sentiment, caption, upload_batch_id, original_row_index,
            processed, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(&record.last_update)
    .bind(&record.brand_label)
    .bind(&record.author_name)
    .bind(&record.channel)
    .bind(&record.message_type)
    .bind(&record.text)
    .bind(&record.tags)
    .bind(&record.post_link)
    .bind(&record.sentiment)
    .bind(&record.caption)
    .bind(&record.upload_batch_id)
    .bind(&record.original_row_index)
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}
