//! Enriched record repository

use super::{CanonicalRecord, MetaDb, ValueCount};
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A fully classified record as served to analytics
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub enriched_id: i64,
    pub canonical_id: i64,
    pub source_id: i64,
    pub last_update: String,
    pub brand_label: String,
    pub author_name: String,
    pub channel: String,
    pub message_type: String,
    pub text: String,
    pub tags: String,
    pub post_link: String,
    pub sentiment: String,
    pub caption: String,
    pub upload_batch_id: String,
    pub original_row_index: i64,
    pub dedupe_date: String,
    pub dedupe_key: String,
    pub source_count: i64,
    pub ai_sentiment: Option<String>,
    pub ai_confidence: Option<f64>,
    pub ai_processed_at: Option<String>,
    pub ai_processing_status: String,
    pub extreme_negative_processing_status: String,
    pub extremely_negative: bool,
    pub ai_analysis_batch_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl MetaDb {
    /// Canonical records with both stages completed and no enriched copy yet
    pub async fn fetch_promotion_candidates(&self, limit: usize) -> Result<Vec<CanonicalRecord>> {
        let records = sqlx::query_as::<_, CanonicalRecord>(
            r#"
            SELECT c.* FROM canonical_records c
            LEFT JOIN enriched_records e ON e.canonical_id = c.canonical_id
            WHERE c.ai_processing_status = 'completed'
              AND c.extreme_negative_processing_status = 'completed'
              AND e.canonical_id IS NULL
            ORDER BY c.canonical_id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool())
        .await?;
        Ok(records)
    }

    pub async fn count_pending_promotion(&self) -> Result<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM canonical_records c
            LEFT JOIN enriched_records e ON e.canonical_id = c.canonical_id
            WHERE c.ai_processing_status = 'completed'
              AND c.extreme_negative_processing_status = 'completed'
              AND e.canonical_id IS NULL
            "#,
        )
        .fetch_one(&self.pool())
        .await?;
        Ok(count)
    }

    /// Copy a canonical record into the enriched table unless it is already there.
    ///
    /// Returns `true` when a row was written.
    pub async fn insert_enriched_if_absent(
        &self,
        record: &CanonicalRecord,
        batch_id: &str,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO enriched_records (
                canonical_id, source_id, last_update, brand_label, author_name, channel,
                message_type, text, tags, post_link, sentiment, caption, upload_batch_id,
                original_row_index, dedupe_date, dedupe_key, source_count,
                ai_sentiment, ai_confidence, ai_processed_at, ai_processing_status,
                extreme_negative_processing_status, extremely_negative,
                ai_analysis_batch_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.canonical_id)
        .bind(record.source_id)
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
        .bind(record.original_row_index)
        .bind(&record.dedupe_date)
        .bind(&record.dedupe_key)
        .bind(record.source_count)
        .bind(&record.ai_sentiment)
        .bind(record.ai_confidence)
        .bind(&record.ai_processed_at)
        .bind(&record.ai_processing_status)
        .bind(&record.extreme_negative_processing_status)
        .bind(record.extremely_negative.unwrap_or(false))
        .bind(batch_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_enriched(&self, canonical_id: i64) -> Result<Option<EnrichedRecord>> {
        let record = sqlx::query_as::<_, EnrichedRecord>(
            "SELECT * FROM enriched_records WHERE canonical_id = ?",
        )
        .bind(canonical_id)
        .fetch_optional(&self.pool())
        .await?;
        Ok(record)
    }

    pub async fn count_enriched(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM enriched_records")
            .fetch_one(&self.pool())
            .await?;
        Ok(count)
    }

    /// Enriched records per sentiment label
    pub async fn sentiment_distribution(&self) -> Result<Vec<ValueCount>> {
        let counts = sqlx::query_as::<_, ValueCount>(
            r#"
            SELECT ai_sentiment AS value, COUNT(*) AS count
            FROM enriched_records
            GROUP BY ai_sentiment
            ORDER BY ai_sentiment
            "#,
        )
        .fetch_all(&self.pool())
        .await?;
        Ok(counts)
    }

    /// Negative enriched records split by the extreme flag
    pub async fn extreme_distribution(&self) -> Result<Vec<ValueCount>> {
        let counts = sqlx::query_as::<_, ValueCount>(
            r#"
            SELECT CASE extremely_negative WHEN 1 THEN 'extreme' ELSE 'not_extreme' END AS value,
                   COUNT(*) AS count
            FROM enriched_records
            WHERE ai_sentiment = 'negative'
            GROUP BY value
            ORDER BY value
            "#,
        )
        .fetch_all(&self.pool())
        .await?;
        Ok(counts)
    }
}
