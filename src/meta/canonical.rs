//! Canonical record repository and status transitions

use super::{MetaDb, ProcessingStatus, ValueCount};
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A deduplicated comment together with its classification state
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CanonicalRecord {
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
    pub extremely_negative: Option<bool>,
    pub created_at: String,
    pub updated_at: String,
}

impl CanonicalRecord {
    pub fn primary_status(&self) -> Result<ProcessingStatus> {
        self.ai_processing_status.parse()
    }

    pub fn secondary_status(&self) -> Result<ProcessingStatus> {
        self.extreme_negative_processing_status.parse()
    }
}

/// A canonical record produced by the transform stage, not yet stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCanonicalRecord {
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
}

/// Rows moved back to pending by [`MetaDb::reset_stuck_and_failed`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetCounts {
    pub primary_stuck: u64,
    pub primary_failed: u64,
    pub secondary_stuck: u64,
    pub secondary_failed: u64,
}

impl MetaDb {
    // ===== Transform =====

    /// Whether a canonical record with this dedupe key exists
    pub async fn canonical_exists(&self, dedupe_key: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT canonical_id FROM canonical_records WHERE dedupe_key = ?")
                .bind(dedupe_key)
                .fetch_optional(&self.pool())
                .await?;
        Ok(found.is_some())
    }

    /// Insert a new canonical record with both statuses pending
    pub async fn insert_canonical(&self, record: &NewCanonicalRecord) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO canonical_records (
                source_id, last_update, brand_label, author_name, channel, message_type,
                text, tags, post_link, sentiment, caption, upload_batch_id,
                original_row_index, dedupe_date, dedupe_key, source_count,
                ai_processing_status, extreme_negative_processing_status,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 'pending', ?, ?)
            "#,
        )
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
        .bind(&now)
        .bind(&now)
        .execute(&self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get canonical record by ID
    pub async fn get_canonical(&self, canonical_id: i64) -> Result<Option<CanonicalRecord>> {
        let record = sqlx::query_as::<_, CanonicalRecord>(
            "SELECT * FROM canonical_records WHERE canonical_id = ?",
        )
        .bind(canonical_id)
        .fetch_optional(&self.pool())
        .await?;
        Ok(record)
    }

    /// List canonical records in ascending ID order
    pub async fn list_canonical(&self, limit: usize) -> Result<Vec<CanonicalRecord>> {
        let records = sqlx::query_as::<_, CanonicalRecord>(
            "SELECT * FROM canonical_records ORDER BY canonical_id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool())
        .await?;
        Ok(records)
    }

    // ===== Primary classification =====

    /// Reserve up to `limit` pending records by flipping them to processing.
    ///
    /// Selection and update happen in one statement, so two concurrent
    /// callers never receive the same record.
    pub async fn claim_pending_primary(&self, limit: usize) -> Result<Vec<CanonicalRecord>> {
        let mut claimed = sqlx::query_as::<_, CanonicalRecord>(
            r#"
            UPDATE canonical_records
            SET ai_processing_status = 'processing', updated_at = ?
            WHERE canonical_id IN (
                SELECT canonical_id FROM canonical_records
                WHERE ai_processing_status = 'pending'
                ORDER BY canonical_id ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool())
        .await?;
        claimed.sort_by_key(|r| r.canonical_id);
        Ok(claimed)
    }

    /// Store a successful classification
    pub async fn complete_primary(
        &self,
        canonical_id: i64,
        label: &str,
        confidence: f64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE canonical_records SET
                ai_sentiment = ?,
                ai_confidence = ?,
                ai_processed_at = ?,
                ai_processing_status = 'completed',
                updated_at = ?
            WHERE canonical_id = ?
            "#,
        )
        .bind(label)
        .bind(confidence)
        .bind(&now)
        .bind(&now)
        .bind(canonical_id)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    pub async fn fail_primary(&self, canonical_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE canonical_records SET ai_processing_status = 'failed', updated_at = ? WHERE canonical_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(canonical_id)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    /// processing -> pending for every primary status
    pub async fn reset_stuck_primary(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE canonical_records SET ai_processing_status = 'pending', updated_at = ? WHERE ai_processing_status = 'processing'",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// failed -> pending for at most `limit` records, lowest IDs first
    pub async fn retry_failed_primary(&self, limit: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE canonical_records
            SET ai_processing_status = 'pending', updated_at = ?
            WHERE canonical_id IN (
                SELECT canonical_id FROM canonical_records
                WHERE ai_processing_status = 'failed'
                ORDER BY canonical_id ASC
                LIMIT ?
            )
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(limit as i64)
        .execute(&self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// processing -> pending for claimed primary records a batch did not settle
    pub async fn release_primary(&self, canonical_ids: &[i64]) -> Result<u64> {
        self.release_claimed("ai_processing_status", canonical_ids)
            .await
    }

    // ===== Secondary classification =====

    /// Complete the secondary stage for classified non-negative records without scoring them
    pub async fn short_circuit_secondary(&self, limit: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE canonical_records
            SET extreme_negative_processing_status = 'completed',
                extremely_negative = 0,
                updated_at = ?
            WHERE canonical_id IN (
                SELECT canonical_id FROM canonical_records
                WHERE ai_processing_status = 'completed'
                  AND COALESCE(ai_sentiment, '') != 'negative'
                  AND extreme_negative_processing_status NOT IN ('completed', 'processing')
                ORDER BY canonical_id ASC
                LIMIT ?
            )
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(limit as i64)
        .execute(&self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Reserve up to `limit` negative records for extremeness scoring
    pub async fn claim_negative_secondary(&self, limit: usize) -> Result<Vec<CanonicalRecord>> {
        let mut claimed = sqlx::query_as::<_, CanonicalRecord>(
            r#"
            UPDATE canonical_records
            SET extreme_negative_processing_status = 'processing', updated_at = ?
            WHERE canonical_id IN (
                SELECT canonical_id FROM canonical_records
                WHERE ai_processing_status = 'completed'
                  AND ai_sentiment = 'negative'
                  AND extreme_negative_processing_status NOT IN ('completed', 'processing')
                ORDER BY canonical_id ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool())
        .await?;
        claimed.sort_by_key(|r| r.canonical_id);
        Ok(claimed)
    }

    pub async fn complete_secondary(&self, canonical_id: i64, extreme: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE canonical_records SET
                extreme_negative_processing_status = 'completed',
                extremely_negative = ?,
                updated_at = ?
            WHERE canonical_id = ?
            "#,
        )
        .bind(extreme)
        .bind(Utc::now().to_rfc3339())
        .bind(canonical_id)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    pub async fn fail_secondary(&self, canonical_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE canonical_records SET extreme_negative_processing_status = 'failed', updated_at = ? WHERE canonical_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(canonical_id)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    /// processing -> pending for every secondary status
    pub async fn reset_stuck_secondary(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE canonical_records
            SET extreme_negative_processing_status = 'pending', updated_at = ?
            WHERE extreme_negative_processing_status = 'processing'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// failed -> pending for at most `limit` secondary statuses
    pub async fn retry_failed_secondary(&self, limit: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE canonical_records
            SET extreme_negative_processing_status = 'pending', updated_at = ?
            WHERE canonical_id IN (
                SELECT canonical_id FROM canonical_records
                WHERE extreme_negative_processing_status = 'failed'
                ORDER BY canonical_id ASC
                LIMIT ?
            )
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(limit as i64)
        .execute(&self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// processing -> pending for claimed secondary records a batch did not settle
    pub async fn release_secondary(&self, canonical_ids: &[i64]) -> Result<u64> {
        self.release_claimed("extreme_negative_processing_status", canonical_ids)
            .await
    }

    async fn release_claimed(&self, column: &str, canonical_ids: &[i64]) -> Result<u64> {
        if canonical_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; canonical_ids.len()].join(", ");
        // Column names are fixed by the callers; values are bound.
        let sql = format!(
            "UPDATE canonical_records SET {column} = 'pending', updated_at = ? \
             WHERE {column} = 'processing' AND canonical_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(Utc::now().to_rfc3339());
        for id in canonical_ids {
            query = query.bind(*id);
        }
        Ok(query.execute(&self.pool()).await?.rows_affected())
    }

    // ===== Administration =====

    /// Move every processing or failed status back to pending, on both stages
    pub async fn reset_stuck_and_failed(&self) -> Result<ResetCounts> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool().begin().await?;
        let mut counts = ResetCounts::default();

        for (column, from, slot) in [
            ("ai_processing_status", "processing", 0usize),
            ("ai_processing_status", "failed", 1),
            ("extreme_negative_processing_status", "processing", 2),
            ("extreme_negative_processing_status", "failed", 3),
        ] {
            // Column names come from the fixed list above; values are bound.
            let sql = format!(
                "UPDATE canonical_records SET {column} = 'pending', updated_at = ? WHERE {column} = ?"
            );
            let affected = sqlx::query(&sql)
                .bind(&now)
                .bind(from)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            match slot {
                0 => counts.primary_stuck = affected,
                1 => counts.primary_failed = affected,
                2 => counts.secondary_stuck = affected,
                _ => counts.secondary_failed = affected,
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    // ===== Statistics =====

    pub async fn count_canonical(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM canonical_records")
            .fetch_one(&self.pool())
            .await?;
        Ok(count)
    }

    /// Canonical record counts grouped by primary status
    pub async fn primary_status_counts(&self) -> Result<Vec<ValueCount>> {
        let counts = sqlx::query_as::<_, ValueCount>(
            r#"
            SELECT ai_processing_status AS value, COUNT(*) AS count
            FROM canonical_records
            GROUP BY ai_processing_status
            ORDER BY ai_processing_status
            "#,
        )
        .fetch_all(&self.pool())
        .await?;
        Ok(counts)
    }

    /// Canonical record counts grouped by secondary status
    pub async fn secondary_status_counts(&self) -> Result<Vec<ValueCount>> {
        let counts = sqlx::query_as::<_, ValueCount>(
            r#"
            SELECT extreme_negative_processing_status AS value, COUNT(*) AS count
            FROM canonical_records
            GROUP BY extreme_negative_processing_status
            ORDER BY extreme_negative_processing_status
            "#,
        )
        .fetch_all(&self.pool())
        .await?;
        Ok(counts)
    }
}


#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::test_support::new_canonical;
    use super::*;

    async fn seed(db: &MetaDb, n: usize) -> Vec<i64> {
        let mut ids = Vec::new();
        for i in 0..n {
            let id = db
                .insert_canonical(&new_canonical(&format!("k{}", i), &format!("text {}", i)))
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn test_insert_and_exists() {
        let (db, _tmp) = setup_test_db().await;
        let id = db.insert_canonical(&new_canonical("k1", "hello")).await.unwrap();

        assert!(db.canonical_exists("k1").await.unwrap());
        assert!(!db.canonical_exists("k2").await.unwrap());

        let record = db.get_canonical(id).await.unwrap().unwrap();
        assert_eq!(record.primary_status().unwrap(), ProcessingStatus::Pending);
        assert_eq!(record.secondary_status().unwrap(), ProcessingStatus::Pending);
        assert_eq!(record.extremely_negative, None);

        // dedupe_key is unique at the storage level too
        assert!(db.insert_canonical(&new_canonical("k1", "other")).await.is_err());
    }

    #[tokio::test]
    async fn test_claim_is_ordered_and_exclusive() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, 5).await;

        let first = db.claim_pending_primary(3).await.unwrap();
        let first_ids: Vec<i64> = first.iter().map(|r| r.canonical_id).collect();
        assert_eq!(first_ids, ids[..3].to_vec());
        assert!(first
            .iter()
            .all(|r| r.ai_processing_status == "processing"));

        let second = db.claim_pending_primary(10).await.unwrap();
        let second_ids: Vec<i64> = second.iter().map(|r| r.canonical_id).collect();
        assert_eq!(second_ids, ids[3..].to_vec());

        assert!(db.claim_pending_primary(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_records_are_not_reclaimed_until_retried() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, 3).await;

        db.claim_pending_primary(3).await.unwrap();
        db.complete_primary(ids[0], "positive", 0.9).await.unwrap();
        db.fail_primary(ids[1]).await.unwrap();
        db.fail_primary(ids[2]).await.unwrap();

        assert!(db.claim_pending_primary(10).await.unwrap().is_empty());

        assert_eq!(db.retry_failed_primary(1).await.unwrap(), 1);
        let reclaimed = db.claim_pending_primary(10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].canonical_id, ids[1]);

        let done = db.get_canonical(ids[0]).await.unwrap().unwrap();
        assert_eq!(done.ai_sentiment.as_deref(), Some("positive"));
        assert_eq!(done.ai_confidence, Some(0.9));
        assert!(done.ai_processed_at.is_some());
    }

    #[tokio::test]
    async fn test_reset_stuck_primary() {
        let (db, _tmp) = setup_test_db().await;
        seed(&db, 2).await;
        db.claim_pending_primary(2).await.unwrap();

        assert_eq!(db.reset_stuck_primary().await.unwrap(), 2);
        assert_eq!(db.claim_pending_primary(5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_release_only_touches_listed_processing_records() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, 3).await;
        db.claim_pending_primary(3).await.unwrap();
        db.complete_primary(ids[0], "positive", 0.9).await.unwrap();

        assert_eq!(db.release_primary(&ids[..2]).await.unwrap(), 1);
        assert_eq!(db.release_primary(&[]).await.unwrap(), 0);

        let statuses: Vec<String> = {
            let mut out = Vec::new();
            for id in &ids {
                out.push(db.get_canonical(*id).await.unwrap().unwrap().ai_processing_status);
            }
            out
        };
        assert_eq!(statuses, ["completed", "pending", "processing"]);
    }

    #[tokio::test]
    async fn test_secondary_short_circuit_and_claim() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, 4).await;
        db.claim_pending_primary(4).await.unwrap();
        db.complete_primary(ids[0], "positive", 0.8).await.unwrap();
        db.complete_primary(ids[1], "negative", 0.7).await.unwrap();
        db.complete_primary(ids[2], "neutral", 0.6).await.unwrap();
        // ids[3] stays in primary processing and must not be touched

        assert_eq!(db.short_circuit_secondary(10).await.unwrap(), 2);
        let positive = db.get_canonical(ids[0]).await.unwrap().unwrap();
        assert_eq!(positive.extreme_negative_processing_status, "completed");
        assert_eq!(positive.extremely_negative, Some(false));

        let claimed = db.claim_negative_secondary(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].canonical_id, ids[1]);
        assert!(db.claim_negative_secondary(10).await.unwrap().is_empty());

        db.complete_secondary(ids[1], true).await.unwrap();
        let negative = db.get_canonical(ids[1]).await.unwrap().unwrap();
        assert_eq!(negative.extremely_negative, Some(true));

        let untouched = db.get_canonical(ids[3]).await.unwrap().unwrap();
        assert_eq!(untouched.extreme_negative_processing_status, "pending");
    }

    #[tokio::test]
    async fn test_reset_stuck_and_failed_counts() {
        let (db, _tmp) = setup_test_db().await;
        let ids = seed(&db, 3).await;
        db.claim_pending_primary(3).await.unwrap();
        db.fail_primary(ids[0]).await.unwrap();
        db.complete_primary(ids[1], "negative", 0.9).await.unwrap();
        db.claim_negative_secondary(5).await.unwrap();
        db.fail_secondary(ids[1]).await.unwrap();

        let counts = db.reset_stuck_and_failed().await.unwrap();
        assert_eq!(
            counts,
            ResetCounts {
                primary_stuck: 1,
                primary_failed: 1,
                secondary_stuck: 0,
                secondary_failed: 1,
            }
        );

        let statuses = db.primary_status_counts().await.unwrap();
        assert_eq!(
            statuses,
            vec![
                ValueCount { value: Some("completed".to_string()), count: 1 },
                ValueCount { value: Some("pending".to_string()), count: 2 },
            ]
        );
    }
}
