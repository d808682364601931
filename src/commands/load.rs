//! Load command implementation

use crate::error::Result;
use crate::meta::{MetaDb, NewRawRecord};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Result of appending a JSON Lines file to the raw store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub path: String,
    pub loaded: u64,
    pub blank_lines: u64,
}

/// Parse JSON Lines into raw rows; blank lines are skipped
pub fn parse_jsonl(content: &str, origin: &str) -> Result<(Vec<NewRawRecord>, u64)> {
    let mut records = Vec::new();
    let mut blank_lines = 0;

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            blank_lines += 1;
            continue;
        }
        let record: NewRawRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid raw record", origin, index + 1))?;
        records.push(record);
    }

    Ok((records, blank_lines))
}

/// Append every row of a JSON Lines file in one transaction.
///
/// A malformed line aborts the load before anything is written.
pub async fn cmd_load_raw(db: &MetaDb, path: &Path) -> Result<LoadReport> {
    let origin = path.display().to_string();
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", origin))?;

    let (records, blank_lines) = parse_jsonl(&content, &origin)?;
    let loaded = db.insert_raw_batch(&records).await?;
    info!(path = %origin, loaded, "Loaded raw records");

    Ok(LoadReport {
        path: origin,
        loaded,
        blank_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::test_support::setup_test_db;

    #[test]
    fn test_parse_reports_line_number() {
        let content = "{\"text\": \"ok\"}\n\n{not json}\n";
        let err = parse_jsonl(content, "rows.jsonl").unwrap_err();
        assert!(err.to_string().contains("rows.jsonl:3"));
    }

    #[tokio::test]
    async fn test_load_appends_rows() {
        let (db, tmp) = setup_test_db().await;
        let path = tmp.path().join("rows.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"last_update\": \"2024-05-01 09:00:00\", \"author_name\": \"alice\", \"channel\": \"weibo\", \"text\": \"hi\", \"original_row_index\": 7}\n",
                "\n",
                "{\"author_name\": \"bob\", \"text\": null}\n",
            ),
        )
        .unwrap();

        let report = cmd_load_raw(&db, &path).await.unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.blank_lines, 1);
        assert_eq!(db.count_raw().await.unwrap(), 2);

        let first = db.get_raw(1).await.unwrap().unwrap();
        assert_eq!(first.original_row_index.as_deref(), Some("7"));
        assert!(!first.processed);
    }

    #[tokio::test]
    async fn test_malformed_file_writes_nothing() {
        let (db, tmp) = setup_test_db().await;
        let path = tmp.path().join("bad.jsonl");
        std::fs::write(&path, "{\"text\": \"ok\"}\n{\"text\": }\n").unwrap();

        assert!(cmd_load_raw(&db, &path).await.is_err());
        assert_eq!(db.count_raw().await.unwrap(), 0);
    }
}
