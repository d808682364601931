//! Raw row cleaning, validation and in-batch deduplication
//!
//! This module is pure: it turns a batch of [`RawRecord`]s into the
//! canonical records that should be inserted, plus the counters that
//! explain what was dropped. Storage is handled by the transform command.

mod key;

pub use key::*;

use crate::meta::{NewCanonicalRecord, RawRecord};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// Storage format of `last_update`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage format of `dedupe_date`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const NULL_MARKERS: [&str; 3] = ["nan", "none", "null"];

fn year_first_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})(?:\s+(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?)?$")
                .ok()
        })
        .as_ref()
}

fn year_last_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(\d{1,2})[-/](\d{1,2})[-/](\d{4})(?:\s+(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?)?$")
                .ok()
        })
        .as_ref()
}

/// Trim a text field; missing values and null markers become empty
pub fn clean_field(value: Option<&str>) -> String {
    let trimmed = value.unwrap_or_default().trim();
    if NULL_MARKERS
        .iter()
        .any(|marker| trimmed.eq_ignore_ascii_case(marker))
    {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Coerce the source row index to an integer, defaulting to 0
pub fn coerce_row_index(value: Option<&str>) -> i64 {
    let trimmed = value.unwrap_or_default().trim();
    if let Ok(index) = trimmed.parse::<i64>() {
        return index;
    }
    match trimmed.parse::<f64>() {
        Ok(index) if index.is_finite() => index.trunc() as i64,
        _ => 0,
    }
}

/// Parse a timestamp against the strict allow-list.
///
/// Accepted shapes are `YYYY-M-D`, `M-D-YYYY` (either separator `-` or `/`),
/// each optionally followed by `H:M` or `H:M:S`. Year-last dates are read
/// month-first and fall back to day-first only when month-first is not a
/// calendar date. Everything else, including fractional clock readings such
/// as `15:22.1`, is rejected.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(caps) = year_first_pattern().and_then(|re| re.captures(value)) {
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let month: u32 = caps.get(2)?.as_str().parse().ok()?;
        let day: u32 = caps.get(3)?.as_str().parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        return with_time(date, &caps);
    }

    if let Some(caps) = year_last_pattern().and_then(|re| re.captures(value)) {
        let first: u32 = caps.get(1)?.as_str().parse().ok()?;
        let second: u32 = caps.get(2)?.as_str().parse().ok()?;
        let year: i32 = caps.get(3)?.as_str().parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, first, second)
            .or_else(|| NaiveDate::from_ymd_opt(year, second, first))?;
        return with_time(date, &caps);
    }

    None
}

fn with_time(date: NaiveDate, caps: &regex::Captures<'_>) -> Option<NaiveDateTime> {
    let component = |idx: usize| -> Option<u32> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    date.and_hms_opt(component(4)?, component(5)?, component(6)?)
}

/// A raw row that passed cleaning and validation
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord {
    pub source_id: i64,
    pub last_update: NaiveDateTime,
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
}

impl CleanRecord {
    pub fn dedupe_date(&self) -> String {
        self.last_update.date().format(DATE_FORMAT).to_string()
    }
}

/// Why a raw row was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// text, author or channel empty after cleaning
    EmptyRequiredField,
    /// timestamp missing or outside the allow-list
    InvalidTimestamp,
}

/// Clean one raw row and check required fields, then the timestamp
pub fn clean_record(raw: &RawRecord) -> Result<CleanRecord, Rejection> {
    let text = clean_field(raw.text.as_deref());
    let author_name = clean_field(raw.author_name.as_deref());
    let channel = clean_field(raw.channel.as_deref());

    if text.is_empty() || author_name.is_empty() || channel.is_empty() {
        return Err(Rejection::EmptyRequiredField);
    }

    let last_update = raw
        .last_update
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or(Rejection::InvalidTimestamp)?;

    Ok(CleanRecord {
        source_id: raw.source_id,
        last_update,
        brand_label: clean_field(raw.brand_label.as_deref()),
        author_name,
        channel,
        message_type: clean_field(raw.message_type.as_deref()),
        text,
        tags: clean_field(raw.tags.as_deref()),
        post_link: clean_field(raw.post_link.as_deref()),
        sentiment: clean_field(raw.sentiment.as_deref()),
        caption: clean_field(raw.caption.as_deref()),
        upload_batch_id: clean_field(raw.upload_batch_id.as_deref()),
        original_row_index: coerce_row_index(raw.original_row_index.as_deref()),
    })
}

/// Result of planning a transform batch
#[derive(Debug, Clone, Default)]
pub struct TransformPlan {
    /// One record per group, ordered by source_id
    pub records: Vec<NewCanonicalRecord>,
    pub read: usize,
    pub validated: usize,
    pub deduped: usize,
    pub filtered_empty_text: usize,
    pub filtered_invalid_timestamp: usize,
}

type GroupKey = (String, String, String, String, String);

struct Group {
    winner: CleanRecord,
    size: usize,
}

/// Clean, validate and collapse a batch of raw rows.
///
/// Rows are grouped on (date, brand, author, channel, full text). Within a
/// group the latest timestamp wins; equal timestamps go to the lowest
/// source_id.
pub fn plan_transform(raws: &[RawRecord]) -> TransformPlan {
    let mut plan = TransformPlan {
        read: raws.len(),
        ..Default::default()
    };
    let mut groups: BTreeMap<GroupKey, Group> = BTreeMap::new();

    for raw in raws {
        let clean = match clean_record(raw) {
            Ok(clean) => clean,
            Err(Rejection::EmptyRequiredField) => {
                debug!(source_id = raw.source_id, "Dropping row with empty required field");
                plan.filtered_empty_text += 1;
                continue;
            }
            Err(Rejection::InvalidTimestamp) => {
                debug!(
                    source_id = raw.source_id,
                    last_update = ?raw.last_update,
                    "Dropping row with invalid timestamp"
                );
                plan.filtered_invalid_timestamp += 1;
                continue;
            }
        };
        plan.validated += 1;

        let key = (
            clean.dedupe_date(),
            clean.brand_label.clone(),
            clean.author_name.clone(),
            clean.channel.clone(),
            clean.text.clone(),
        );

        match groups.get_mut(&key) {
            Some(group) => {
                group.size += 1;
                let newer = clean.last_update > group.winner.last_update;
                let tie_lower_id = clean.last_update == group.winner.last_update
                    && clean.source_id < group.winner.source_id;
                if newer || tie_lower_id {
                    group.winner = clean;
                }
            }
            None => {
                groups.insert(key, Group { winner: clean, size: 1 });
            }
        }
    }

    plan.deduped = plan.validated - groups.len();

    let mut records: Vec<NewCanonicalRecord> = groups
        .into_values()
        .map(|group| to_canonical(group.winner, group.size))
        .collect();
    records.sort_by_key(|r| r.source_id);
    plan.records = records;
    plan
}

fn to_canonical(clean: CleanRecord, size: usize) -> NewCanonicalRecord {
    let dedupe_date = clean.dedupe_date();
    let dedupe_key = dedupe_key(
        &dedupe_date,
        &clean.brand_label,
        &clean.author_name,
        &clean.channel,
        &clean.text,
    );
    NewCanonicalRecord {
        source_id: clean.source_id,
        last_update: clean.last_update.format(TIMESTAMP_FORMAT).to_string(),
        brand_label: clean.brand_label,
        author_name: clean.author_name,
        channel: clean.channel,
        message_type: clean.message_type,
        text: clean.text,
        tags: clean.tags,
        post_link: clean.post_link,
        sentiment: clean.sentiment,
        caption: clean.caption,
        upload_batch_id: clean.upload_batch_id,
        original_row_index: clean.original_row_index,
        dedupe_date,
        dedupe_key,
        source_count: size as i64,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::raw_row;
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn test_allow_list_accepts() {
        assert_eq!(parse_timestamp("2024-01-05 12:34:56"), Some(ts("2024-01-05 12:34:56")));
        assert_eq!(parse_timestamp("2024/1/5 9:03"), Some(ts("2024-01-05 09:03:00")));
        assert_eq!(parse_timestamp(" 2024-01-05 "), Some(ts("2024-01-05 00:00:00")));
        assert_eq!(parse_timestamp("01/05/2024 12:00:01"), Some(ts("2024-01-05 12:00:01")));
        assert_eq!(parse_timestamp("1-5-2024"), Some(ts("2024-01-05 00:00:00")));
    }

    #[test]
    fn test_year_last_falls_back_to_day_first() {
        assert_eq!(parse_timestamp("25/12/2024"), Some(ts("2024-12-25 00:00:00")));
        assert_eq!(parse_timestamp("12/25/2024 08:00"), Some(ts("2024-12-25 08:00:00")));
    }

    #[test]
    fn test_allow_list_rejects() {
        for bad in [
            "15:22.1",
            "03:13.6",
            "15:22",
            "25.10.9",
            "2024-01-05T12:00:00",
            "2024-02-30",
            "2024-01-05 25:00",
            "13/13/2024",
            "yesterday",
            "",
            "nan",
        ] {
            assert_eq!(parse_timestamp(bad), None, "{bad} should be rejected");
        }
    }

    #[test]
    fn test_clean_field_and_index() {
        assert_eq!(clean_field(Some("  hi  ")), "hi");
        assert_eq!(clean_field(Some("NaN")), "");
        assert_eq!(clean_field(Some(" None")), "");
        assert_eq!(clean_field(Some("null")), "");
        assert_eq!(clean_field(None), "");
        assert_eq!(coerce_row_index(Some(" 42 ")), 42);
        assert_eq!(coerce_row_index(Some("7.0")), 7);
        assert_eq!(coerce_row_index(Some("abc")), 0);
        assert_eq!(coerce_row_index(None), 0);
    }

    #[test]
    fn test_empty_required_field_wins_over_bad_timestamp() {
        let mut row = raw_row(1, "15:22.1", "alice", "hello");
        row.channel = Some("nan".to_string());
        assert_eq!(clean_record(&row), Err(Rejection::EmptyRequiredField));

        let row = raw_row(2, "15:22.1", "alice", "hello");
        assert_eq!(clean_record(&row), Err(Rejection::InvalidTimestamp));
    }

    #[test]
    fn test_latest_timestamp_wins() {
        let raws = vec![
            raw_row(1, "2024-05-01 08:00:00", "alice", "same words"),
            raw_row(2, "2024-05-01 18:00:00", "alice", "same words"),
            raw_row(3, "2024-05-01 12:00:00", "alice", "same words"),
        ];
        let plan = plan_transform(&raws);

        assert_eq!(plan.validated, 3);
        assert_eq!(plan.deduped, 2);
        assert_eq!(plan.records.len(), 1);
        let record = &plan.records[0];
        assert_eq!(record.source_id, 2);
        assert_eq!(record.last_update, "2024-05-01 18:00:00");
        assert_eq!(record.post_link, "https://example.com/p/2");
        assert_eq!(record.source_count, 3);
        assert_eq!(record.dedupe_date, "2024-05-01");
    }

    #[test]
    fn test_equal_timestamps_keep_lowest_source_id() {
        let raws = vec![
            raw_row(9, "2024-05-01 08:00:00", "alice", "tie"),
            raw_row(4, "2024-05-01 08:00:00", "alice", "tie"),
        ];
        let plan = plan_transform(&raws);
        assert_eq!(plan.records.len(), 1);
        assert_eq!(plan.records[0].source_id, 4);
    }

    #[test]
    fn test_different_days_are_different_groups() {
        let raws = vec![
            raw_row(1, "2024-05-01 08:00:00", "alice", "daily"),
            raw_row(2, "2024-05-02 08:00:00", "alice", "daily"),
            raw_row(3, "2024-05-02 09:00:00", "bob", "daily"),
        ];
        let plan = plan_transform(&raws);
        assert_eq!(plan.deduped, 0);
        let ids: Vec<i64> = plan.records.iter().map(|r| r.source_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_counters_for_mixed_batch() {
        let mut empty = raw_row(3, "2024-05-01 10:00:00", "carol", "");
        empty.text = Some("   ".to_string());
        let raws = vec![
            raw_row(1, "2024-05-01 10:00:00", "alice", "dup"),
            raw_row(2, "2024-05-01 11:00:00", "alice", "dup"),
            empty,
            raw_row(4, "15:22.1", "dave", "bad time"),
            raw_row(5, "2024-05-01 10:00:00", "erin", "fine"),
        ];
        let plan = plan_transform(&raws);
        assert_eq!(plan.read, 5);
        assert_eq!(plan.filtered_empty_text, 1);
        assert_eq!(plan.filtered_invalid_timestamp, 1);
        assert_eq!(plan.validated, 3);
        assert_eq!(plan.deduped, 1);
        assert_eq!(plan.records.len(), 2);
        assert_eq!(plan.records[0].original_row_index, 2);
    }
}
