//! Raw log-record payloads → typed [`ArticleEvent`]s.
//!
//! A payload is a JSON article document. Decoding validates the fields the
//! pipeline depends on (author, parseable publish date) and derives the
//! aggregated measure (content word count). Malformed payloads are reported
//! as errors for the caller to drop and count; they never halt ingestion.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

use crate::types::{ArticleEvent, EventTime, SourceRecord};

/// The subset of the article document the pipeline consumes. Remaining
/// fields (article_id, title) ride along in the payload and are ignored.
#[derive(Debug, Deserialize)]
struct ArticlePayload {
    author: String,
    publish_date: String,
    #[serde(default)]
    content: String,
}

/// Decode one raw record into an event.
///
/// Rejects payloads that are not valid JSON, have a blank author, or carry
/// an unparseable publish date. An unparseable date is an error, never a
/// silently zeroed timestamp.
pub fn decode(record: &SourceRecord) -> Result<ArticleEvent> {
    let article: ArticlePayload = serde_json::from_slice(&record.payload)
        .context("payload is not a valid article document")?;

    if article.author.trim().is_empty() {
        bail!("article has no author");
    }

    let event_time = parse_event_time(&article.publish_date)
        .with_context(|| format!("unparseable publish_date {:?}", article.publish_date))?;

    Ok(ArticleEvent {
        group_key: article.author,
        event_time,
        value: word_count(&article.content) as f64,
    })
}

/// Parse an article publish date into epoch milliseconds.
///
/// Accepts RFC 3339 and the timezone-less ISO-8601 form the upstream
/// producer emits (`2024-03-05T12:34:56.789`), which is taken as UTC.
pub fn parse_event_time(raw: &str) -> Result<EventTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.timestamp_millis());
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .context("not RFC 3339 or naive ISO-8601")?;
    Ok(naive.and_utc().timestamp_millis())
}

fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &str) -> SourceRecord {
        SourceRecord {
            payload: payload.as_bytes().to_vec(),
            partition: 0,
            offset: 0,
            arrival_time: 0,
        }
    }

    #[test]
    fn test_decode_valid_article() {
        let event = decode(&record(
            r#"{"article_id":"a1","title":"On Streams","author":"Ada Lovelace",
               "publish_date":"2024-01-01T00:02:00","content":"one two three four"}"#,
        ))
        .unwrap();
        assert_eq!(event.group_key, "Ada Lovelace");
        assert_eq!(event.value, 4.0);
        assert_eq!(event.event_time, 1_704_067_320_000);
    }

    #[test]
    fn test_decode_rfc3339_with_timezone() {
        let event = decode(&record(
            r#"{"author":"A","publish_date":"2024-01-01T00:00:00+01:00","content":"x"}"#,
        ))
        .unwrap();
        // +01:00 means one hour before midnight UTC.
        assert_eq!(event.event_time, 1_704_067_200_000 - 3_600_000);
    }

    #[test]
    fn test_decode_rejects_unparseable_date() {
        let err = decode(&record(
            r#"{"author":"A","publish_date":"yesterday-ish","content":"x"}"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("unparseable publish_date"));
    }

    #[test]
    fn test_decode_rejects_missing_author() {
        assert!(decode(&record(r#"{"publish_date":"2024-01-01T00:00:00"}"#)).is_err());
        assert!(decode(&record(
            r#"{"author":"   ","publish_date":"2024-01-01T00:00:00"}"#
        ))
        .is_err());
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(decode(&record("not json at all")).is_err());
    }

    #[test]
    fn test_word_count_splits_on_any_whitespace() {
        assert_eq!(word_count("a  b\tc\nd"), 4);
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("   "), 0);
    }
}
