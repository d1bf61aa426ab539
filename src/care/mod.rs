//! 育儿领域：宝宝档案、护理事件、日统计，以及它们的存储与图表渲染
//!
//! 存储与渲染都是 trait（ProfileStore / CareLogStore / ChartRenderer），默认实现为本地 JSON 文件与 SVG。

pub mod chart;
pub mod log_store;
pub mod profile_store;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chart::{ChartError, ChartImage, ChartRenderer, SvgBarChart};
pub use log_store::JsonCareLogStore;
pub use profile_store::JsonProfileStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FeedingType {
    Breast,
    Bottle,
    Mixed,
}

/// 宝宝档案（单条记录，整体覆盖写入）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BabyProfile {
    pub parent_name: String,
    pub baby_name: String,
    /// ISO-8601 日期，如 2024-08-01
    pub date_of_birth: NaiveDate,
    pub feeding_type: FeedingType,
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Feed,
    Nap,
    Diaper,
}

/// 一条护理事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CareEvent {
    pub event_type: EventType,
    /// ISO-8601 日期时间，如 2025-11-19T07:10:00
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_ml: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CareEvent {
    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.timestamp)
    }
}

/// 宽松解析时间戳：RFC 3339（取本地时刻）、无时区的日期时间、或纯日期（视为当天 00:00）
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self) -> Result<Option<BabyProfile>, StoreError>;
    async fn set(&self, profile: &BabyProfile) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CareLogStore: Send + Sync {
    async fn append(&self, event: &CareEvent) -> Result<(), StoreError>;

    /// 时间戳日历日期等于 day 的事件（按存储顺序）；day 无法解析时返回空
    async fn query_by_day(&self, day: &str) -> Result<Vec<CareEvent>, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FeedStats {
    pub count: u32,
    pub total_volume_ml: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NapStats {
    pub count: u32,
    pub total_minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DiaperStats {
    pub count: u32,
}

/// 一天的汇总统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DayStats {
    pub feeds: FeedStats,
    pub naps: NapStats,
    pub diapers: DiaperStats,
    pub first_event_time: Option<String>,
    pub last_event_time: Option<String>,
}

pub fn compute_day_stats(events: &[CareEvent]) -> DayStats {
    let mut stats = DayStats::default();
    for e in events {
        match e.event_type {
            EventType::Feed => {
                stats.feeds.count = stats.feeds.count.saturating_add(1);
                stats.feeds.total_volume_ml =
                    stats.feeds.total_volume_ml.saturating_add(e.volume_ml.unwrap_or(0));
            }
            EventType::Nap => {
                stats.naps.count = stats.naps.count.saturating_add(1);
                stats.naps.total_minutes =
                    stats.naps.total_minutes.saturating_add(e.duration_minutes.unwrap_or(0));
            }
            EventType::Diaper => stats.diapers.count = stats.diapers.count.saturating_add(1),
        }
    }
    let mut times: Vec<NaiveDateTime> = events.iter().filter_map(CareEvent::parsed_timestamp).collect();
    times.sort();
    stats.first_event_time = times.first().map(|t| t.format("%H:%M").to_string());
    stats.last_event_time = times.last().map(|t| t.format("%H:%M").to_string());
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventType, ts: &str, volume: Option<u32>, minutes: Option<u32>) -> CareEvent {
        CareEvent {
            event_type: kind,
            timestamp: ts.to_string(),
            volume_ml: volume,
            duration_minutes: minutes,
            notes: None,
        }
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = NaiveDate::from_ymd_opt(2025, 11, 19)
            .unwrap()
            .and_hms_opt(7, 10, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2025-11-19T07:10:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-11-19T07:10"), Some(expected));
        assert_eq!(parse_timestamp("2025-11-19 07:10:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-11-19T07:10:00+01:00"), Some(expected));
        assert!(parse_timestamp("2025-11-19").is_some());
        assert!(parse_timestamp("yesterday morning").is_none());
    }

    #[test]
    fn test_compute_day_stats() {
        let events = vec![
            event(EventType::Feed, "2025-11-19T07:10:00", Some(90), None),
            event(EventType::Nap, "2025-11-19T09:00:00", None, Some(45)),
            event(EventType::Feed, "2025-11-19T06:00:00", Some(120), None),
            event(EventType::Diaper, "2025-11-19T10:30:00", None, None),
        ];
        let stats = compute_day_stats(&events);
        assert_eq!(stats.feeds, FeedStats { count: 2, total_volume_ml: 210 });
        assert_eq!(stats.naps, NapStats { count: 1, total_minutes: 45 });
        assert_eq!(stats.diapers.count, 1);
        assert_eq!(stats.first_event_time.as_deref(), Some("06:00"));
        assert_eq!(stats.last_event_time.as_deref(), Some("10:30"));
    }

    #[test]
    fn test_day_totals_saturate_instead_of_overflowing() {
        let events = vec![
            event(EventType::Feed, "2025-11-19T07:10:00", Some(u32::MAX), None),
            event(EventType::Feed, "2025-11-19T08:10:00", Some(1), None),
            event(EventType::Nap, "2025-11-19T09:00:00", None, Some(u32::MAX)),
            event(EventType::Nap, "2025-11-19T11:00:00", None, Some(30)),
        ];
        let stats = compute_day_stats(&events);
        assert_eq!(stats.feeds, FeedStats { count: 2, total_volume_ml: u32::MAX });
        assert_eq!(stats.naps, NapStats { count: 2, total_minutes: u32::MAX });
    }

    #[test]
    fn test_empty_day_stats_are_zero() {
        assert_eq!(compute_day_stats(&[]), DayStats::default());
    }

    #[test]
    fn test_profile_serializes_iso_date_and_lowercase_feeding() {
        let profile = BabyProfile {
            parent_name: "Stephen".to_string(),
            baby_name: "Leo".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            feeding_type: FeedingType::Bottle,
            country: "UK".to_string(),
        };
        let v = serde_json::to_value(&profile).unwrap();
        assert_eq!(v["date_of_birth"], "2024-08-01");
        assert_eq!(v["feeding_type"], "bottle");
    }
}
