//! 护理事件日志 JSON 文件存储（只追加）
//!
//! 文件为 JSON 数组，不存在时创建为 `[]`；内容不是数组时视为空日志。
//! 按日查询时跳过无法反序列化或时间戳无法解析的记录，不报错。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::care::profile_store::write_atomic;
use crate::care::{CareEvent, CareLogStore, StoreError};

pub struct JsonCareLogStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonCareLogStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, "[]").await?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_raw(&self) -> Result<Vec<Value>, StoreError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(_) => Ok(Vec::new()),
            Err(e) if raw.trim().is_empty() => {
                tracing::debug!(error = %e, "care log file empty");
                Ok(Vec::new())
            }
            Err(e) => Err(StoreError::Json(e)),
        }
    }
}

#[async_trait]
impl CareLogStore for JsonCareLogStore {
    async fn append(&self, event: &CareEvent) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load_raw().await?;
        items.push(serde_json::to_value(event)?);
        let body = serde_json::to_string_pretty(&items)?;
        write_atomic(&self.path, body.as_bytes()).await?;
        tracing::info!(event_type = ?event.event_type, timestamp = %event.timestamp, "care event appended");
        Ok(())
    }

    async fn query_by_day(&self, day: &str) -> Result<Vec<CareEvent>, StoreError> {
        let Ok(day) = NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d") else {
            tracing::debug!(day = %day, "unparseable query date, returning no events");
            return Ok(Vec::new());
        };
        let _guard = self.lock.lock().await;
        let items = self.load_raw().await?;
        Ok(items
            .into_iter()
            .filter_map(|v| serde_json::from_value::<CareEvent>(v).ok())
            .filter(|e| e.parsed_timestamp().map(|t| t.date()) == Some(day))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::EventType;

    fn feed(ts: &str, volume: u32) -> CareEvent {
        CareEvent {
            event_type: EventType::Feed,
            timestamp: ts.to_string(),
            volume_ml: Some(volume),
            duration_minutes: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_query_by_day_matches_calendar_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCareLogStore::open(dir.path().join("care_log.json")).await.unwrap();
        store.append(&feed("2025-11-19T07:10:00", 90)).await.unwrap();
        store.append(&feed("2025-11-20T01:00:00", 60)).await.unwrap();

        let day = store.query_by_day("2025-11-19").await.unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].volume_ml, Some(90));
        assert_eq!(store.query_by_day("2025-11-20").await.unwrap().len(), 1);
        assert!(store.query_by_day("2025-11-18").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_query_date_and_bad_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("care_log.json");
        std::fs::write(
            &path,
            r#"[
                {"event_type": "feed", "timestamp": "not a time", "volume_ml": 50},
                {"event_type": "bath", "timestamp": "2025-11-19T08:00:00"},
                {"event_type": "diaper", "timestamp": "2025-11-19T08:30:00"}
            ]"#,
        )
        .unwrap();
        let store = JsonCareLogStore::open(&path).await.unwrap();

        assert!(store.query_by_day("19/11/2025").await.unwrap().is_empty());
        let day = store.query_by_day("2025-11-19").await.unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].event_type, EventType::Diaper);
    }

    #[tokio::test]
    async fn test_non_array_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("care_log.json");
        std::fs::write(&path, r#"{"oops": true}"#).unwrap();
        let store = JsonCareLogStore::open(&path).await.unwrap();
        assert!(store.query_by_day("2025-11-19").await.unwrap().is_empty());

        store.append(&feed("2025-11-19T07:10:00", 90)).await.unwrap();
        assert_eq!(store.query_by_day("2025-11-19").await.unwrap().len(), 1);
    }
}
