//! json 필터
//!
//! 문자열 필드(기본 `message`)를 JSON 객체로 파싱합니다.
//! `target`이 없으면 최상위에 병합하며, 이때 `message`/`@timestamp`/`tags`는
//! JSON 코덱과 같은 규칙으로 전용 필드에 반영됩니다.
//! `target`이 있으면 객체 전체를 그 경로에 둡니다.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use logferry_core::config::PluginConfig;
use logferry_core::error::LogferryError;
use logferry_core::event::{FIELD_MESSAGE, FIELD_TAGS, FIELD_TIMESTAMP, LogEvent, UNPROMOTED_PREFIX};
use logferry_core::plugin::Filter;

use super::JSON_FILTER_ERROR_TAG;
use crate::codec::json::parse_object;

/// json 필터 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JsonFilterConfig {
    /// 파싱할 필드
    pub source: String,
    /// 결과를 둘 경로 (없으면 최상위 병합)
    pub target: Option<String>,
}

impl Default for JsonFilterConfig {
    fn default() -> Self {
        Self {
            source: FIELD_MESSAGE.to_owned(),
            target: None,
        }
    }
}

/// json 필터
#[derive(Debug, Clone)]
pub struct JsonFilter {
    config: JsonFilterConfig,
}

impl JsonFilter {
    pub fn new(config: JsonFilterConfig) -> Self {
        Self { config }
    }

    pub fn from_config(raw: &PluginConfig) -> Result<Self, LogferryError> {
        Ok(Self::new(raw.decode()?))
    }

    fn source_text(&self, event: &LogEvent) -> Option<String> {
        if self.config.source == FIELD_MESSAGE {
            return Some(event.message.clone());
        }
        match event.get(&self.config.source)? {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

fn merge_top_level(event: &mut LogEvent, object: serde_json::Map<String, Value>) {
    for (key, value) in object {
        match (key.as_str(), value) {
            (FIELD_MESSAGE, Value::String(message)) => event.message = message,
            (FIELD_TIMESTAMP, Value::String(raw)) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(ts) => event.timestamp = ts.with_timezone(&Utc),
                Err(_) => {
                    event.extra.insert(unpromoted(&key), Value::String(raw));
                }
            },
            (FIELD_TAGS, Value::Array(items)) if items.iter().all(Value::is_string) => {
                for tag in items.into_iter().filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                }) {
                    event.add_tag(tag);
                }
            }
            (FIELD_MESSAGE | FIELD_TIMESTAMP | FIELD_TAGS, value) => {
                event.extra.insert(unpromoted(&key), value);
            }
            (_, value) => {
                event.extra.insert(key, value);
            }
        }
    }
}

fn unpromoted(key: &str) -> String {
    format!("{UNPROMOTED_PREFIX}{key}")
}

impl Filter for JsonFilter {
    fn name(&self) -> &str {
        "json"
    }

    async fn filter(&mut self, mut event: LogEvent) -> Result<Vec<LogEvent>, LogferryError> {
        let Some(text) = self.source_text(&event) else {
            return Ok(vec![event]);
        };

        match parse_object(text.as_bytes()) {
            Ok(object) => match &self.config.target {
                Some(target) => event.set(target, Value::Object(object)),
                None => merge_top_level(&mut event, object),
            },
            Err(e) => {
                debug!(source = self.config.source.as_str(), error = %e, "json filter parse failed");
                event.add_tag(JSON_FILTER_ERROR_TAG);
            }
        }
        Ok(vec![event])
    }
}
