//! add_field 필터
//!
//! `key`에 `value`를 설정합니다. 문자열 값은 `%{field}` 템플릿으로 확장됩니다.
//! `overwrite`가 false(기본)면 이미 있는 필드는 건드리지 않습니다.

use serde::Deserialize;
use serde_json::Value;

use logferry_core::config::PluginConfig;
use logferry_core::error::{ConfigError, LogferryError};
use logferry_core::event::LogEvent;
use logferry_core::plugin::Filter;

/// add_field 필터 설정
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AddFieldConfig {
    /// 대상 필드 (dot notation)
    pub key: String,
    /// 설정할 값
    pub value: Value,
    /// 기존 값 덮어쓰기
    pub overwrite: bool,
}

/// add_field 필터
#[derive(Debug, Clone)]
pub struct AddFieldFilter {
    config: AddFieldConfig,
}

impl AddFieldFilter {
    pub fn new(config: AddFieldConfig) -> Result<Self, LogferryError> {
        if config.key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "key".to_owned(),
                reason: "add_field requires a key".to_owned(),
            }
            .into());
        }
        Ok(Self { config })
    }

    pub fn from_config(raw: &PluginConfig) -> Result<Self, LogferryError> {
        Self::new(raw.decode()?)
    }
}

impl Filter for AddFieldFilter {
    fn name(&self) -> &str {
        "add_field"
    }

    async fn filter(&mut self, mut event: LogEvent) -> Result<Vec<LogEvent>, LogferryError> {
        if !self.config.overwrite && event.get(&self.config.key).is_some() {
            return Ok(vec![event]);
        }

        let value = match &self.config.value {
            Value::String(template) => Value::String(event.format(template)),
            other => other.clone(),
        };
        event.set(&self.config.key, value);
        Ok(vec![event])
    }
}
