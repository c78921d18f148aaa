//! remove_field 필터

use serde::Deserialize;

use logferry_core::config::PluginConfig;
use logferry_core::error::{ConfigError, LogferryError};
use logferry_core::event::LogEvent;
use logferry_core::plugin::Filter;

/// remove_field 필터 설정
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoveFieldConfig {
    /// 제거할 필드 목록 (dot notation)
    pub fields: Vec<String>,
    /// `message`를 빈 문자열로 비움
    pub remove_message: bool,
}

/// remove_field 필터
#[derive(Debug, Clone)]
pub struct RemoveFieldFilter {
    config: RemoveFieldConfig,
}

impl RemoveFieldFilter {
    pub fn new(config: RemoveFieldConfig) -> Result<Self, LogferryError> {
        if config.fields.is_empty() && !config.remove_message {
            return Err(ConfigError::InvalidValue {
                field: "fields".to_owned(),
                reason: "nothing to remove".to_owned(),
            }
            .into());
        }
        Ok(Self { config })
    }

    pub fn from_config(raw: &PluginConfig) -> Result<Self, LogferryError> {
        Self::new(raw.decode()?)
    }
}

impl Filter for RemoveFieldFilter {
    fn name(&self) -> &str {
        "remove_field"
    }

    async fn filter(&mut self, mut event: LogEvent) -> Result<Vec<LogEvent>, LogferryError> {
        for field in &self.config.fields {
            event.remove(field);
        }
        if self.config.remove_message {
            event.message.clear();
        }
        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn removes_listed_fields() {
        let mut f = RemoveFieldFilter::new(RemoveFieldConfig {
            fields: vec!["password".to_owned(), "http.cookie".to_owned(), "absent".to_owned()],
            remove_message: false,
        })
        .unwrap();

        let mut event = LogEvent::new("login");
        event.set("password", json!("hunter2"));
        event.set("http.cookie", json!("c"));
        event.set("http.status", json!(200));

        let out = f.filter(event).await.unwrap();
        assert!(out[0].get("password").is_none());
        assert!(out[0].get("http.cookie").is_none());
        assert_eq!(out[0].get("http.status"), Some(&json!(200)));
        assert_eq!(out[0].message, "login");
    }

    #[tokio::test]
    async fn clears_message() {
        let mut f = RemoveFieldFilter::new(RemoveFieldConfig {
            fields: Vec::new(),
            remove_message: true,
        })
        .unwrap();
        let out = f.filter(LogEvent::new("gone")).await.unwrap();
        assert_eq!(out[0].message, "");
    }

    #[test]
    fn empty_config_is_rejected() {
        assert!(RemoveFieldFilter::new(RemoveFieldConfig::default()).is_err());
    }
}
