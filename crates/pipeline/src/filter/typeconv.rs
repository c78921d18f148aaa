//! typeconv 필터
//!
//! 지정한 필드의 값을 `string`, `int64`, `float64` 중 하나로 변환합니다.
//! 배열은 원소마다 변환합니다. 변환할 수 없는 값은 그대로 두고
//! [`TYPECONV_ERROR_TAG`] 태그를 붙입니다.

use serde::Deserialize;
use serde_json::{Number, Value};
use tracing::debug;

use logferry_core::config::PluginConfig;
use logferry_core::error::{ConfigError, LogferryError};
use logferry_core::event::LogEvent;
use logferry_core::plugin::Filter;

use super::TYPECONV_ERROR_TAG;

/// 변환 대상 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvType {
    String,
    Int64,
    Float64,
}

impl std::str::FromStr for ConvType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "int64" => Ok(Self::Int64),
            "float64" => Ok(Self::Float64),
            other => Err(ConfigError::InvalidValue {
                field: "conv_type".to_owned(),
                reason: format!("invalid conv_type {other:?}, expected string, int64 or float64"),
            }),
        }
    }
}

/// typeconv 필터 설정
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TypeConvConfig {
    /// 변환 타입 (`string` | `int64` | `float64`)
    pub conv_type: String,
    /// 대상 필드 목록 (dot notation)
    pub fields: Vec<String>,
}

/// typeconv 필터
#[derive(Debug, Clone)]
pub struct TypeConvFilter {
    conv_type: ConvType,
    fields: Vec<String>,
}

impl TypeConvFilter {
    pub fn new(config: TypeConvConfig) -> Result<Self, LogferryError> {
        let conv_type = config.conv_type.parse::<ConvType>()?;
        Ok(Self {
            conv_type,
            fields: config.fields,
        })
    }

    pub fn from_config(raw: &PluginConfig) -> Result<Self, LogferryError> {
        Self::new(raw.decode()?)
    }
}

/// 값 하나를 변환합니다. 변환할 수 없으면 None.
fn convert(value: &Value, conv_type: ConvType) -> Option<Value> {
    match (conv_type, value) {
        (_, Value::Array(items)) => items
            .iter()
            .map(|item| convert(item, conv_type))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),

        (ConvType::String, Value::String(_)) => Some(value.clone()),
        (ConvType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ConvType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

        (ConvType::Int64, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(truncate_f64))
            .map(Value::from),
        (ConvType::Int64, Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_f64))
                .map(Value::from)
        }

        (ConvType::Float64, Value::Number(n)) => n.as_f64().and_then(Number::from_f64).map(Value::Number),
        (ConvType::Float64, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),

        _ => None,
    }
}

fn truncate_f64(f: f64) -> Option<i64> {
    let t = f.trunc();
    if t.is_finite() && t >= i64::MIN as f64 && t <= i64::MAX as f64 {
        Some(t as i64)
    } else {
        None
    }
}

impl Filter for TypeConvFilter {
    fn name(&self) -> &str {
        "typeconv"
    }

    async fn filter(&mut self, mut event: LogEvent) -> Result<Vec<LogEvent>, LogferryError> {
        let mut failed = false;
        for field in &self.fields {
            let Some(current) = event.get(field) else {
                continue;
            };
            match convert(current, self.conv_type) {
                Some(converted) => event.set(field, converted),
                None => {
                    debug!(field = field.as_str(), conv_type = ?self.conv_type, "value not convertible");
                    failed = true;
                }
            }
        }
        if failed {
            event.add_tag(TYPECONV_ERROR_TAG);
        }
        Ok(vec![event])
    }
}
