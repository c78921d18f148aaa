//! 설정 관리: 파이프라인 정의 문서 파싱
//!
//! [`PipelineDefinition`]은 `input`/`filter`/`output` 플러그인 목록과 엔진 설정을
//! 담는 최상위 구조체입니다. 각 플러그인 설정은 [`PluginConfig`]로 보관되며,
//! 플러그인 생성자가 자기 설정 구조체로 [`PluginConfig::decode`]합니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`LOGFERRY_CHSIZE=512` 형식)
//! 2. 정의 파일 (`config.yml` / `config.json`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logferry_core::error::LogferryError> {
//! use logferry_core::config::PipelineDefinition;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let def = PipelineDefinition::load("config.yml").await?;
//!
//! // YAML 문자열에서 직접 파싱
//! let def = PipelineDefinition::from_yaml("chsize: 10\ninput:\n  - type: socket\n")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ConfigError, LogferryError, PluginCategory, PluginError};

/// 플러그인 설정의 타입 키
pub const KEY_TYPE: &str = "type";
/// 입력/출력 설정의 코덱 키
pub const KEY_CODEC: &str = "codec";

/// 기본 채널 용량
pub const DEFAULT_CHSIZE: usize = 1000;
/// 기본 헬스 체크 주기 (밀리초)
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 1000;
/// 출력 비정상 시 재확인 주기 (밀리초)
pub const DEFAULT_HEALTH_RETRY_INTERVAL_MS: u64 = 5000;

// ─── PluginConfig ────────────────────────────────────────────────────

/// 플러그인 하나의 원시 설정
///
/// 정의 문서의 `- type: socket ...` 항목 하나에 해당합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginConfig(Map<String, Value>);

/// 입력/출력의 `codec` 필드 해석 결과
#[derive(Debug, Clone, PartialEq)]
pub enum CodecSpec {
    /// `codec` 필드 없음: 플러그인 기본 코덱 사용
    Default,
    /// `codec: null`: 코덱 없음
    Disabled,
    /// 문자열 축약형 또는 객체형
    Configured(PluginConfig),
}

impl PluginConfig {
    /// 지정한 타입의 빈 설정을 생성합니다.
    pub fn new(type_name: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(KEY_TYPE.to_owned(), Value::String(type_name.into()));
        Self(map)
    }

    /// JSON 객체에서 설정을 생성합니다.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// 필드를 추가합니다.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// `type` 필드 값
    pub fn type_name(&self) -> Option<&str> {
        self.0.get(KEY_TYPE).and_then(Value::as_str)
    }

    /// 필드 값 조회
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// 원시 맵 참조
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// 플러그인 설정 구조체로 변환합니다.
    ///
    /// 구조체에 없는 필드(`type`, `codec` 등)는 무시됩니다.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            ConfigError::InvalidValue {
                field: self.type_name().unwrap_or("<untyped>").to_owned(),
                reason: e.to_string(),
            }
        })
    }

    /// `codec` 필드를 해석합니다.
    pub fn codec_spec(&self) -> Result<CodecSpec, ConfigError> {
        match self.0.get(KEY_CODEC) {
            None => Ok(CodecSpec::Default),
            Some(Value::Null) => Ok(CodecSpec::Disabled),
            Some(Value::String(name)) => Ok(CodecSpec::Configured(PluginConfig::new(name.as_str()))),
            Some(Value::Object(map)) => match map.get(KEY_TYPE) {
                Some(Value::String(_)) => Ok(CodecSpec::Configured(PluginConfig(map.clone()))),
                _ => Err(ConfigError::InvalidValue {
                    field: KEY_CODEC.to_owned(),
                    reason: "codec object has no 'type' field".to_owned(),
                }),
            },
            Some(other) => Err(ConfigError::UnknownCodecConfig {
                value: other.to_string(),
            }),
        }
    }
}

impl From<Map<String, Value>> for PluginConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ─── PipelineDefinition ──────────────────────────────────────────────

/// 정의 문서 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Json,
    Yaml,
}

impl DefinitionFormat {
    /// 파일 확장자로 형식을 결정합니다. `.json` 외에는 YAML로 취급합니다.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// 파이프라인 정의
///
/// 플러그인 목록은 정의 순서를 유지합니다. 필터는 이 순서대로 적용됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// 입력 플러그인 목록
    #[serde(default)]
    pub input: Vec<PluginConfig>,
    /// 필터 플러그인 목록 (적용 순서)
    #[serde(default)]
    pub filter: Vec<PluginConfig>,
    /// 출력 플러그인 목록
    #[serde(default)]
    pub output: Vec<PluginConfig>,
    /// 단계 간 채널 용량
    #[serde(default = "default_chsize")]
    pub chsize: usize,
    /// 테스트용 출력 관측 채널 활성화
    #[serde(default)]
    pub debugch: bool,
    /// 유휴 시 출력 헬스 체크 주기 (밀리초)
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// 출력 비정상 시 재확인 주기 (밀리초)
    #[serde(default = "default_health_retry_interval_ms")]
    pub health_retry_interval_ms: u64,
}

impl Default for PipelineDefinition {
    fn default() -> Self {
        Self {
            input: Vec::new(),
            filter: Vec::new(),
            output: Vec::new(),
            chsize: DEFAULT_CHSIZE,
            debugch: false,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            health_retry_interval_ms: DEFAULT_HEALTH_RETRY_INTERVAL_MS,
        }
    }
}

fn default_chsize() -> usize {
    DEFAULT_CHSIZE
}

fn default_health_check_interval_ms() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_MS
}

fn default_health_retry_interval_ms() -> u64 {
    DEFAULT_HEALTH_RETRY_INTERVAL_MS
}

impl PipelineDefinition {
    /// 정의 파일을 로드하고 환경변수 오버라이드와 검증을 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogferryError> {
        let mut def = Self::from_file(path).await?;
        def.apply_env_overrides();
        def.validate()?;
        Ok(def)
    }

    /// 정의 파일을 로드합니다 (환경변수 오버라이드 없음).
    ///
    /// 확장자가 `.json`이면 JSON, 그 외에는 YAML로 파싱합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogferryError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogferryError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogferryError::Io(e)
            }
        })?;
        Self::parse(&content, DefinitionFormat::from_path(path))
    }

    /// 지정한 형식으로 문자열을 파싱합니다.
    pub fn parse(content: &str, format: DefinitionFormat) -> Result<Self, LogferryError> {
        match format {
            DefinitionFormat::Json => Self::from_json(content),
            DefinitionFormat::Yaml => Self::from_yaml(content),
        }
    }

    /// YAML 문자열에서 정의를 파싱합니다. 빈 문서는 기본값이 됩니다.
    pub fn from_yaml(content: &str) -> Result<Self, LogferryError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            LogferryError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// JSON 문자열에서 정의를 파싱합니다.
    pub fn from_json(content: &str) -> Result<Self, LogferryError> {
        serde_json::from_str(content).map_err(|e| {
            LogferryError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 엔진 설정을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGFERRY_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        override_usize(&mut self.chsize, "LOGFERRY_CHSIZE");
        override_bool(&mut self.debugch, "LOGFERRY_DEBUGCH");
        override_u64(
            &mut self.health_check_interval_ms,
            "LOGFERRY_HEALTH_CHECK_INTERVAL_MS",
        );
        override_u64(
            &mut self.health_retry_interval_ms,
            "LOGFERRY_HEALTH_RETRY_INTERVAL_MS",
        );
    }

    /// 정의의 유효성을 검증합니다.
    ///
    /// 모든 플러그인 항목은 `type`을 가져야 합니다.
    pub fn validate(&self) -> Result<(), LogferryError> {
        if self.chsize == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chsize".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }
        if self.health_check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_check_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }
        if self.health_retry_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_retry_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        let sections = [
            (PluginCategory::Input, &self.input),
            (PluginCategory::Filter, &self.filter),
            (PluginCategory::Output, &self.output),
        ];
        for (category, entries) in sections {
            if let Some(index) = entries.iter().position(|c| c.type_name().is_none()) {
                return Err(PluginError::MissingType { category, index }.into());
            }
        }
        Ok(())
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct SampleConfig {
        address: String,
        retries: u32,
    }

    impl Default for SampleConfig {
        fn default() -> Self {
            Self {
                address: "127.0.0.1:1".to_owned(),
                retries: 3,
            }
        }
    }

    #[test]
    fn default_definition_has_sane_values() {
        let def = PipelineDefinition::default();
        assert_eq!(def.chsize, 1000);
        assert!(!def.debugch);
        assert_eq!(def.health_check_interval_ms, 1000);
        assert_eq!(def.health_retry_interval_ms, 5000);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn from_yaml_keeps_plugin_order() {
        let def = PipelineDefinition::from_yaml(
            r#"
chsize: 5
debugch: true
input:
  - type: socket
    socket: tcp
    address: "127.0.0.1:9999"
filter:
  - type: add_field
    key: a
    value: "1"
  - type: remove_field
    fields: [a]
output:
  - type: stdout
"#,
        )
        .unwrap();

        assert_eq!(def.chsize, 5);
        assert!(def.debugch);
        let types: Vec<_> = def.filter.iter().filter_map(|f| f.type_name()).collect();
        assert_eq!(types, vec!["add_field", "remove_field"]);
        assert_eq!(def.input[0].get("address"), Some(&json!("127.0.0.1:9999")));
    }

    #[test]
    fn from_json_uses_defaults_for_missing_fields() {
        let def = PipelineDefinition::from_json(r#"{"output": [{"type": "stdout"}]}"#).unwrap();
        assert_eq!(def.chsize, DEFAULT_CHSIZE);
        assert!(def.input.is_empty());
        assert_eq!(def.output.len(), 1);
    }

    #[test]
    fn empty_yaml_is_default() {
        let def = PipelineDefinition::from_yaml("  \n").unwrap();
        assert!(def.input.is_empty());
        assert_eq!(def.chsize, DEFAULT_CHSIZE);
    }

    #[test]
    fn invalid_yaml_returns_parse_error() {
        let err = PipelineDefinition::from_yaml("input: [unclosed").unwrap_err();
        assert!(matches!(err, LogferryError::Config(ConfigError::ParseFailed { .. })));
    }

    #[test]
    fn validate_reports_missing_type_with_index() {
        let mut def = PipelineDefinition::default();
        def.filter.push(PluginConfig::new("add_field"));
        def.filter.push(PluginConfig::default().with("key", "x"));

        let err = def.validate().unwrap_err();
        assert!(matches!(
            err,
            LogferryError::Plugin(PluginError::MissingType {
                category: PluginCategory::Filter,
                index: 1
            })
        ));
    }

    #[test]
    fn validate_rejects_zero_chsize() {
        let def = PipelineDefinition {
            chsize: 0,
            ..Default::default()
        };
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("chsize"));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(DefinitionFormat::from_path(Path::new("a.json")), DefinitionFormat::Json);
        assert_eq!(DefinitionFormat::from_path(Path::new("a.JSON")), DefinitionFormat::Json);
        assert_eq!(DefinitionFormat::from_path(Path::new("a.yml")), DefinitionFormat::Yaml);
        assert_eq!(DefinitionFormat::from_path(Path::new("a.yaml")), DefinitionFormat::Yaml);
    }

    #[test]
    fn decode_merges_defaults() {
        let cfg = PluginConfig::new("sample").with("retries", 7);
        let decoded: SampleConfig = cfg.decode().unwrap();
        assert_eq!(
            decoded,
            SampleConfig {
                address: "127.0.0.1:1".to_owned(),
                retries: 7
            }
        );
    }

    #[test]
    fn decode_reports_type_on_failure() {
        let cfg = PluginConfig::new("sample").with("retries", "many");
        let err = cfg.decode::<SampleConfig>().unwrap_err();
        assert!(err.to_string().contains("sample"));
    }

    #[test]
    fn codec_spec_variants() {
        assert_eq!(PluginConfig::new("x").codec_spec().unwrap(), CodecSpec::Default);
        assert_eq!(
            PluginConfig::new("x").with("codec", Value::Null).codec_spec().unwrap(),
            CodecSpec::Disabled
        );
        assert_eq!(
            PluginConfig::new("x").with("codec", "json").codec_spec().unwrap(),
            CodecSpec::Configured(PluginConfig::new("json"))
        );

        let obj = PluginConfig::new("x").with("codec", json!({"type": "json", "append_newline": false}));
        match obj.codec_spec().unwrap() {
            CodecSpec::Configured(c) => {
                assert_eq!(c.type_name(), Some("json"));
                assert_eq!(c.get("append_newline"), Some(&json!(false)));
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = PluginConfig::new("x").with("codec", 42).codec_spec().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCodecConfig { .. }));
    }

    #[test]
    fn codec_object_without_type_is_rejected() {
        let err = PluginConfig::new("x")
            .with("codec", json!({"append_newline": true}))
            .codec_spec()
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { field, reason } => {
                assert_eq!(field, "codec");
                assert_eq!(reason, "codec object has no 'type' field");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn env_override_usize_valid() {
        let mut val = 1usize;
        // SAFETY: 테스트는 고유한 키를 사용하며 다른 테스트와 공유하지 않습니다.
        unsafe { std::env::set_var("TEST_LOGFERRY_USIZE", "64") };
        override_usize(&mut val, "TEST_LOGFERRY_USIZE");
        assert_eq!(val, 64);
        unsafe { std::env::remove_var("TEST_LOGFERRY_USIZE") };
    }

    #[test]
    fn env_override_bool_invalid_keeps_original() {
        let mut val = false;
        // SAFETY: 테스트는 고유한 키를 사용하며 다른 테스트와 공유하지 않습니다.
        unsafe { std::env::set_var("TEST_LOGFERRY_BOOL_BAD", "not-a-bool") };
        override_bool(&mut val, "TEST_LOGFERRY_BOOL_BAD");
        assert!(!val);
        unsafe { std::env::remove_var("TEST_LOGFERRY_BOOL_BAD") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = 9u64;
        override_u64(&mut val, "TEST_LOGFERRY_DEFINITELY_UNSET");
        assert_eq!(val, 9);
    }
}
