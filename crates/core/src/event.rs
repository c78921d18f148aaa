//! 이벤트 모델: 파이프라인을 흐르는 데이터의 기본 단위
//!
//! [`LogEvent`]는 입력/코덱이 만들고, 필터 체인이 소유권을 넘겨받으며 변형하고,
//! 출력으로 넘어가는 순간 논리적으로 불변이 됩니다. 팬아웃 시 출력마다
//! 복제본을 받으므로 출력이 이벤트를 보관해도 다른 출력에 영향이 없습니다.
//!
//! # 직렬화 형태
//! ```text
//! {"@timestamp": "...", "message": "...", "tags": [...], <extra 키들>}
//! ```
//! `extra`의 키는 최상위로 평탄화되며, `@timestamp`/`message`/`tags`는
//! 전용 필드로 승격됩니다. 승격할 수 없는 값은 `_` 접두어를 붙인 키
//! (`_message`, `_@timestamp`, `_tags`)로 extra에 옮겨집니다.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// 타임스탬프 필드명
pub const FIELD_TIMESTAMP: &str = "@timestamp";
/// 메시지 필드명
pub const FIELD_MESSAGE: &str = "message";
/// 태그 필드명
pub const FIELD_TAGS: &str = "tags";

/// 승격하지 못한 예약 필드 값을 옮길 때 붙이는 접두어
pub const UNPROMOTED_PREFIX: &str = "_";

/// 파이프라인 이벤트
///
/// `extra`가 비어 있는 것과 값이 없는 것은 같은 의미입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    /// 관측/생성 시각
    pub timestamp: DateTime<Utc>,
    /// 주 텍스트 페이로드 (구조화 데이터만 있으면 빈 문자열)
    pub message: String,
    /// 구조화 페이로드
    pub extra: Map<String, Value>,
    /// 처리 결과 표시용 라벨
    pub tags: Vec<String>,
}

impl Default for LogEvent {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            message: String::new(),
            extra: Map::new(),
            tags: Vec::new(),
        }
    }
}

impl LogEvent {
    /// 현재 시각으로 새 이벤트를 생성합니다.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// 타임스탬프를 지정합니다.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// extra를 지정합니다.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// 태그를 추가합니다. 이미 있으면 무시합니다.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// 태그 포함 여부
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// dot notation 경로로 extra 값을 조회합니다 (예: `"http.status"`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.extra.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// dot notation 경로에 값을 설정합니다.
    ///
    /// 중간 경로가 없거나 객체가 아니면 빈 객체로 만듭니다.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let Some(last) = parts.pop() else {
            return;
        };

        let mut current = &mut self.extra;
        for part in parts {
            let entry = current
                .entry(part.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_owned(), value);
    }

    /// dot notation 경로의 값을 제거하고 반환합니다.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = parts.pop()?;

        let mut current = &mut self.extra;
        for part in parts {
            current = current.get_mut(part)?.as_object_mut()?;
        }
        current.remove(last)
    }

    /// 필드 값을 문자열로 반환합니다.
    ///
    /// `message`, `@timestamp`는 전용 필드에서, 나머지는 extra에서 찾습니다.
    pub fn get_string(&self, field: &str) -> Option<String> {
        match field {
            FIELD_MESSAGE => Some(self.message.clone()),
            FIELD_TIMESTAMP => Some(format_timestamp(&self.timestamp)),
            _ => self.get(field).map(value_to_string),
        }
    }

    /// `%{field}` 템플릿을 이벤트 값으로 치환합니다.
    ///
    /// - `%{message}`, `%{@timestamp}`, `%{a.b}`: 필드 값
    /// - `%{+YYYY.MM.dd}`: 이벤트 타임스탬프 포맷
    ///
    /// 존재하지 않는 필드는 원래 토큰을 그대로 남깁니다.
    pub fn format(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("%{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };

            let key = &after[..end];
            if let Some(pattern) = key.strip_prefix('+') {
                out.push_str(
                    &self
                        .timestamp
                        .format(&joda_to_strftime(pattern))
                        .to_string(),
                );
            } else if let Some(value) = self.get_string(key) {
                out.push_str(&value);
            } else {
                out.push_str(&rest[start..start + 2 + end + 1]);
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        out
    }

    /// 직렬화 형태의 JSON 값을 반환합니다.
    pub fn to_json_value(&self) -> Value {
        let mut map = Map::with_capacity(self.extra.len() + 3);
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map.insert(
            FIELD_TIMESTAMP.to_owned(),
            Value::String(format_timestamp(&self.timestamp)),
        );
        map.insert(FIELD_MESSAGE.to_owned(), Value::String(self.message.clone()));
        if self.tags.is_empty() {
            map.remove(FIELD_TAGS);
        } else {
            map.insert(
                FIELD_TAGS.to_owned(),
                Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(map)
    }

    /// JSON 바이트로 직렬화합니다.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// JSON 객체에서 이벤트를 만듭니다.
    ///
    /// `message`(문자열), `@timestamp`(RFC 3339), `tags`(문자열 배열)는 전용 필드로
    /// 승격되고 나머지는 extra에 남습니다. `overrides`가 주어지면 먼저 깔고,
    /// 디코딩된 값이 같은 키를 덮어씁니다.
    ///
    /// 형식이 맞지 않아 승격하지 못한 예약 키(예: `"message": 12`, RFC 3339가
    /// 아닌 `@timestamp`)는 직렬화 시 전용 필드에 가려지므로
    /// `_message`, `_@timestamp`, `_tags`로 이름을 바꿔 extra에 보존합니다.
    pub fn from_object(mut object: Map<String, Value>, overrides: Option<Map<String, Value>>) -> Self {
        let mut event = LogEvent::default();

        if let Some(Value::String(_)) = object.get(FIELD_MESSAGE)
            && let Some(Value::String(message)) = object.remove(FIELD_MESSAGE)
        {
            event.message = message;
        }

        if let Some(Value::String(raw)) = object.get(FIELD_TIMESTAMP)
            && let Ok(ts) = DateTime::parse_from_rfc3339(raw)
        {
            event.timestamp = ts.with_timezone(&Utc);
            object.remove(FIELD_TIMESTAMP);
        }

        if let Some(Value::Array(items)) = object.get(FIELD_TAGS)
            && items.iter().all(Value::is_string)
        {
            event.tags = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect();
            object.remove(FIELD_TAGS);
        }

        for key in [FIELD_MESSAGE, FIELD_TIMESTAMP, FIELD_TAGS] {
            if let Some(value) = object.remove(key) {
                object.insert(format!("{UNPROMOTED_PREFIX}{key}"), value);
            }
        }

        event.extra = match overrides {
            Some(mut base) => {
                base.extend(object);
                base
            }
            None => object,
        };
        event
    }
}

impl Serialize for LogEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let reserved = |k: &str| k == FIELD_TIMESTAMP || k == FIELD_MESSAGE || k == FIELD_TAGS;
        let extra_len = self.extra.keys().filter(|k| !reserved(k)).count();
        let tags_len = usize::from(!self.tags.is_empty());

        let mut map = serializer.serialize_map(Some(extra_len + 2 + tags_len))?;
        map.serialize_entry(FIELD_TIMESTAMP, &format_timestamp(&self.timestamp))?;
        map.serialize_entry(FIELD_MESSAGE, &self.message)?;
        if !self.tags.is_empty() {
            map.serialize_entry(FIELD_TAGS, &self.tags)?;
        }
        for (key, value) in &self.extra {
            if !reserved(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LogEvent[{}] message={:?} extra_keys={} tags={:?}",
            format_timestamp(&self.timestamp),
            self.message,
            self.extra.len(),
            self.tags,
        )
    }
}

/// 타임스탬프를 RFC 3339 (UTC, `Z` 접미어)로 포맷합니다.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// logstash 스타일 날짜 패턴(`YYYY.MM.dd`)을 strftime 형식으로 변환합니다.
fn joda_to_strftime(pattern: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("YYYY", "%Y"),
        ("yyyy", "%Y"),
        ("YY", "%y"),
        ("MM", "%m"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ];

    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;
    'outer: while !rest.is_empty() {
        for (token, replacement) in TOKENS {
            if let Some(stripped) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = stripped;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}
