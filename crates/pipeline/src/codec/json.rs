//! JSON 코덱
//!
//! 한 줄(또는 한 덩어리)의 JSON 객체를 이벤트로 디코딩합니다.
//! `message`, `@timestamp`, `tags`는 전용 필드로 승격되고 나머지 키는 `extra`에
//! 남습니다. 미리 주어진 `extra`와 키가 겹치면 디코딩된 값이 이깁니다.
//!
//! 파싱에 실패해도 원문을 `message`에 담고 [`JSON_CODEC_ERROR_TAG`] 태그를 붙인
//! 이벤트를 내보냅니다.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use logferry_core::error::CodecError;
use logferry_core::event::LogEvent;
use logferry_core::plugin::{Codec, CodecInput, DecodeOutcome};

use super::JSON_CODEC_ERROR_TAG;

/// JSON 코덱 설정
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JsonCodecConfig {
    /// 인코딩 결과 끝에 개행 추가
    pub append_newline: bool,
}

/// JSON 코덱
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    config: JsonCodecConfig,
}

impl JsonCodec {
    pub fn new(config: JsonCodecConfig) -> Self {
        Self { config }
    }
}

/// JSON 텍스트를 객체로 파싱합니다. 객체가 아니면 에러입니다.
pub(crate) fn parse_object(raw: &[u8]) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CodecError::DecodeFailed(format!(
            "expected JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(CodecError::DecodeFailed(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 디코딩 실패 시 내보낼 이벤트
fn error_event(raw: String, extra: Option<Map<String, Value>>) -> LogEvent {
    let mut event = LogEvent::new(raw).with_extra(extra.unwrap_or_default());
    event.add_tag(JSON_CODEC_ERROR_TAG);
    event
}

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    async fn decode(
        &self,
        data: CodecInput,
        extra: Option<Map<String, Value>>,
        tx: &mpsc::Sender<LogEvent>,
    ) -> DecodeOutcome {
        let (event, error) = match data {
            CodecInput::Structured(map) => (LogEvent::from_object(map, extra), None),
            CodecInput::Text(text) => match parse_object(text.as_bytes()) {
                Ok(map) => (LogEvent::from_object(map, extra), None),
                Err(e) => (error_event(text, extra), Some(e)),
            },
            CodecInput::Bytes(bytes) => match parse_object(&bytes) {
                Ok(map) => (LogEvent::from_object(map, extra), None),
                Err(e) => (
                    error_event(String::from_utf8_lossy(&bytes).into_owned(), extra),
                    Some(e),
                ),
            },
            CodecInput::Value(value) => (
                error_event(value.to_string(), extra),
                Some(CodecError::UnsupportedData {
                    codec: "json".to_owned(),
                    kind: json_kind(&value).to_owned(),
                }),
            ),
        };

        if tx.send(event).await.is_err() {
            return DecodeOutcome::rejected(error);
        }
        match error {
            Some(e) => DecodeOutcome::accepted_with_error(e),
            None => DecodeOutcome::accepted(),
        }
    }

    fn decode_event(&self, data: &[u8]) -> Result<LogEvent, CodecError> {
        parse_object(data).map(|map| LogEvent::from_object(map, None))
    }

    async fn encode(&self, event: &LogEvent, tx: &mpsc::Sender<Bytes>) -> Result<bool, CodecError> {
        let json = event
            .to_json_bytes()
            .map_err(|e| CodecError::EncodeFailed(e.to_string()))?;

        let mut buf = BytesMut::with_capacity(json.len() + 1);
        buf.put_slice(&json);
        if self.config.append_newline {
            buf.put_u8(b'\n');
        }

        tx.send(buf.freeze())
            .await
            .map_err(|_| CodecError::EncodeFailed("encode channel closed".to_owned()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn decode_one(codec: &JsonCodec, data: CodecInput, extra: Option<Map<String, Value>>) -> (DecodeOutcome, LogEvent) {
        let (tx, mut rx) = mpsc::channel(1);
        let outcome = codec.decode(data, extra, &tx).await;
        (outcome, rx.recv().await.unwrap())
    }

    #[tokio::test]
    async fn decodes_object_with_promotions() {
        let codec = JsonCodec::default();
        let (outcome, event) = decode_one(
            &codec,
            CodecInput::Text(
                r#"{"message":"hi","@timestamp":"2019-01-04T00:55:36Z","tags":["a"],"level":"info"}"#
                    .to_owned(),
            ),
            None,
        )
        .await;

        assert!(outcome.accepted);
        assert!(outcome.error.is_none());
        assert_eq!(event.message, "hi");
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2019, 1, 4, 0, 55, 36).unwrap());
        assert_eq!(event.tags, vec!["a"]);
        assert_eq!(event.extra, object(json!({"level": "info"})));
    }

    #[tokio::test]
    async fn decoded_value_wins_over_extra() {
        let codec = JsonCodec::default();
        let (_, event) = decode_one(
            &codec,
            CodecInput::Bytes(Bytes::from_static(br#"{"foo":"bar2"}"#)),
            Some(object(json!({"foo": "bar", "one": "more thing"}))),
        )
        .await;

        assert_eq!(event.extra, object(json!({"foo": "bar2", "one": "more thing"})));
    }

    #[tokio::test]
    async fn malformed_input_still_emits_tagged_event() {
        let codec = JsonCodec::default();
        let raw = r#"{"message": broken"#;
        let (tx, mut rx) = mpsc::channel(4);
        let outcome = codec.decode(CodecInput::Text(raw.to_owned()), None, &tx).await;
        drop(tx);

        assert!(outcome.accepted);
        assert!(matches!(outcome.error, Some(CodecError::DecodeFailed(_))));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.message, raw);
        assert!(event.has_tag(JSON_CODEC_ERROR_TAG));
        assert!(rx.recv().await.is_none(), "exactly one event expected");
    }

    #[tokio::test]
    async fn non_object_json_is_an_error() {
        let codec = JsonCodec::default();
        let (outcome, event) = decode_one(&codec, CodecInput::Text("[1,2]".to_owned()), None).await;
        assert!(outcome.error.is_some());
        assert_eq!(event.message, "[1,2]");
        assert!(event.has_tag(JSON_CODEC_ERROR_TAG));
    }

    #[tokio::test]
    async fn structured_input_is_used_directly() {
        let codec = JsonCodec::default();
        let (outcome, event) = decode_one(
            &codec,
            CodecInput::Structured(object(json!({"message": "m", "k": 1}))),
            None,
        )
        .await;
        assert!(outcome.error.is_none());
        assert_eq!(event.message, "m");
        assert_eq!(event.get("k"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn reserialization_preserves_extra() {
        let codec = JsonCodec::default();
        let payload = json!({
            "message": "m",
            "nested": {"a": [1, 2, {"b": null}]},
            "n": 1.5,
            "flag": true,
        });
        let (_, event) = decode_one(&codec, CodecInput::Text(payload.to_string()), None).await;

        let reencoded = event.to_json_value();
        for (key, value) in payload.as_object().unwrap() {
            assert_eq!(reencoded.get(key), Some(value), "key {key} changed");
        }
    }

    #[test]
    fn decode_event_rejects_malformed() {
        let codec = JsonCodec::default();
        assert!(codec.decode_event(b"not json").is_err());
        let event = codec.decode_event(br#"{"message":"ok"}"#).unwrap();
        assert_eq!(event.message, "ok");
    }

    #[tokio::test]
    async fn encode_appends_newline_when_configured() {
        let codec = JsonCodec::new(JsonCodecConfig {
            append_newline: true,
        });
        let (tx, mut rx) = mpsc::channel(1);
        let mut event = LogEvent::new("hello");
        event.set("foo", json!("bar"));

        assert!(codec.encode(&event, &tx).await.unwrap());
        let bytes = rx.recv().await.unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["message"], json!("hello"));
        assert_eq!(value["foo"], json!("bar"));
    }

    #[tokio::test]
    async fn encode_without_newline() {
        let codec = JsonCodec::default();
        let (tx, mut rx) = mpsc::channel(1);
        codec.encode(&LogEvent::new("x"), &tx).await.unwrap();
        let bytes = rx.recv().await.unwrap();
        assert_eq!(bytes.last(), Some(&b'}'));
    }
}
