//! 기본 코덱
//!
//! 바이트/텍스트를 그대로 `message`에 담습니다. 구조화 데이터는 처리하지 않으며
//! JSON 텍스트를 `message`에 담고 에러 태그를 붙여 내보냅니다.
//! 인코딩은 지원하지 않습니다.

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use logferry_core::error::CodecError;
use logferry_core::event::LogEvent;
use logferry_core::plugin::{Codec, CodecInput, DecodeOutcome};

use super::DEFAULT_CODEC_ERROR_TAG;

/// 기본 코덱
#[derive(Debug, Default, Clone)]
pub struct DefaultCodec;

impl DefaultCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for DefaultCodec {
    fn name(&self) -> &str {
        "default"
    }

    async fn decode(
        &self,
        data: CodecInput,
        extra: Option<Map<String, Value>>,
        tx: &mpsc::Sender<LogEvent>,
    ) -> DecodeOutcome {
        let mut event = LogEvent::default().with_extra(extra.unwrap_or_default());
        let mut error = None;

        match data {
            CodecInput::Text(text) => event.message = text,
            CodecInput::Bytes(bytes) => event.message = String::from_utf8_lossy(&bytes).into_owned(),
            other => {
                error = Some(CodecError::UnsupportedData {
                    codec: "default".to_owned(),
                    kind: other.kind().to_owned(),
                });
                event.message = other.into_text();
                event.add_tag(DEFAULT_CODEC_ERROR_TAG);
            }
        }

        if tx.send(event).await.is_err() {
            return DecodeOutcome::rejected(error);
        }
        match error {
            Some(e) => DecodeOutcome::accepted_with_error(e),
            None => DecodeOutcome::accepted(),
        }
    }

    fn decode_event(&self, data: &[u8]) -> Result<LogEvent, CodecError> {
        Ok(LogEvent::new(String::from_utf8_lossy(data)))
    }

    async fn encode(
        &self,
        _event: &LogEvent,
        _tx: &mpsc::Sender<Bytes>,
    ) -> Result<bool, CodecError> {
        Err(CodecError::NotImplemented("default codec encode".to_owned()))
    }
}
