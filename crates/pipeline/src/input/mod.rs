//! 입력 모듈: 외부 소스에서 이벤트 수집
//!
//! - [`socket`]: TCP/UDP/Unix 소켓에서 줄 단위 수신
//! - [`file`]: 파일 tail (폴링, truncation/rotation 감지)
//!
//! 모든 입력은 읽기 전에 일시정지 플래그를 확인하고, 채널 전송이 막히면 그대로
//! 기다립니다. 채널이 닫혔으면 파이프라인이 드레인 중이므로 종료합니다.

pub mod file;
pub mod socket;

pub use file::{FileInput, FileInputConfig, StartPosition};
pub use socket::{SocketInput, SocketInputConfig, SocketKind};

use std::sync::Arc;

use metrics::counter;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use logferry_core::event::LogEvent;
use logferry_core::metrics as m;
use logferry_core::plugin::{CodecInput, DynCodec, InputContext};

/// 한 줄을 코덱으로 디코딩하여 보냅니다.
///
/// 채널이 닫혀 더 보낼 수 없으면 `false`를 반환합니다.
pub(crate) async fn emit_line(
    codec: Option<&Arc<dyn DynCodec>>,
    line: String,
    extra: Map<String, Value>,
    tx: &mpsc::Sender<LogEvent>,
    input: &'static str,
) -> bool {
    let delivered = match codec {
        Some(codec) => {
            let outcome = codec.decode(CodecInput::Text(line), Some(extra), tx).await;
            if let Some(e) = outcome.error {
                debug!(input, codec = codec.name(), error = %e, "decode error, event tagged");
            }
            outcome.accepted && !tx.is_closed()
        }
        None => tx.send(LogEvent::new(line).with_extra(extra)).await.is_ok(),
    };

    if delivered {
        counter!(m::EVENTS_RECEIVED_TOTAL, m::LABEL_PLUGIN => input).increment(1);
    }
    delivered && !tx.is_closed()
}

/// 일시정지 상태면 재개될 때까지 기다립니다.
///
/// 기다리는 중 취소되면 `false`를 반환합니다.
pub(crate) async fn wait_if_paused(ctx: &InputContext) -> bool {
    if !ctx.pause.is_paused() {
        return true;
    }
    debug!("input paused, waiting for outputs to recover");
    ctx.pause.wait_resumed(&ctx.cancel).await
}

/// 줄 끝의 `\n`, `\r\n`을 제거합니다.
pub(crate) fn trim_line_end(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logferry_core::backpressure::PauseFlag;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn trims_unix_and_windows_endings() {
        let mut a = b"abc\n".to_vec();
        trim_line_end(&mut a);
        assert_eq!(a, b"abc");

        let mut b = b"abc\r\n".to_vec();
        trim_line_end(&mut b);
        assert_eq!(b, b"abc");

        let mut c = b"abc".to_vec();
        trim_line_end(&mut c);
        assert_eq!(c, b"abc");
    }

    #[tokio::test]
    async fn emit_without_codec_uses_raw_message() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut extra = Map::new();
        extra.insert("host".to_owned(), Value::from("h"));
        assert!(emit_line(None, "line".to_owned(), extra, &tx, "test").await);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.message, "line");
        assert_eq!(event.get("host"), Some(&Value::from("h")));
    }

    #[tokio::test]
    async fn emit_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!emit_line(None, "line".to_owned(), Map::new(), &tx, "test").await);
    }

    #[tokio::test]
    async fn paused_input_stops_waiting_on_cancel() {
        let ctx = InputContext {
            cancel: CancellationToken::new(),
            pause: PauseFlag::new(),
        };
        assert!(wait_if_paused(&ctx).await);

        ctx.pause.set_paused(true);
        ctx.cancel.cancel();
        assert!(!wait_if_paused(&ctx).await);
    }
}
