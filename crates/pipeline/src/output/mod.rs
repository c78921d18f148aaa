//! 출력 모듈: 이벤트 전달
//!
//! - [`stdout`]: 표준 출력에 한 줄씩 쓰기
//! - [`tcp`]: 백그라운드 writer로 TCP 전송, 재연결과 재시도
//! - [`retry`]: 재시도 정책과 페이로드 추적기

pub mod retry;
pub mod stdout;
pub mod tcp;

pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy, RetryTracker};
pub use stdout::StdoutOutput;
pub use tcp::{ConnectionState, TcpOutput, TcpOutputConfig};

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use logferry_core::error::LogferryError;
use logferry_core::event::LogEvent;
use logferry_core::plugin::DynCodec;

const ENCODE_CHUNK_BUFFER: usize = 4;

/// 이벤트를 개행으로 끝나는 한 줄로 인코딩합니다.
///
/// 코덱이 없으면 `message`를 씁니다. 코덱이 내보내는 조각 수에 제한은 없으며,
/// 인코딩과 수집은 동시에 진행됩니다.
pub(crate) async fn encode_line(
    codec: Option<&Arc<dyn DynCodec>>,
    event: &LogEvent,
) -> Result<Bytes, LogferryError> {
    let mut buf = BytesMut::new();
    match codec {
        Some(codec) => {
            let (tx, mut rx) = mpsc::channel(ENCODE_CHUNK_BUFFER);
            let encode = async move {
                let result = codec.encode(event, &tx).await;
                drop(tx);
                result
            };
            let collect = async {
                while let Some(chunk) = rx.recv().await {
                    buf.put_slice(&chunk);
                }
            };
            let (result, ()) = tokio::join!(encode, collect);
            result?;
        }
        None => buf.put_slice(event.message.as_bytes()),
    }
    if buf.last() != Some(&b'\n') {
        buf.put_u8(b'\n');
    }
    Ok(buf.freeze())
}
