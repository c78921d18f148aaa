//! stdout 출력
//!
//! 코덱(기본 `json`)으로 인코딩한 결과를 한 줄씩 표준 출력에 씁니다.
//! `codec: null`이면 `message`만 씁니다. 항상 실행 중으로 보고합니다.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use logferry_core::config::PluginConfig;
use logferry_core::error::{LogferryError, PluginError};
use logferry_core::event::LogEvent;
use logferry_core::plugin::{AssemblyContext, DynCodec, Output};

use super::encode_line;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// stdout 출력
pub struct StdoutOutput {
    codec: Option<Arc<dyn DynCodec>>,
    writer: Mutex<Writer>,
}

impl StdoutOutput {
    /// 표준 출력에 쓰는 출력을 생성합니다.
    pub fn new(codec: Option<Arc<dyn DynCodec>>) -> Self {
        Self::with_writer(codec, Box::new(tokio::io::stdout()))
    }

    /// 임의의 writer에 쓰는 출력을 생성합니다.
    pub fn with_writer(codec: Option<Arc<dyn DynCodec>>, writer: Writer) -> Self {
        Self {
            codec,
            writer: Mutex::new(writer),
        }
    }

    pub fn from_config(ctx: &AssemblyContext<'_>, raw: &PluginConfig) -> Result<Self, LogferryError> {
        Ok(Self::new(ctx.resolve_codec(raw, "json")?))
    }
}

impl std::fmt::Debug for StdoutOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdoutOutput")
            .field("codec", &self.codec.as_ref().map(|c| c.name().to_owned()))
            .finish()
    }
}

impl Output for StdoutOutput {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn output(&self, _cancel: CancellationToken, event: LogEvent) -> Result<(), LogferryError> {
        let line = encode_line(self.codec.as_ref(), &event).await?;

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&line).await?;
            writer.flush().await
        };
        write
            .await
            .map_err(|e| PluginError::failed("stdout", e).into())
    }

    fn is_running(&self) -> Result<bool, LogferryError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DefaultCodec, JsonCodec};
    use serde_json::{Value, json};
    use tokio::io::AsyncReadExt;

    fn output_to_pipe(codec: Option<Arc<dyn DynCodec>>) -> (StdoutOutput, tokio::io::DuplexStream) {
        let (writer, reader) = tokio::io::duplex(4096);
        (StdoutOutput::with_writer(codec, Box::new(writer)), reader)
    }

    async fn read_available(reader: &mut tokio::io::DuplexStream) -> String {
        let mut buf = vec![0u8; 4096];
        let n = reader.read(&mut buf).await.unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn writes_json_line() {
        let codec: Arc<dyn DynCodec> = Arc::new(JsonCodec::default());
        let (output, mut reader) = output_to_pipe(Some(codec));

        let mut event = LogEvent::new("hello");
        event.set("foo", json!("bar"));
        output.output(CancellationToken::new(), event).await.unwrap();

        let line = read_available(&mut reader).await;
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["message"], "hello");
        assert_eq!(value["foo"], "bar");
    }

    #[tokio::test]
    async fn without_codec_writes_message() {
        let (output, mut reader) = output_to_pipe(None);
        output
            .output(CancellationToken::new(), LogEvent::new("plain"))
            .await
            .unwrap();
        assert_eq!(read_available(&mut reader).await, "plain\n");
    }

    #[tokio::test]
    async fn encode_failure_is_reported() {
        let codec: Arc<dyn DynCodec> = Arc::new(DefaultCodec::new());
        let (output, _reader) = output_to_pipe(Some(codec));
        let err = output
            .output(CancellationToken::new(), LogEvent::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LogferryError::Codec(_)));
    }

    #[tokio::test]
    async fn always_running() {
        let output = StdoutOutput::new(None);
        assert!(output.is_running().unwrap());
    }
}
