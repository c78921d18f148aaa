//! 파일 기반 입력
//!
//! 로그 파일을 주기적으로 폴링하며 새로 추가된 줄을 수집합니다.
//! `tail -F`와 유사한 동작을 비동기 방식으로 구현합니다.
//!
//! # 로테이션 감지
//! - 파일 크기 축소 감지 (truncation) → 처음부터 다시 읽음
//! - inode 변경 감지 (logrotate 등, Unix 전용) → 새 파일을 처음부터 읽음
//! - 파일이 사라지면 다시 나타날 때까지 대기

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use logferry_core::config::PluginConfig;
use logferry_core::error::{ConfigError, LogferryError};
use logferry_core::event::LogEvent;
use logferry_core::plugin::{AssemblyContext, DynCodec, Input, InputContext};

use super::{emit_line, trim_line_end, wait_if_paused};

const INPUT_NAME: &str = "file";

/// 처음 발견한 파일을 읽기 시작할 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// 파일 처음부터
    Beginning,
    /// 현재 끝부터 (새로 추가되는 줄만)
    #[default]
    End,
}

/// 파일 입력 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileInputConfig {
    /// 감시할 파일 경로 목록
    pub path: Vec<PathBuf>,
    /// 파일 상태 체크 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 처음 발견한 파일의 읽기 시작 위치
    pub start_position: StartPosition,
    /// 최대 줄 길이 (바이트), 초과분은 잘라서 내보냄
    pub max_line_length: usize,
    /// 폴링 한 번에 파일당 읽을 최대 바이트
    pub max_read_bytes: usize,
}

impl Default for FileInputConfig {
    fn default() -> Self {
        Self {
            path: Vec::new(),
            poll_interval_ms: 1000,
            start_position: StartPosition::End,
            max_line_length: 64 * 1024,     // 64KB
            max_read_bytes: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// 파일별 추적 상태
#[derive(Debug)]
struct FileState {
    path: PathBuf,
    /// 마지막 읽기 위치 (바이트 오프셋), 아직 발견 전이면 None
    offset: Option<u64>,
    /// 개행 없이 끝난 마지막 조각
    partial: Vec<u8>,
    #[cfg(unix)]
    inode: Option<u64>,
}

impl FileState {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: None,
            partial: Vec::new(),
            #[cfg(unix)]
            inode: None,
        }
    }

    fn reset(&mut self) {
        self.offset = Some(0);
        self.partial.clear();
    }
}

/// 파일 입력
///
/// 지정된 파일 목록을 주기적으로 폴링하여 새로운 줄을 수집합니다.
pub struct FileInput {
    config: FileInputConfig,
    codec: Option<Arc<dyn DynCodec>>,
}

impl FileInput {
    /// 새 파일 입력을 생성합니다.
    pub fn new(config: FileInputConfig, codec: Option<Arc<dyn DynCodec>>) -> Result<Self, LogferryError> {
        if config.path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "path".to_owned(),
                reason: "file input requires at least one path".to_owned(),
            }
            .into());
        }
        if config.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }
        Ok(Self { config, codec })
    }

    /// 정의 문서의 원시 설정에서 생성합니다.
    ///
    /// `path`는 문자열 하나 또는 문자열 목록을 받습니다.
    pub fn from_config(ctx: &AssemblyContext<'_>, raw: &PluginConfig) -> Result<Self, LogferryError> {
        let raw = match raw.get("path") {
            Some(Value::String(single)) => raw.clone().with("path", vec![single.clone()]),
            _ => raw.clone(),
        };
        let config: FileInputConfig = raw.decode()?;
        let codec = ctx.resolve_codec(&raw, "default")?;
        Self::new(config, codec)
    }

    /// 단일 파일에서 새 줄을 읽어 보냅니다.
    ///
    /// 채널이 닫혔으면 `false`를 반환합니다.
    async fn poll_file(&self, state: &mut FileState, tx: &mpsc::Sender<LogEvent>) -> Result<bool, std::io::Error> {
        let metadata = match tokio::fs::metadata(&state.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // 나중에 생기는 파일은 처음부터 읽음
                if state.offset.is_none() {
                    state.offset = Some(0);
                }
                return Ok(true);
            }
            Err(e) => return Err(e),
        };
        let len = metadata.len();

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let inode = metadata.ino();
            if state.inode.is_some_and(|prev| prev != inode) {
                info!(path = %state.path.display(), "file rotated, reading new file from start");
                state.reset();
            }
            state.inode = Some(inode);
        }

        let offset = match state.offset {
            Some(offset) if len < offset => {
                info!(path = %state.path.display(), "file truncated, reading from start");
                state.reset();
                0
            }
            Some(offset) => offset,
            None => {
                let start = match self.config.start_position {
                    StartPosition::Beginning => 0,
                    StartPosition::End => len,
                };
                debug!(path = %state.path.display(), offset = start, "tracking file");
                state.offset = Some(start);
                start
            }
        };

        if len == offset {
            return Ok(true);
        }

        let mut file = tokio::fs::File::open(&state.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut chunk = Vec::new();
        let limit = (len - offset).min(self.config.max_read_bytes as u64);
        let read = file.take(limit).read_to_end(&mut chunk).await?;
        state.offset = Some(offset + read as u64);

        state.partial.extend_from_slice(&chunk);
        self.emit_complete_lines(state, tx).await
    }

    async fn emit_complete_lines(&self, state: &mut FileState, tx: &mpsc::Sender<LogEvent>) -> Result<bool, std::io::Error> {
        let path = state.path.display().to_string();

        while let Some(pos) = state.partial.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = state.partial.drain(..=pos).collect();
            trim_line_end(&mut line);
            if !self.emit(&path, &line, tx).await {
                return Ok(false);
            }
        }

        // 개행 없이 너무 길어진 조각은 잘라서 내보냄
        if state.partial.len() > self.config.max_line_length {
            warn!(path = %path, size = state.partial.len(), "line exceeds max length, emitting truncated");
            let line: Vec<u8> = state.partial.drain(..).collect();
            if !self.emit(&path, &line[..self.config.max_line_length], tx).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn emit(&self, path: &str, line: &[u8], tx: &mpsc::Sender<LogEvent>) -> bool {
        if line.is_empty() {
            return true;
        }
        let mut extra = Map::new();
        extra.insert("path".to_owned(), Value::String(path.to_owned()));
        let text = String::from_utf8_lossy(line).into_owned();
        emit_line(self.codec.as_ref(), text, extra, tx, INPUT_NAME).await
    }
}

impl Input for FileInput {
    fn name(&self) -> &str {
        INPUT_NAME
    }

    async fn start(&self, ctx: InputContext, tx: mpsc::Sender<LogEvent>) -> Result<(), LogferryError> {
        let mut states: Vec<FileState> = self.config.path.iter().cloned().map(FileState::new).collect();
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(files = states.len(), "file input started");

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    info!("file input received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if !wait_if_paused(&ctx).await {
                break;
            }

            for state in &mut states {
                match self.poll_file(state, &tx).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("event channel closed, stopping file input");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(path = %state.path.display(), error = %e, "failed to read file");
                    }
                }
            }
        }

        Ok(())
    }
}
