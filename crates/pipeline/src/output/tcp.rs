//! tcp 출력
//!
//! 인코딩한 줄을 버퍼 채널에 넣고, 백그라운드 writer 태스크가 순서대로 전송합니다.
//! writer는 첫 출력 시점에 생성됩니다.
//!
//! # 연결 상태
//! - `Connecting`: 아직 연결을 시도하지 않았거나 연결 중
//! - `Connected`: 전송 가능
//! - `Disconnected`: 연결/전송 실패, `reconnect_interval_ms`마다 재연결 시도
//!
//! `is_running()`은 `Disconnected`일 때만 false이며, 이때 디스패치 루프가
//! 입력을 일시정지시킵니다.
//!
//! 전송에 실패한 줄은 [`RetryTracker`]로 다시 시도하고, 한도를 넘으면 버립니다.
//!
//! # 종료
//! `close()`는 버퍼 채널을 닫고 writer가 남은 줄을 모두 보낼 때까지
//! `flush_timeout_ms`만큼 기다립니다. 시간 안에 끝나지 않으면 writer를 멈추고
//! 보내지 못한 줄 수를 에러 로그와 `logferry_output_dropped_total`로 남깁니다.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logferry_core::config::PluginConfig;
use logferry_core::error::{ConfigError, LogferryError, PluginError};
use logferry_core::event::LogEvent;
use logferry_core::metrics as m;
use logferry_core::plugin::{AssemblyContext, DynCodec, Output};

use super::encode_line;
use super::retry::{
    BackoffStrategy, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS, DEFAULT_MAX_RETRIES,
    RetryDecision, RetryPolicy, RetryTracker,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// tcp 출력 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpOutputConfig {
    /// 대상 주소 (`host:port`)
    pub address: String,
    /// 재연결 간격 (ms)
    pub reconnect_interval_ms: u64,
    /// 줄 하나당 최대 재시도 횟수
    pub retry_max: u32,
    /// 첫 재시도 대기 (ms)
    pub retry_initial_interval_ms: u64,
    /// 최대 재시도 대기 (ms)
    pub retry_max_interval_ms: u64,
    /// 백오프 전략
    pub retry_strategy: BackoffStrategy,
    /// writer 버퍼 (줄 수)
    pub buffer: usize,
    /// 종료 시 남은 줄을 보내기 위해 기다리는 최대 시간 (ms)
    pub flush_timeout_ms: u64,
}

impl Default for TcpOutputConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            reconnect_interval_ms: 1000,
            retry_max: DEFAULT_MAX_RETRIES,
            retry_initial_interval_ms: DEFAULT_INITIAL_BACKOFF_MS,
            retry_max_interval_ms: DEFAULT_MAX_BACKOFF_MS,
            retry_strategy: BackoffStrategy::default(),
            buffer: 1000,
            flush_timeout_ms: 5000,
        }
    }
}

impl TcpOutputConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "address".to_owned(),
                reason: "tcp output requires an address".to_owned(),
            });
        }
        if self.buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.reconnect_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_max,
            initial_backoff: Duration::from_millis(self.retry_initial_interval_ms),
            max_backoff: Duration::from_millis(self.retry_max_interval_ms),
            strategy: self.retry_strategy,
        }
    }
}

/// writer 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// writer 태스크 수명
enum WriterSlot {
    /// 아직 첫 출력 전
    Idle,
    Running {
        tx: mpsc::Sender<Bytes>,
        handle: JoinHandle<()>,
    },
    /// `close()` 이후
    Closed,
}

/// tcp 출력
pub struct TcpOutput {
    config: TcpOutputConfig,
    codec: Option<Arc<dyn DynCodec>>,
    state: Arc<watch::Sender<ConnectionState>>,
    slot: Mutex<WriterSlot>,
    stop: CancellationToken,
}

impl TcpOutput {
    pub fn new(config: TcpOutputConfig, codec: Option<Arc<dyn DynCodec>>) -> Result<Self, LogferryError> {
        config.validate()?;
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Ok(Self {
            config,
            codec,
            state: Arc::new(state),
            slot: Mutex::new(WriterSlot::Idle),
            stop: CancellationToken::new(),
        })
    }

    pub fn from_config(ctx: &AssemblyContext<'_>, raw: &PluginConfig) -> Result<Self, LogferryError> {
        let config: TcpOutputConfig = raw.decode()?;
        let codec = ctx.resolve_codec(raw, "json")?;
        Self::new(config, codec)
    }

    /// 현재 연결 상태
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 연결 상태 변경 구독
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn slot(&self) -> MutexGuard<'_, WriterSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// writer 채널. 처음 호출될 때 writer를 띄웁니다.
    fn writer(&self) -> Result<mpsc::Sender<Bytes>, LogferryError> {
        let mut slot = self.slot();
        match &*slot {
            WriterSlot::Running { tx, .. } => return Ok(tx.clone()),
            WriterSlot::Closed => return Err(PluginError::failed("tcp", "output is closed").into()),
            WriterSlot::Idle => {}
        }

        let (tx, rx) = mpsc::channel(self.config.buffer);
        let writer = Writer {
            address: self.config.address.clone(),
            reconnect_interval: Duration::from_millis(self.config.reconnect_interval_ms),
            tracker: RetryTracker::new(self.config.retry_policy()),
            state: Arc::clone(&self.state),
            stop: self.stop.clone(),
        };
        let handle = tokio::spawn(writer.run(rx));
        *slot = WriterSlot::Running {
            tx: tx.clone(),
            handle,
        };
        Ok(tx)
    }
}

impl std::fmt::Debug for TcpOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpOutput")
            .field("address", &self.config.address)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl Output for TcpOutput {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn output(&self, cancel: CancellationToken, event: LogEvent) -> Result<(), LogferryError> {
        let line = encode_line(self.codec.as_ref(), &event).await?;
        let writer = self.writer()?;

        tokio::select! {
            biased;
            sent = writer.send(line) => {
                sent.map_err(|_| PluginError::failed("tcp", "writer task stopped").into())
            }
            _ = cancel.cancelled() => {
                Err(PluginError::failed("tcp", "cancelled while writer buffer is full").into())
            }
        }
    }

    fn is_running(&self) -> Result<bool, LogferryError> {
        Ok(self.connection_state() != ConnectionState::Disconnected)
    }

    async fn close(&self) {
        let previous = std::mem::replace(&mut *self.slot(), WriterSlot::Closed);
        let WriterSlot::Running { tx, mut handle } = previous else {
            return;
        };
        drop(tx);

        let timeout = Duration::from_millis(self.config.flush_timeout_ms);
        let finished = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    address = %self.config.address,
                    timeout_ms = self.config.flush_timeout_ms,
                    "tcp output flush timed out, stopping writer"
                );
                self.stop.cancel();
                handle.await
            }
        };
        if let Err(e) = finished {
            error!(address = %self.config.address, error = %e, "tcp output writer panicked");
        }
        debug!(address = %self.config.address, "tcp output closed");
    }
}

/// 백그라운드 writer
struct Writer {
    address: String,
    reconnect_interval: Duration,
    tracker: RetryTracker,
    state: Arc<watch::Sender<ConnectionState>>,
    stop: CancellationToken,
}

impl Writer {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn connect(&self) -> std::io::Result<TcpStream> {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(self.address.as_str())).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            )),
        }
    }

    /// `delay`만큼 쉽니다. 중간에 멈추라는 신호를 받으면 false.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Bytes>) {
        let mut stream: Option<TcpStream> = None;
        let mut pending: Option<Bytes> = None;

        while !self.stop.is_cancelled() {
            if stream.is_none() {
                let connected = tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => break,
                    result = self.connect() => result,
                };
                match connected {
                    Ok(s) => {
                        info!(address = %self.address, "tcp output connected");
                        self.set_state(ConnectionState::Connected);
                        stream = Some(s);
                    }
                    Err(e) => {
                        warn!(address = %self.address, error = %e, "tcp output connect failed");
                        self.set_state(ConnectionState::Disconnected);
                        if pending.is_none() && rx.is_closed() && rx.is_empty() {
                            break;
                        }
                        self.pause(self.reconnect_interval).await;
                        continue;
                    }
                }
            }

            let payload = match pending.take() {
                Some(p) => p,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => break,
                        next = rx.recv() => next,
                    };
                    match next {
                        Some(p) => p,
                        None => break,
                    }
                }
            };

            let Some(conn) = stream.as_mut() else {
                pending = Some(payload);
                continue;
            };

            let written = tokio::select! {
                biased;
                _ = self.stop.cancelled() => None,
                result = conn.write_all(&payload) => Some(result),
            };
            match written {
                None => {
                    pending = Some(payload);
                    break;
                }
                Some(Ok(())) => self.tracker.record_success(&payload),
                Some(Err(e)) => {
                    warn!(address = %self.address, error = %e, "tcp output write failed");
                    stream = None;
                    self.set_state(ConnectionState::Disconnected);
                    self.handle_failure(payload, &mut pending).await;
                }
            }
        }

        self.discard_unsent(pending, &mut rx);
        if let Some(mut conn) = stream {
            let _ = conn.shutdown().await;
        }
        debug!(address = %self.address, "tcp output writer stopped");
    }

    async fn handle_failure(&mut self, payload: Bytes, pending: &mut Option<Bytes>) {
        match self.tracker.record_failure(&payload) {
            RetryDecision::Retry { attempt, delay } => {
                counter!(m::OUTPUT_RETRIES_TOTAL, m::LABEL_PLUGIN => "tcp").increment(1);
                debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying tcp payload"
                );
                self.pause(delay).await;
                *pending = Some(payload);
            }
            RetryDecision::Exhausted { attempts } => {
                counter!(m::OUTPUT_DROPPED_TOTAL, m::LABEL_PLUGIN => "tcp").increment(1);
                error!(
                    address = %self.address,
                    attempts,
                    bytes = payload.len(),
                    "tcp payload dropped after retries exhausted"
                );
            }
        }
    }

    /// 멈출 때 보내지 못한 줄을 세어 기록합니다.
    fn discard_unsent(&self, pending: Option<Bytes>, rx: &mut mpsc::Receiver<Bytes>) {
        rx.close();
        let mut dropped = usize::from(pending.is_some());
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            counter!(m::OUTPUT_DROPPED_TOTAL, m::LABEL_PLUGIN => "tcp")
                .increment(u64::try_from(dropped).unwrap_or(u64::MAX));
            error!(address = %self.address, dropped, "tcp output stopped with unsent lines");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn config(address: String) -> TcpOutputConfig {
        TcpOutputConfig {
            address,
            reconnect_interval_ms: 50,
            retry_initial_interval_ms: 10,
            ..TcpOutputConfig::default()
        }
    }

    fn json_codec() -> Option<Arc<dyn DynCodec>> {
        Some(Arc::new(JsonCodec::default()))
    }

    async fn wait_state(output: &TcpOutput, want: ConnectionState) {
        let mut rx = output.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("state change timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn delivers_json_lines_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let output = TcpOutput::new(config(addr), json_codec()).unwrap();

        for i in 0..3 {
            output
                .output(CancellationToken::new(), LogEvent::new(format!("line-{i}")))
                .await
                .unwrap();
        }

        let (sock, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(sock).lines();
        for i in 0..3 {
            let line = lines.next_line().await.unwrap().unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(value["message"], format!("line-{i}"));
        }
        assert!(output.is_running().unwrap());
    }

    #[tokio::test]
    async fn unreachable_sink_reports_not_running_then_recovers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let output = TcpOutput::new(config(addr.to_string()), json_codec()).unwrap();
        assert!(output.is_running().unwrap());

        output
            .output(CancellationToken::new(), LogEvent::new("queued"))
            .await
            .unwrap();
        wait_state(&output, ConnectionState::Disconnected).await;
        assert!(!output.is_running().unwrap());

        let listener = TcpListener::bind(addr).await.unwrap();
        let (sock, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let line = BufReader::new(sock).lines().next_line().await.unwrap().unwrap();
        assert!(line.contains("queued"));
        wait_state(&output, ConnectionState::Connected).await;
        assert!(output.is_running().unwrap());
    }

    #[tokio::test]
    async fn cancelled_send_on_full_buffer_returns_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let output = TcpOutput::new(
            TcpOutputConfig {
                buffer: 1,
                ..config(addr.to_string())
            },
            json_codec(),
        )
        .unwrap();

        // writer does not drain its buffer while disconnected
        let cancel = CancellationToken::new();
        output.output(cancel.clone(), LogEvent::new("a")).await.unwrap();
        wait_state(&output, ConnectionState::Disconnected).await;

        cancel.cancel();
        let err = output.output(cancel, LogEvent::new("b")).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn close_flushes_buffered_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let output = TcpOutput::new(config(addr), json_codec()).unwrap();

        for i in 0..3 {
            output
                .output(CancellationToken::new(), LogEvent::new(format!("flush-{i}")))
                .await
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), output.close())
            .await
            .expect("close should finish once the buffer is flushed");

        let (sock, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(sock).lines();
        for i in 0..3 {
            let line = lines.next_line().await.unwrap().unwrap();
            assert!(line.contains(&format!("flush-{i}")));
        }
        assert!(lines.next_line().await.unwrap().is_none());

        let err = output
            .output(CancellationToken::new(), LogEvent::new("late"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn close_with_dead_sink_stops_writer_after_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let output = TcpOutput::new(
            TcpOutputConfig {
                flush_timeout_ms: 200,
                ..config(addr.to_string())
            },
            json_codec(),
        )
        .unwrap();
        output
            .output(CancellationToken::new(), LogEvent::new("accepted-before-close"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), output.close())
            .await
            .expect("close must be bounded by flush_timeout_ms");

        // writer가 끝났으므로 싱크가 살아나도 아무것도 전달되지 않음
        let listener = TcpListener::bind(addr).await.unwrap();
        let accepted = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(accepted.is_err(), "writer kept running after close");
    }

    #[tokio::test]
    async fn close_before_first_output_is_noop() {
        let output = TcpOutput::new(config("127.0.0.1:1".to_owned()), json_codec()).unwrap();
        output.close().await;
        assert_eq!(output.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn requires_address() {
        let err = TcpOutput::new(TcpOutputConfig::default(), None).unwrap_err();
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn config_maps_to_retry_policy() {
        let raw = PluginConfig::new("tcp")
            .with("address", "127.0.0.1:5000")
            .with("retry_max", 7)
            .with("retry_strategy", "fixed");
        let cfg: TcpOutputConfig = raw.decode().unwrap();
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.strategy, BackoffStrategy::Fixed);
        assert_eq!(cfg.reconnect_interval_ms, 1000);
        assert_eq!(cfg.flush_timeout_ms, 5000);
    }
}
