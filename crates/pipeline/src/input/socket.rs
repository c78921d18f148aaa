//! 소켓 입력
//!
//! TCP/UDP/Unix 소켓에서 개행으로 구분된 메시지를 수신합니다.
//! 각 줄은 코덱(기본 `json`)으로 디코딩되며, 송신측 주소가 `host` 필드로 붙습니다.
//!
//! - TCP/Unix: 연결마다 별도 태스크, 세마포어로 동시 연결 수 제한
//! - UDP: 데이터그램 하나를 여러 줄로 나눠 처리

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use logferry_core::config::PluginConfig;
use logferry_core::error::{ConfigError, LogferryError, PluginError};
use logferry_core::event::LogEvent;
use logferry_core::plugin::{AssemblyContext, DynCodec, Input, InputContext};

use super::{emit_line, trim_line_end, wait_if_paused};

const INPUT_NAME: &str = "socket";

/// 소켓 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    #[default]
    Tcp,
    Udp,
    Unix,
}

impl std::fmt::Display for SocketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Unix => f.write_str("unix"),
        }
    }
}

/// 소켓 입력 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketInputConfig {
    /// 소켓 종류
    pub socket: SocketKind,
    /// 바인드 주소 (예: "0.0.0.0:5140", Unix는 소켓 파일 경로)
    pub address: String,
    /// 연결당 수신 버퍼 크기 (바이트), UDP는 데이터그램 버퍼 크기
    pub buffer_size: usize,
    /// 최대 동시 연결 수 (TCP/Unix)
    pub max_connections: usize,
    /// 유휴 연결 타임아웃 (초)
    pub connection_timeout_secs: u64,
    /// 최대 메시지 크기 (바이트), 초과하면 연결을 닫음
    pub max_message_size: usize,
}

impl Default for SocketInputConfig {
    fn default() -> Self {
        Self {
            socket: SocketKind::Tcp,
            address: String::new(),
            buffer_size: 64 * 1024,        // 64KB
            max_connections: 256,
            connection_timeout_secs: 300,  // 5 minutes
            max_message_size: 1024 * 1024, // 1MB
        }
    }
}

impl SocketInputConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "address".to_owned(),
                reason: "socket input requires an address".to_owned(),
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.buffer_size == 0 || self.max_message_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer_size".to_owned(),
                reason: "buffer_size and max_message_size must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

enum Listener {
    Tcp(TcpListener),
    Udp(UdpSocket),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// 소켓 입력
pub struct SocketInput {
    config: SocketInputConfig,
    codec: Option<Arc<dyn DynCodec>>,
    listener: Mutex<Option<Listener>>,
    local_addr: Option<String>,
}

impl SocketInput {
    /// 설정과 코덱으로 입력을 생성합니다. 바인드는 `open`에서 합니다.
    pub fn new(
        config: SocketInputConfig,
        codec: Option<Arc<dyn DynCodec>>,
    ) -> Result<Self, LogferryError> {
        config.validate()?;
        Ok(Self {
            config,
            codec,
            listener: Mutex::new(None),
            local_addr: None,
        })
    }

    /// 정의 문서의 원시 설정에서 생성합니다.
    pub fn from_config(ctx: &AssemblyContext<'_>, raw: &PluginConfig) -> Result<Self, LogferryError> {
        let config: SocketInputConfig = raw.decode()?;
        let codec = ctx.resolve_codec(raw, "json")?;
        Self::new(config, codec)
    }

    /// 바인드된 주소 (`open` 이후)
    pub fn local_addr(&self) -> Option<&str> {
        self.local_addr.as_deref()
    }

    /// 설정을 반환합니다.
    pub fn config(&self) -> &SocketInputConfig {
        &self.config
    }

    async fn bind(&self) -> Result<(Listener, String), LogferryError> {
        let address = self.config.address.as_str();
        let bind_error = |e: std::io::Error| {
            PluginError::failed(
                INPUT_NAME,
                format!("failed to bind {} {address}: {e}", self.config.socket),
            )
        };

        match self.config.socket {
            SocketKind::Tcp => {
                let listener = TcpListener::bind(address).await.map_err(bind_error)?;
                let local = listener.local_addr().map_err(bind_error)?;
                Ok((Listener::Tcp(listener), local.to_string()))
            }
            SocketKind::Udp => {
                let socket = UdpSocket::bind(address).await.map_err(bind_error)?;
                let local = socket.local_addr().map_err(bind_error)?;
                Ok((Listener::Udp(socket), local.to_string()))
            }
            #[cfg(unix)]
            SocketKind::Unix => {
                // 이전 실행이 남긴 소켓 파일
                match tokio::fs::remove_file(address).await {
                    Ok(()) => debug!(path = address, "removed stale unix socket"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(bind_error(e).into()),
                }
                let listener = tokio::net::UnixListener::bind(address).map_err(bind_error)?;
                Ok((Listener::Unix(listener), address.to_owned()))
            }
            #[cfg(not(unix))]
            SocketKind::Unix => Err(PluginError::failed(
                INPUT_NAME,
                "unix sockets are not supported on this platform",
            )
            .into()),
        }
    }

    fn connection(&self, ctx: &InputContext, tx: &mpsc::Sender<LogEvent>, peer: String) -> Connection {
        Connection {
            codec: self.codec.clone(),
            tx: tx.clone(),
            ctx: ctx.clone(),
            peer,
            max_message_size: self.config.max_message_size,
            idle_timeout: Duration::from_secs(self.config.connection_timeout_secs),
        }
    }

    async fn run_tcp(
        &self,
        listener: TcpListener,
        ctx: InputContext,
        tx: mpsc::Sender<LogEvent>,
    ) -> Result<(), LogferryError> {
        // 연결 수 제한을 위한 세마포어
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    info!(address = %self.config.address, "socket input received shutdown signal");
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                result = listener.accept() => {
                    let (stream, addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept error");
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        warn!(peer = %addr, "max connections reached, rejecting connection");
                        continue;
                    };

                    debug!(peer = %addr, "accepted connection");
                    let conn = self.connection(&ctx, &tx, addr.ip().to_string());
                    let reader = BufReader::with_capacity(self.config.buffer_size, stream);
                    connections.spawn(async move {
                        conn.run(reader).await;
                        drop(permit); // 연결 종료 시 세마포어 반환
                    });
                }
            }
        }

        while connections.join_next().await.is_some() {}
        Ok(())
    }

    #[cfg(unix)]
    async fn run_unix(
        &self,
        listener: tokio::net::UnixListener,
        ctx: InputContext,
        tx: mpsc::Sender<LogEvent>,
    ) -> Result<(), LogferryError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    info!(path = %self.config.address, "socket input received shutdown signal");
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                result = listener.accept() => {
                    let (stream, _addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept error");
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        warn!(path = %self.config.address, "max connections reached, rejecting connection");
                        continue;
                    };

                    let conn = self.connection(&ctx, &tx, self.config.address.clone());
                    let reader = BufReader::with_capacity(self.config.buffer_size, stream);
                    connections.spawn(async move {
                        conn.run(reader).await;
                        drop(permit);
                    });
                }
            }
        }

        while connections.join_next().await.is_some() {}
        if let Err(e) = tokio::fs::remove_file(&self.config.address).await {
            debug!(path = %self.config.address, error = %e, "failed to remove unix socket");
        }
        Ok(())
    }

    async fn run_udp(
        &self,
        socket: UdpSocket,
        ctx: InputContext,
        tx: mpsc::Sender<LogEvent>,
    ) -> Result<(), LogferryError> {
        let mut buf = vec![0u8; self.config.buffer_size];

        loop {
            if !wait_if_paused(&ctx).await {
                break;
            }

            let (len, peer) = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    info!(address = %self.config.address, "socket input received shutdown signal");
                    break;
                }
                result = socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "udp receive error");
                        continue;
                    }
                },
            };

            if !self.emit_datagram(&buf[..len], peer, &tx).await {
                debug!("event channel closed, stopping udp input");
                break;
            }
        }
        Ok(())
    }

    async fn emit_datagram(&self, datagram: &[u8], peer: SocketAddr, tx: &mpsc::Sender<LogEvent>) -> bool {
        for raw in datagram.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(raw);
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let mut extra = Map::new();
            extra.insert("host".to_owned(), Value::String(peer.ip().to_string()));
            if !emit_line(self.codec.as_ref(), line.to_owned(), extra, tx, INPUT_NAME).await {
                return false;
            }
        }
        true
    }
}

impl Input for SocketInput {
    fn name(&self) -> &str {
        INPUT_NAME
    }

    async fn open(&mut self) -> Result<(), LogferryError> {
        let (listener, local) = self.bind().await?;
        info!(socket = %self.config.socket, address = %local, "socket input listening");
        self.local_addr = Some(local);
        *self.listener.get_mut() = Some(listener);
        Ok(())
    }

    async fn start(&self, ctx: InputContext, tx: mpsc::Sender<LogEvent>) -> Result<(), LogferryError> {
        let listener = self.listener.lock().await.take();
        let listener = match listener {
            Some(listener) => listener,
            None => self.bind().await?.0,
        };

        match listener {
            Listener::Tcp(l) => self.run_tcp(l, ctx, tx).await,
            Listener::Udp(s) => self.run_udp(s, ctx, tx).await,
            #[cfg(unix)]
            Listener::Unix(l) => self.run_unix(l, ctx, tx).await,
        }
    }
}

/// 스트림 연결 하나의 처리 상태
struct Connection {
    codec: Option<Arc<dyn DynCodec>>,
    tx: mpsc::Sender<LogEvent>,
    ctx: InputContext,
    peer: String,
    max_message_size: usize,
    idle_timeout: Duration,
}

impl Connection {
    /// 개행 단위로 읽어 이벤트를 보냅니다. 연결이 닫히거나 취소되면 반환합니다.
    async fn run<R: AsyncBufRead + Unpin>(self, mut reader: R) {
        let mut buf = Vec::with_capacity(1024);

        loop {
            if !wait_if_paused(&self.ctx).await {
                break;
            }
            buf.clear();

            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    debug!(peer = %self.peer, "connection handler received shutdown signal");
                    break;
                }
                result = timeout(self.idle_timeout, reader.read_until(b'\n', &mut buf)) => {
                    match result {
                        Ok(Ok(0)) => {
                            debug!(peer = %self.peer, "connection closed by peer");
                            break;
                        }
                        Ok(Ok(_)) => {
                            if buf.len() > self.max_message_size {
                                warn!(
                                    peer = %self.peer,
                                    size = buf.len(),
                                    max = self.max_message_size,
                                    "message exceeds max size, closing connection"
                                );
                                break;
                            }

                            trim_line_end(&mut buf);
                            if buf.iter().all(u8::is_ascii_whitespace) {
                                continue;
                            }

                            let line = String::from_utf8_lossy(&buf).into_owned();
                            let mut extra = Map::new();
                            extra.insert("host".to_owned(), Value::String(self.peer.clone()));
                            if !emit_line(self.codec.as_ref(), line, extra, &self.tx, INPUT_NAME).await {
                                debug!(peer = %self.peer, "event channel closed, closing connection");
                                break;
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(peer = %self.peer, error = %e, "read error, closing connection");
                            break;
                        }
                        Err(_) => {
                            debug!(peer = %self.peer, "connection idle timeout");
                            break;
                        }
                    }
                }
            }
        }
    }
}
