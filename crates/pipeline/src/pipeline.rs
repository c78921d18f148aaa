//! 파이프라인 조립과 실행 -- 정의 문서에서 플러그인을 만들고 단계를 연결합니다.
//!
//! # 내부 아키텍처
//! ```text
//! Inputs --> chInput --> FilterChain --> chFilterOut --> Dispatcher --> Outputs
//!   ^                                                        |
//!   +------------------- PauseFlag (output health) ----------+
//! ```
//!
//! # 상태 전이
//! `Unparsed -> Assembled -> Running -> Draining -> Stopped`
//!
//! 조립 중 하나라도 실패하면 파이프라인 값 자체가 만들어지지 않으므로
//! `Running`에 도달할 수 없습니다.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logferry_core::backpressure::PauseFlag;
use logferry_core::config::PipelineDefinition;
use logferry_core::error::{LogferryError, PipelineError, PluginCategory, PluginError};
use logferry_core::event::LogEvent;
use logferry_core::plugin::{DynInput, DynOutput, InputContext, PluginRegistry};

use crate::chain::FilterChain;
use crate::dispatch::Dispatcher;

/// 파이프라인 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// 정의만 있고 아직 조립되지 않음
    Unparsed,
    /// 모든 플러그인 생성 완료
    Assembled,
    /// 실행 중
    Running,
    /// 취소됨, 버퍼에 남은 이벤트 처리 중
    Draining,
    /// 모든 태스크 종료
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unparsed => "unparsed",
            Self::Assembled => "assembled",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 테스트/디버그용 관측 채널
struct DebugChannel {
    inject: Option<mpsc::Sender<LogEvent>>,
    observer: Option<mpsc::UnboundedSender<LogEvent>>,
    observed: Mutex<mpsc::UnboundedReceiver<LogEvent>>,
}

/// 로그 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use logferry_pipeline::{Pipeline, builtin};
///
/// let registry = builtin::default_registry();
/// let mut pipeline = Pipeline::load("logferry.yml", &registry).await?;
///
/// let cancel = CancellationToken::new();
/// pipeline.start(cancel.clone()).await?;
/// // ...
/// cancel.cancel();
/// pipeline.join().await?;
/// ```
pub struct Pipeline {
    definition: PipelineDefinition,
    inputs: Vec<Box<dyn DynInput>>,
    chain: Option<FilterChain>,
    outputs: Vec<Arc<dyn DynOutput>>,
    state: Arc<watch::Sender<PipelineState>>,
    pause: PauseFlag,
    cancel: Option<CancellationToken>,
    tasks: JoinSet<Result<(), LogferryError>>,
    drain_watch: Option<JoinHandle<()>>,
    debug: Option<DebugChannel>,
}

impl Pipeline {
    /// 정의 문서로 플러그인을 생성하여 파이프라인을 조립합니다.
    ///
    /// 알 수 없는 `type`, `type` 누락, 생성자 실패는 모두 조립 실패입니다.
    pub fn assemble(
        definition: PipelineDefinition,
        registry: &PluginRegistry,
    ) -> Result<Self, LogferryError> {
        let (state, _) = watch::channel(PipelineState::Unparsed);
        definition.validate()?;

        let inputs = definition
            .input
            .iter()
            .map(|raw| registry.build_input(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let filters = definition
            .filter
            .iter()
            .map(|raw| registry.build_filter(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = definition
            .output
            .iter()
            .map(|raw| registry.build_output(raw).map(Arc::from))
            .collect::<Result<Vec<Arc<dyn DynOutput>>, _>>()?;

        let debug = definition.debugch.then(|| {
            let (observer, observed) = mpsc::unbounded_channel();
            DebugChannel {
                inject: None,
                observer: Some(observer),
                observed: Mutex::new(observed),
            }
        });

        info!(
            inputs = inputs.len(),
            filters = filters.len(),
            outputs = outputs.len(),
            chsize = definition.chsize,
            debugch = definition.debugch,
            "pipeline assembled"
        );
        state.send_replace(PipelineState::Assembled);

        Ok(Self {
            definition,
            inputs,
            chain: Some(FilterChain::new(filters)),
            outputs,
            state: Arc::new(state),
            pause: PauseFlag::new(),
            cancel: None,
            tasks: JoinSet::new(),
            drain_watch: None,
            debug,
        })
    }

    /// YAML 문자열로 조립합니다.
    pub fn from_yaml(content: &str, registry: &PluginRegistry) -> Result<Self, LogferryError> {
        Self::assemble(PipelineDefinition::from_yaml(content)?, registry)
    }

    /// JSON 문자열로 조립합니다.
    pub fn from_json(content: &str, registry: &PluginRegistry) -> Result<Self, LogferryError> {
        Self::assemble(PipelineDefinition::from_json(content)?, registry)
    }

    /// 정의 파일을 읽어 조립합니다 (환경변수 오버라이드 포함).
    pub async fn load(path: impl AsRef<Path>, registry: &PluginRegistry) -> Result<Self, LogferryError> {
        let definition = PipelineDefinition::load(path).await?;
        Self::assemble(definition, registry)
    }

    /// 현재 상태
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// 상태 변경 구독
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// 지정한 상태가 될 때까지 기다립니다.
    pub async fn wait_for_state(&self, want: PipelineState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == want).await;
    }

    /// 조립에 사용한 정의
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// 일시정지 플래그
    pub fn pause_flag(&self) -> &PauseFlag {
        &self.pause
    }

    /// 파이프라인을 시작합니다.
    ///
    /// 모든 입력을 `open`한 뒤 입력 태스크, 필터 드라이버, 디스패치 루프를
    /// 스폰합니다. `open`이 하나라도 실패하면 아무 태스크도 시작하지 않습니다.
    pub async fn start(&mut self, cancel: CancellationToken) -> Result<(), LogferryError> {
        match self.state() {
            PipelineState::Assembled => {}
            PipelineState::Running | PipelineState::Draining => {
                return Err(PipelineError::AlreadyStarted.into());
            }
            other => return Err(PipelineError::NotAssembled(other.to_string()).into()),
        }

        for input in &mut self.inputs {
            if let Err(e) = input.open().await {
                error!(input = input.name(), error = %e, "failed to open input");
                self.state.send_replace(PipelineState::Stopped);
                return Err(PluginError::InitFailed {
                    category: PluginCategory::Input,
                    name: input.name().to_owned(),
                    reason: e.to_string(),
                }
                .into());
            }
        }

        let chain = self
            .chain
            .take()
            .ok_or_else(|| PipelineError::NotAssembled(self.state().to_string()))?;
        let chsize = self.definition.chsize;
        let (input_tx, input_rx) = mpsc::channel(chsize);
        let (filtered_tx, filtered_rx) = mpsc::channel(chsize);

        // inputs
        let mut input_set = JoinSet::new();
        let input_count = self.inputs.len();
        for input in self.inputs.drain(..) {
            let input: Arc<dyn DynInput> = Arc::from(input);
            let ctx = InputContext {
                cancel: cancel.clone(),
                pause: self.pause.clone(),
            };
            let tx = input_tx.clone();
            input_set.spawn(async move {
                let result = input.start(ctx, tx).await;
                (input.name().to_owned(), result)
            });
        }
        self.tasks
            .spawn(supervise_inputs(input_set, input_count, cancel.clone()));

        // filter driver
        let token = cancel.clone();
        self.tasks.spawn(async move {
            chain.run(input_rx, filtered_tx, token).await;
            Ok(())
        });

        // dispatch
        let mut dispatcher = Dispatcher::new(
            self.outputs.clone(),
            self.pause.clone(),
            Duration::from_millis(self.definition.health_check_interval_ms),
            Duration::from_millis(self.definition.health_retry_interval_ms),
        );
        if let Some(observer) = self.debug.as_mut().and_then(|d| d.observer.take()) {
            dispatcher = dispatcher.with_observer(observer);
        }
        let token = cancel.clone();
        self.tasks.spawn(async move {
            dispatcher.run(filtered_rx, token).await;
            Ok(())
        });

        match self.debug.as_mut() {
            Some(debug) => debug.inject = Some(input_tx),
            None => drop(input_tx),
        }

        let state = Arc::clone(&self.state);
        let token = cancel.clone();
        self.drain_watch = Some(tokio::spawn(async move {
            token.cancelled().await;
            let changed = state.send_if_modified(|s| {
                if *s == PipelineState::Running {
                    *s = PipelineState::Draining;
                    true
                } else {
                    false
                }
            });
            if changed {
                info!("pipeline cancelled, draining");
            }
        }));

        self.cancel = Some(cancel);
        self.state.send_replace(PipelineState::Running);
        info!(inputs = input_count, outputs = self.outputs.len(), "pipeline running");
        Ok(())
    }

    /// 모든 태스크가 끝날 때까지 기다리고, 출력을 닫은 뒤 `Stopped`로 전이합니다.
    ///
    /// 태스크가 보고한 첫 번째 치명적 에러를 반환합니다.
    pub async fn join(&mut self) -> Result<(), LogferryError> {
        match self.state() {
            PipelineState::Running | PipelineState::Draining => {}
            PipelineState::Stopped => return Ok(()),
            other => return Err(PipelineError::NotAssembled(other.to_string()).into()),
        }

        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "pipeline task failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "pipeline task panicked"),
            }
        }

        if let Some(watch) = self.drain_watch.take() {
            watch.abort();
        }
        if let Some(debug) = self.debug.as_mut() {
            debug.inject = None;
        }
        self.close_outputs().await;

        self.state.send_replace(PipelineState::Stopped);
        info!("pipeline stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 모든 출력의 `close()`를 동시에 기다린 뒤 출력 인스턴스를 놓습니다.
    async fn close_outputs(&mut self) {
        let mut closing = JoinSet::new();
        for output in self.outputs.drain(..) {
            closing.spawn(async move {
                output.close().await;
                output.name().to_owned()
            });
        }
        while let Some(closed) = closing.join_next().await {
            match closed {
                Ok(name) => debug!(output = name.as_str(), "output closed"),
                Err(e) => error!(error = %e, "output close panicked"),
            }
        }
    }

    /// 취소 후 종료까지 기다립니다.
    pub async fn shutdown(&mut self) -> Result<(), LogferryError> {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        self.join().await
    }

    /// 입력 채널에 이벤트를 직접 넣습니다 (`debugch: true` 필요).
    pub async fn inject_event(&self, event: LogEvent) -> Result<(), LogferryError> {
        let debug = self
            .debug
            .as_ref()
            .ok_or(PipelineError::DebugChannelDisabled)?;
        let tx = debug
            .inject
            .as_ref()
            .ok_or_else(|| PipelineError::ChannelSend(format!("pipeline is {}", self.state())))?;
        tx.send(event)
            .await
            .map_err(|e| PipelineError::ChannelSend(e.to_string()).into())
    }

    /// 다음으로 디스패치된 이벤트를 기다립니다 (`debugch: true` 필요).
    ///
    /// `timeout` 안에 이벤트가 없으면 [`PipelineError::NoEvent`]를 반환합니다.
    pub async fn next_output_event(&self, timeout: Duration) -> Result<LogEvent, LogferryError> {
        let debug = self
            .debug
            .as_ref()
            .ok_or(PipelineError::DebugChannelDisabled)?;
        let mut observed = debug.observed.lock().await;
        match tokio::time::timeout(timeout, observed.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(PipelineError::ChannelRecv("debug channel closed".to_owned()).into()),
            Err(_) => Err(PipelineError::NoEvent {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("inputs", &self.definition.input.len())
            .field("filters", &self.definition.filter.len())
            .field("outputs", &self.definition.output.len())
            .field("debugch", &self.definition.debugch)
            .finish()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(watch) = self.drain_watch.take() {
            watch.abort();
        }
    }
}

/// 입력 태스크를 지켜봅니다.
///
/// 실행 중 실패한 입력은 로그만 남깁니다. 입력이 하나 이상 있고 전부 에러로
/// 끝나면 파이프라인을 취소하고 [`PipelineError::AllInputsFailed`]를 반환합니다.
async fn supervise_inputs(
    mut set: JoinSet<(String, Result<(), LogferryError>)>,
    count: usize,
    cancel: CancellationToken,
) -> Result<(), LogferryError> {
    let mut failed = 0usize;
    let mut last_error = String::new();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(()))) => debug!(input = name.as_str(), "input stopped"),
            Ok((name, Err(e))) => {
                error!(input = name.as_str(), error = %e, "input failed");
                failed += 1;
                last_error = e.to_string();
            }
            Err(e) => {
                error!(error = %e, "input task panicked");
                failed += 1;
                last_error = e.to_string();
            }
        }

        if count > 0 && failed == count && !cancel.is_cancelled() {
            warn!(count, "every input failed, cancelling pipeline");
            cancel.cancel();
            return Err(PipelineError::AllInputsFailed { count, last_error }.into());
        }
    }
    Ok(())
}
