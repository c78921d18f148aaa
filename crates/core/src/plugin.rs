//! 플러그인 시스템: 처리 단계 계약과 타입 이름 기반 레지스트리
//!
//! 네 가지 플러그인 카테고리가 있습니다.
//!
//! | 카테고리 | trait | 역할 |
//! |---|---|---|
//! | 입력 | [`Input`] | 외부 소스에서 이벤트 생성, 취소될 때까지 실행 |
//! | 필터 | [`Filter`] | 이벤트 하나를 0개 이상의 이벤트로 변환 |
//! | 출력 | [`Output`] | 이벤트 전달, 건강 상태 보고 |
//! | 코덱 | [`Codec`] | 원시 데이터 ↔ 이벤트 변환 |
//!
//! 각 trait은 RPITIT(`impl Future`)를 사용하므로 구현이 `async fn`으로 간단합니다.
//! 파이프라인은 이종 플러그인을 `Box<dyn ...>`로 다뤄야 하므로, 각 trait마다
//! `BoxFuture`를 반환하는 dyn-compatible 쌍둥이 trait([`DynInput`] 등)이 있고
//! blanket impl로 자동 구현됩니다.
//!
//! [`PluginRegistry`]는 카테고리별로 타입 이름 → 생성자 맵을 가집니다.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backpressure::PauseFlag;
use crate::config::{CodecSpec, PluginConfig};
use crate::error::{CodecError, LogferryError, PluginCategory, PluginError};
use crate::event::LogEvent;

/// Send 가능한 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ─── Codec ───────────────────────────────────────────────────────────

/// 코덱에 전달되는 원시 데이터
#[derive(Debug, Clone, PartialEq)]
pub enum CodecInput {
    /// 바이트 버퍼
    Bytes(Bytes),
    /// 텍스트
    Text(String),
    /// 이미 구조화된 객체
    Structured(Map<String, Value>),
    /// 그 밖의 JSON 값
    Value(Value),
}

impl CodecInput {
    /// 데이터 종류 이름 (에러 메시지용)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Structured(_) => "object",
            Self::Value(_) => "value",
        }
    }

    /// 원시 데이터의 텍스트 형태
    ///
    /// 바이트는 손실 허용 UTF-8로, 구조화 데이터는 JSON 텍스트로 바꿉니다.
    pub fn into_text(self) -> String {
        match self {
            Self::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Self::Text(text) => text,
            Self::Structured(map) => Value::Object(map).to_string(),
            Self::Value(value) => value.to_string(),
        }
    }
}

/// 디코딩 결과
///
/// 실패해도 최선의 이벤트(원문 메시지 + 에러 태그)를 내보내고
/// `accepted = true`와 함께 에러를 돌려줍니다. `accepted = false`는 데이터를
/// 버퍼링만 하고 아직 이벤트를 내보내지 않은 경우입니다.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    pub accepted: bool,
    pub error: Option<CodecError>,
}

impl DecodeOutcome {
    /// 이벤트를 내보낸 정상 결과
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            error: None,
        }
    }

    /// 에러 태그가 붙은 이벤트를 내보낸 결과
    pub fn accepted_with_error(error: CodecError) -> Self {
        Self {
            accepted: true,
            error: Some(error),
        }
    }

    /// 이벤트를 내보내지 않은 결과
    pub fn rejected(error: Option<CodecError>) -> Self {
        Self {
            accepted: false,
            error,
        }
    }
}

/// 코덱 trait
///
/// `decode`는 `extra`를 먼저 깔고 디코딩된 값으로 덮어쓴 이벤트를 `tx`로 보냅니다.
pub trait Codec: Send + Sync {
    /// 코덱 타입 이름
    fn name(&self) -> &str;

    /// 원시 데이터를 디코딩하여 이벤트를 `tx`로 보냅니다.
    fn decode(
        &self,
        data: CodecInput,
        extra: Option<Map<String, Value>>,
        tx: &mpsc::Sender<LogEvent>,
    ) -> impl Future<Output = DecodeOutcome> + Send;

    /// 바이트를 이벤트 하나로 동기 디코딩합니다.
    fn decode_event(&self, data: &[u8]) -> Result<LogEvent, CodecError>;

    /// 이벤트를 인코딩하여 `tx`로 보냅니다.
    ///
    /// 인코딩을 지원하지 않으면 [`CodecError::NotImplemented`]를 반환합니다.
    fn encode(
        &self,
        event: &LogEvent,
        tx: &mpsc::Sender<Bytes>,
    ) -> impl Future<Output = Result<bool, CodecError>> + Send;
}

/// dyn-compatible 코덱 trait
pub trait DynCodec: Send + Sync {
    fn name(&self) -> &str;

    fn decode<'a>(
        &'a self,
        data: CodecInput,
        extra: Option<Map<String, Value>>,
        tx: &'a mpsc::Sender<LogEvent>,
    ) -> BoxFuture<'a, DecodeOutcome>;

    fn decode_event(&self, data: &[u8]) -> Result<LogEvent, CodecError>;

    fn encode<'a>(
        &'a self,
        event: &'a LogEvent,
        tx: &'a mpsc::Sender<Bytes>,
    ) -> BoxFuture<'a, Result<bool, CodecError>>;
}

impl<T: Codec> DynCodec for T {
    fn name(&self) -> &str {
        Codec::name(self)
    }

    fn decode<'a>(
        &'a self,
        data: CodecInput,
        extra: Option<Map<String, Value>>,
        tx: &'a mpsc::Sender<LogEvent>,
    ) -> BoxFuture<'a, DecodeOutcome> {
        Box::pin(Codec::decode(self, data, extra, tx))
    }

    fn decode_event(&self, data: &[u8]) -> Result<LogEvent, CodecError> {
        Codec::decode_event(self, data)
    }

    fn encode<'a>(
        &'a self,
        event: &'a LogEvent,
        tx: &'a mpsc::Sender<Bytes>,
    ) -> BoxFuture<'a, Result<bool, CodecError>> {
        Box::pin(Codec::encode(self, event, tx))
    }
}

// ─── Input ───────────────────────────────────────────────────────────

/// 입력 실행 컨텍스트
#[derive(Debug, Clone)]
pub struct InputContext {
    /// 파이프라인 취소 토큰
    pub cancel: CancellationToken,
    /// 출력 상태 기반 일시정지 플래그 (읽기 전용으로 사용)
    pub pause: PauseFlag,
}

/// 입력 trait
///
/// `start`는 `cancel`이 발동할 때까지 반환하지 않습니다. 채널 전송이 막히는 것이
/// 역압이며, 전송 실패(채널 닫힘)는 종료 신호로 취급합니다.
pub trait Input: Send + Sync {
    /// 입력 타입 이름
    fn name(&self) -> &str;

    /// 리소스를 바인딩합니다 (소켓 listen 등). 실패하면 파이프라인이 시작되지 않습니다.
    fn open(&mut self) -> impl Future<Output = Result<(), LogferryError>> + Send {
        async { Ok(()) }
    }

    /// 이벤트를 생성하여 `tx`로 보냅니다.
    fn start(
        &self,
        ctx: InputContext,
        tx: mpsc::Sender<LogEvent>,
    ) -> impl Future<Output = Result<(), LogferryError>> + Send;
}

/// dyn-compatible 입력 trait
pub trait DynInput: Send + Sync {
    fn name(&self) -> &str;

    fn open(&mut self) -> BoxFuture<'_, Result<(), LogferryError>>;

    fn start(
        &self,
        ctx: InputContext,
        tx: mpsc::Sender<LogEvent>,
    ) -> BoxFuture<'_, Result<(), LogferryError>>;
}

impl<T: Input> DynInput for T {
    fn name(&self) -> &str {
        Input::name(self)
    }

    fn open(&mut self) -> BoxFuture<'_, Result<(), LogferryError>> {
        Box::pin(Input::open(self))
    }

    fn start(
        &self,
        ctx: InputContext,
        tx: mpsc::Sender<LogEvent>,
    ) -> BoxFuture<'_, Result<(), LogferryError>> {
        Box::pin(Input::start(self, ctx, tx))
    }
}

// ─── Filter ──────────────────────────────────────────────────────────

/// 필터 trait
///
/// 빈 결과는 이벤트 제거, 여러 개는 분할을 의미합니다. 에러가 나면 해당 이벤트만
/// 버려지고 다음 이벤트 처리는 계속됩니다.
pub trait Filter: Send + Sync {
    /// 필터 타입 이름
    fn name(&self) -> &str;

    /// 이벤트 하나를 변환합니다.
    fn filter(
        &mut self,
        event: LogEvent,
    ) -> impl Future<Output = Result<Vec<LogEvent>, LogferryError>> + Send;
}

/// dyn-compatible 필터 trait
pub trait DynFilter: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&mut self, event: LogEvent) -> BoxFuture<'_, Result<Vec<LogEvent>, LogferryError>>;
}

impl<T: Filter> DynFilter for T {
    fn name(&self) -> &str {
        Filter::name(self)
    }

    fn filter(&mut self, event: LogEvent) -> BoxFuture<'_, Result<Vec<LogEvent>, LogferryError>> {
        Box::pin(Filter::filter(self, event))
    }
}

// ─── Output ──────────────────────────────────────────────────────────

/// 출력 trait
///
/// 같은 인스턴스에 대해 동시 호출이 가능해야 합니다.
pub trait Output: Send + Sync {
    /// 출력 타입 이름
    fn name(&self) -> &str;

    /// 이벤트를 전달합니다.
    fn output(
        &self,
        cancel: CancellationToken,
        event: LogEvent,
    ) -> impl Future<Output = Result<(), LogferryError>> + Send;

    /// 현재 이벤트를 받을 수 있는지 반환합니다. 블로킹하지 않아야 합니다.
    fn is_running(&self) -> Result<bool, LogferryError>;

    /// 파이프라인 종료 시 한 번 호출됩니다.
    ///
    /// `output()`이 이미 받아 둔 데이터를 내보내고 백그라운드 작업을 끝냅니다.
    /// 반환 후에는 이 출력의 태스크가 남아 있지 않아야 합니다.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// dyn-compatible 출력 trait
pub trait DynOutput: Send + Sync {
    fn name(&self) -> &str;

    fn output(
        &self,
        cancel: CancellationToken,
        event: LogEvent,
    ) -> BoxFuture<'_, Result<(), LogferryError>>;

    fn is_running(&self) -> Result<bool, LogferryError>;

    fn close(&self) -> BoxFuture<'_, ()>;
}

impl<T: Output> DynOutput for T {
    fn name(&self) -> &str {
        Output::name(self)
    }

    fn output(
        &self,
        cancel: CancellationToken,
        event: LogEvent,
    ) -> BoxFuture<'_, Result<(), LogferryError>> {
        Box::pin(Output::output(self, cancel, event))
    }

    fn is_running(&self) -> Result<bool, LogferryError> {
        Output::is_running(self)
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(Output::close(self))
    }
}

// ─── AssemblyContext ─────────────────────────────────────────────────

/// 생성자에 전달되는 조립 컨텍스트
///
/// 입력/출력 생성자는 이를 통해 자기 코덱을 해석합니다.
pub struct AssemblyContext<'a> {
    registry: &'a PluginRegistry,
}

impl<'a> AssemblyContext<'a> {
    /// 레지스트리 참조로 컨텍스트를 생성합니다.
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    /// 레지스트리 참조
    pub fn registry(&self) -> &'a PluginRegistry {
        self.registry
    }

    /// 플러그인 설정의 `codec` 필드로 코덱을 생성합니다.
    ///
    /// - 필드 없음: `default_type` 코덱
    /// - `null`: 코덱 없음 (`None`)
    /// - 문자열/객체: 지정한 코덱
    pub fn resolve_codec(
        &self,
        raw: &PluginConfig,
        default_type: &str,
    ) -> Result<Option<Arc<dyn DynCodec>>, LogferryError> {
        let codec = match raw.codec_spec()? {
            CodecSpec::Disabled => return Ok(None),
            CodecSpec::Default => self.registry.build_codec(&PluginConfig::new(default_type))?,
            CodecSpec::Configured(cfg) => self.registry.build_codec(&cfg)?,
        };
        Ok(Some(Arc::from(codec)))
    }
}

// ─── PluginRegistry ──────────────────────────────────────────────────

/// 플러그인 생성자
pub type Constructor<T> =
    Box<dyn Fn(&AssemblyContext<'_>, &PluginConfig) -> Result<T, LogferryError> + Send + Sync>;

/// 입력 생성자
pub type InputConstructor = Constructor<Box<dyn DynInput>>;
/// 필터 생성자
pub type FilterConstructor = Constructor<Box<dyn DynFilter>>;
/// 출력 생성자
pub type OutputConstructor = Constructor<Box<dyn DynOutput>>;
/// 코덱 생성자
pub type CodecConstructor = Constructor<Box<dyn DynCodec>>;

struct ConstructorTable<T> {
    category: PluginCategory,
    entries: HashMap<String, Constructor<T>>,
}

impl<T> ConstructorTable<T> {
    fn new(category: PluginCategory) -> Self {
        Self {
            category,
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, name: String, ctor: Constructor<T>) {
        if self.entries.insert(name.clone(), ctor).is_some() {
            debug!(category = %self.category, name, "replaced registered constructor");
        } else {
            debug!(category = %self.category, name, "registered constructor");
        }
    }

    fn resolve(&self, name: &str) -> Result<&Constructor<T>, PluginError> {
        self.entries.get(name).ok_or_else(|| PluginError::UnknownType {
            category: self.category,
            name: name.to_owned(),
        })
    }

    fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// 플러그인 레지스트리
///
/// 카테고리마다 독립된 이름 공간을 가지며, 같은 이름으로 다시 등록하면
/// 이전 생성자를 덮어씁니다. 등록은 조립 전에 끝나야 하며 이후로는 읽기 전용입니다.
///
/// # 사용 예시
/// ```ignore
/// let mut registry = PluginRegistry::new();
/// registry.register_output("stdout", |ctx, raw| {
///     Ok(Box::new(StdoutOutput::from_config(ctx, raw)?))
/// });
///
/// let output = registry.build_output(&PluginConfig::new("stdout"))?;
/// ```
pub struct PluginRegistry {
    inputs: ConstructorTable<Box<dyn DynInput>>,
    filters: ConstructorTable<Box<dyn DynFilter>>,
    outputs: ConstructorTable<Box<dyn DynOutput>>,
    codecs: ConstructorTable<Box<dyn DynCodec>>,
}

impl PluginRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            inputs: ConstructorTable::new(PluginCategory::Input),
            filters: ConstructorTable::new(PluginCategory::Filter),
            outputs: ConstructorTable::new(PluginCategory::Output),
            codecs: ConstructorTable::new(PluginCategory::Codec),
        }
    }

    // --- 등록 ---

    /// 입력 생성자를 등록합니다.
    pub fn register_input<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&AssemblyContext<'_>, &PluginConfig) -> Result<Box<dyn DynInput>, LogferryError>
            + Send
            + Sync
            + 'static,
    {
        self.inputs.insert(name.into(), Box::new(ctor));
    }

    /// 필터 생성자를 등록합니다.
    pub fn register_filter<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&AssemblyContext<'_>, &PluginConfig) -> Result<Box<dyn DynFilter>, LogferryError>
            + Send
            + Sync
            + 'static,
    {
        self.filters.insert(name.into(), Box::new(ctor));
    }

    /// 출력 생성자를 등록합니다.
    pub fn register_output<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&AssemblyContext<'_>, &PluginConfig) -> Result<Box<dyn DynOutput>, LogferryError>
            + Send
            + Sync
            + 'static,
    {
        self.outputs.insert(name.into(), Box::new(ctor));
    }

    /// 코덱 생성자를 등록합니다.
    pub fn register_codec<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&AssemblyContext<'_>, &PluginConfig) -> Result<Box<dyn DynCodec>, LogferryError>
            + Send
            + Sync
            + 'static,
    {
        self.codecs.insert(name.into(), Box::new(ctor));
    }

    // --- 조회 ---

    /// 입력 생성자를 조회합니다.
    pub fn input(&self, name: &str) -> Result<&InputConstructor, PluginError> {
        self.inputs.resolve(name)
    }

    /// 필터 생성자를 조회합니다.
    pub fn filter(&self, name: &str) -> Result<&FilterConstructor, PluginError> {
        self.filters.resolve(name)
    }

    /// 출력 생성자를 조회합니다.
    pub fn output(&self, name: &str) -> Result<&OutputConstructor, PluginError> {
        self.outputs.resolve(name)
    }

    /// 코덱 생성자를 조회합니다.
    pub fn codec(&self, name: &str) -> Result<&CodecConstructor, PluginError> {
        self.codecs.resolve(name)
    }

    /// 등록 여부
    pub fn contains(&self, category: PluginCategory, name: &str) -> bool {
        match category {
            PluginCategory::Input => self.inputs.entries.contains_key(name),
            PluginCategory::Filter => self.filters.entries.contains_key(name),
            PluginCategory::Output => self.outputs.entries.contains_key(name),
            PluginCategory::Codec => self.codecs.entries.contains_key(name),
        }
    }

    /// 카테고리에 등록된 타입 이름 (정렬됨)
    pub fn names(&self, category: PluginCategory) -> Vec<&str> {
        match category {
            PluginCategory::Input => self.inputs.names(),
            PluginCategory::Filter => self.filters.names(),
            PluginCategory::Output => self.outputs.names(),
            PluginCategory::Codec => self.codecs.names(),
        }
    }

    // --- 생성 ---

    /// 설정의 `type`으로 입력을 생성합니다.
    pub fn build_input(&self, raw: &PluginConfig) -> Result<Box<dyn DynInput>, LogferryError> {
        self.build(&self.inputs, raw)
    }

    /// 설정의 `type`으로 필터를 생성합니다.
    pub fn build_filter(&self, raw: &PluginConfig) -> Result<Box<dyn DynFilter>, LogferryError> {
        self.build(&self.filters, raw)
    }

    /// 설정의 `type`으로 출력을 생성합니다.
    pub fn build_output(&self, raw: &PluginConfig) -> Result<Box<dyn DynOutput>, LogferryError> {
        self.build(&self.outputs, raw)
    }

    /// 설정의 `type`으로 코덱을 생성합니다.
    pub fn build_codec(&self, raw: &PluginConfig) -> Result<Box<dyn DynCodec>, LogferryError> {
        self.build(&self.codecs, raw)
    }

    fn build<T>(&self, table: &ConstructorTable<T>, raw: &PluginConfig) -> Result<T, LogferryError> {
        let name = raw.type_name().ok_or(PluginError::MissingTypeField {
            category: table.category,
        })?;
        let ctor = table.resolve(name)?;
        let ctx = AssemblyContext::new(self);
        ctor(&ctx, raw).map_err(|e| {
            PluginError::InitFailed {
                category: table.category,
                name: name.to_owned(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("inputs", &self.inputs.names())
            .field("filters", &self.filters.names())
            .field("outputs", &self.outputs.names())
            .field("codecs", &self.codecs.names())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
