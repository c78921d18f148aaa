//! logferry 공통 기반 크레이트
//!
//! 파이프라인을 구성하는 모든 크레이트가 공유하는 타입을 정의합니다.
//!
//! - [`event`]: 파이프라인을 흐르는 [`LogEvent`]
//! - [`plugin`]: 입력/필터/출력/코덱 계약과 [`PluginRegistry`]
//! - [`config`]: [`PipelineDefinition`] 정의 문서
//! - [`backpressure`]: 출력 상태 기반 [`PauseFlag`]
//! - [`error`]: 도메인별 에러
//! - [`metrics`]: 메트릭 이름 상수

pub mod backpressure;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod plugin;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{
    CodecError, ConfigError, LogferryError, PipelineError, PluginCategory, PluginError,
};

// 설정
pub use config::{CodecSpec, PipelineDefinition, PluginConfig};

// 이벤트
pub use event::LogEvent;

// 역압
pub use backpressure::PauseFlag;

// 플러그인 계약
pub use plugin::{
    AssemblyContext, BoxFuture, Codec, CodecInput, DecodeOutcome, DynCodec, DynFilter, DynInput,
    DynOutput, Filter, Input, InputContext, Output, PluginRegistry,
};
