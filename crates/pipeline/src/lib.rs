//! logferry 파이프라인 엔진
//!
//! 정의 문서로 플러그인을 조립하고, 입력 → 필터 체인 → 출력 팬아웃을
//! 채널로 연결하여 실행합니다.
//!
//! # 모듈 구성
//!
//! - [`pipeline`]: 조립, 시작, 드레인, 종료 ([`Pipeline`])
//! - [`chain`]: 필터 체인과 필터 드라이버 태스크
//! - [`dispatch`]: 출력 팬아웃과 헬스/일시정지 모니터
//! - [`builtin`]: 기본 제공 플러그인 등록
//! - [`codec`]: `default`, `json` 코덱
//! - [`input`]: `socket`, `file` 입력
//! - [`filter`]: `add_field`, `remove_field`, `rate_limit`, `typeconv`, `json` 필터
//! - [`output`]: `stdout`, `tcp` 출력과 재시도 정책
//!
//! # 아키텍처
//!
//! ```text
//! Inputs --(chsize)--> FilterChain --(chsize)--> Dispatcher --> Output x N
//!   |                                               |
//!   +--------------- PauseFlag <-- is_running() ----+
//! ```

pub mod builtin;
pub mod chain;
pub mod dispatch;
pub mod pipeline;

pub mod codec;
pub mod filter;
pub mod input;
pub mod output;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{Pipeline, PipelineState};

// 내부 단계
pub use chain::FilterChain;
pub use dispatch::Dispatcher;

// 레지스트리 초기화
pub use builtin::{default_registry, register_builtins};

// 재시도
pub use output::{BackoffStrategy, RetryDecision, RetryPolicy, RetryTracker};
