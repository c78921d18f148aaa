//! 에러 타입: 도메인별 에러 정의
//!
//! 조립(assembly) 에러는 파이프라인 시작 자체를 막고, 실행 중 에러는
//! 로그와 태그로만 드러납니다. 상위 레이어는 [`LogferryError`] 하나로
//! `?` 전파를 합니다.

use std::fmt;

/// logferry 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogferryError {
    /// 설정/정의 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 플러그인 조립/실행 에러
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 코덱 에러
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// `codec` 필드가 문자열/객체/null 중 어느 것도 아님
    #[error("unknown codec config type: {value}")]
    UnknownCodecConfig { value: String },
}

/// 플러그인 카테고리
///
/// 레지스트리는 카테고리마다 독립된 이름 공간을 가집니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCategory {
    Input,
    Filter,
    Output,
    Codec,
}

impl PluginCategory {
    /// 정의 문서의 섹션명
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Filter => "filter",
            Self::Output => "output",
            Self::Codec => "codec",
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 플러그인 조립/실행 에러
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// 레지스트리에 등록되지 않은 타입
    #[error("unknown {category} type: {name:?}")]
    UnknownType {
        category: PluginCategory,
        name: String,
    },

    /// 생성자 실패
    #[error("initialize {category} {name:?} failed: {reason}")]
    InitFailed {
        category: PluginCategory,
        name: String,
        reason: String,
    },

    /// `type` 필드 누락
    #[error("{category} #{index} has no 'type' field")]
    MissingType {
        category: PluginCategory,
        index: usize,
    },

    /// 정의 목록 밖에서 직접 생성할 때 `type` 필드 누락
    #[error("{category} config has no 'type' field")]
    MissingTypeField { category: PluginCategory },

    /// 실행 중 플러그인 실패 (필터/출력 처리 중)
    #[error("{name}: {reason}")]
    Failed { name: String, reason: String },
}

impl PluginError {
    /// 실행 중 실패 에러를 생성합니다.
    pub fn failed(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Failed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 이미 시작된 파이프라인을 다시 시작
    #[error("pipeline already started")]
    AlreadyStarted,

    /// 조립되지 않은 상태에서 실행 요청
    #[error("pipeline is not assembled (state: {0})")]
    NotAssembled(String),

    /// 대기 시간 안에 출력 이벤트가 없음
    #[error("no event within {timeout_ms}ms")]
    NoEvent { timeout_ms: u64 },

    /// debugch 비활성 상태에서 테스트 채널 사용
    #[error("debug channel is disabled (set 'debugch: true')")]
    DebugChannelDisabled,

    /// 모든 입력이 에러로 종료됨
    #[error("all {count} inputs failed, last error: {last_error}")]
    AllInputsFailed { count: usize, last_error: String },
}

/// 코덱 에러
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// 디코딩 실패
    #[error("decode data error: {0}")]
    DecodeFailed(String),

    /// 코덱이 처리할 수 없는 입력 형태
    #[error("unsupported data for codec {codec:?}: {kind}")]
    UnsupportedData { codec: String, kind: String },

    /// 구현되지 않은 연산
    #[error("{0:?} is not implemented")]
    NotImplemented(String),

    /// 인코딩 실패
    #[error("encode event failed: {0}")]
    EncodeFailed(String),
}
