//! 코덱 모듈: 원시 데이터와 이벤트 간 변환
//!
//! - [`default`]: 텍스트를 그대로 `message`로 옮기는 기본 코덱
//! - [`json`]: JSON 객체를 이벤트로 디코딩하고 이벤트를 JSON으로 인코딩

pub mod default;
pub mod json;

pub use default::DefaultCodec;
pub use json::{JsonCodec, JsonCodecConfig};

/// 기본 코덱 디코딩 실패 태그
pub const DEFAULT_CODEC_ERROR_TAG: &str = "logferry_codec_default_error";

/// JSON 코덱 디코딩 실패 태그
pub const JSON_CODEC_ERROR_TAG: &str = "logferry_codec_json_error";
