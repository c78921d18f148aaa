//! 필터 모듈: 이벤트 변환
//!
//! - [`add_field`]: 템플릿 값으로 필드 추가
//! - [`remove_field`]: 필드 제거
//! - [`rate_limit`]: 토큰 버킷으로 처리 속도 제한 (지연, 버리지 않음)
//! - [`typeconv`]: 필드 타입 변환
//! - [`json`]: 문자열 필드를 JSON 객체로 파싱

pub mod add_field;
pub mod json;
pub mod rate_limit;
pub mod remove_field;
pub mod typeconv;

pub use add_field::{AddFieldConfig, AddFieldFilter};
pub use json::{JsonFilter, JsonFilterConfig};
pub use rate_limit::{RateLimitConfig, RateLimitFilter};
pub use remove_field::{RemoveFieldConfig, RemoveFieldFilter};
pub use typeconv::{ConvType, TypeConvConfig, TypeConvFilter};

/// typeconv 변환 실패 태그
pub const TYPECONV_ERROR_TAG: &str = "logferry_filter_typeconv_error";

/// json 필터 파싱 실패 태그
pub const JSON_FILTER_ERROR_TAG: &str = "logferry_filter_json_error";
