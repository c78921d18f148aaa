//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 단계는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. 레코더가 설치되지 않았으면 호출은 아무 일도 하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logferry_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logferry_core::metrics::EVENTS_DISPATCHED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 플러그인 타입 레이블 키 (socket, stdout, typeconv, ...)
pub const LABEL_PLUGIN: &str = "plugin";

// ─── 파이프라인 메트릭 ──────────────────────────────────────────────

/// 입력에서 수신한 이벤트 수 (counter)
pub const EVENTS_RECEIVED_TOTAL: &str = "logferry_events_received_total";

/// 필터가 빈 결과를 돌려 버려진 이벤트 수 (counter)
pub const EVENTS_FILTERED_OUT_TOTAL: &str = "logferry_events_filtered_out_total";

/// 필터 에러로 버려진 이벤트 수 (counter, label: plugin)
pub const FILTER_ERRORS_TOTAL: &str = "logferry_filter_errors_total";

/// 출력으로 팬아웃된 이벤트 수 (counter)
pub const EVENTS_DISPATCHED_TOTAL: &str = "logferry_events_dispatched_total";

/// 출력 에러 수 (counter, label: plugin)
pub const OUTPUT_ERRORS_TOTAL: &str = "logferry_output_errors_total";

/// 일시정지 상태 (gauge, 1 = paused)
pub const PIPELINE_PAUSED: &str = "logferry_pipeline_paused";

// ─── 출력 재시도 메트릭 ─────────────────────────────────────────────

/// 출력 재시도 횟수 (counter, label: plugin)
pub const OUTPUT_RETRIES_TOTAL: &str = "logferry_output_retries_total";

/// 재시도 한도 초과로 버려진 페이로드 수 (counter, label: plugin)
pub const OUTPUT_DROPPED_TOTAL: &str = "logferry_output_dropped_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        EVENTS_RECEIVED_TOTAL,
        "Total number of events received from all inputs"
    );
    describe_counter!(
        EVENTS_FILTERED_OUT_TOTAL,
        "Events removed from the stream by a filter returning no output"
    );
    describe_counter!(
        FILTER_ERRORS_TOTAL,
        "Events dropped because a filter returned an error"
    );
    describe_counter!(
        EVENTS_DISPATCHED_TOTAL,
        "Total number of events fanned out to outputs"
    );
    describe_counter!(OUTPUT_ERRORS_TOTAL, "Output delivery errors per plugin");
    describe_gauge!(
        PIPELINE_PAUSED,
        "Whether inputs are paused because an output is unhealthy (1 = paused)"
    );
    describe_counter!(OUTPUT_RETRIES_TOTAL, "Output delivery retries per plugin");
    describe_counter!(
        OUTPUT_DROPPED_TOTAL,
        "Payloads dropped after exhausting the retry budget"
    );
}
