//! rate_limit 필터
//!
//! 토큰 버킷으로 초당 처리량을 제한합니다. 토큰이 없으면 이벤트를 버리지 않고
//! 다음 토큰이 생길 때까지 기다립니다. 필터 체인이 순차적이므로 대기는 곧
//! 상위 입력에 대한 역압이 됩니다.
//!
//! 버킷은 `burst`개의 토큰으로 가득 찬 상태에서 시작합니다.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use logferry_core::config::PluginConfig;
use logferry_core::error::{ConfigError, LogferryError};
use logferry_core::event::LogEvent;
use logferry_core::plugin::Filter;

/// rate_limit 필터 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 초당 허용 이벤트 수
    pub rate: f64,
    /// 버킷 크기 (연속 허용 이벤트 수)
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rate: 0.0, burst: 1 }
    }
}

/// rate_limit 필터
#[derive(Debug)]
pub struct RateLimitFilter {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimitFilter {
    pub fn new(config: RateLimitConfig) -> Result<Self, LogferryError> {
        if !config.rate.is_finite() || config.rate <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "rate".to_owned(),
                reason: format!("must be a positive number, got {}", config.rate),
            }
            .into());
        }
        if config.burst == 0 {
            return Err(ConfigError::InvalidValue {
                field: "burst".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
            .into());
        }

        let capacity = f64::from(config.burst);
        Ok(Self {
            rate: config.rate,
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        })
    }

    pub fn from_config(raw: &PluginConfig) -> Result<Self, LogferryError> {
        Self::new(raw.decode()?)
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// 토큰 하나를 얻을 때까지 기다립니다.
    async fn acquire(&mut self) {
        self.refill();
        if self.tokens < 1.0 {
            let wait = Duration::from_secs_f64((1.0 - self.tokens) / self.rate);
            tokio::time::sleep(wait).await;
            self.refill();
        }
        self.tokens = (self.tokens - 1.0).max(0.0);
    }
}

impl Filter for RateLimitFilter {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn filter(&mut self, event: LogEvent) -> Result<Vec<LogEvent>, LogferryError> {
        self.acquire().await;
        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rate: f64, burst: u32) -> RateLimitFilter {
        RateLimitFilter::new(RateLimitConfig { rate, burst }).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_events_at_configured_rate() {
        let mut f = limiter(10.0, 1);
        let start = Instant::now();
        let mut stamps = Vec::new();

        for i in 0..5 {
            let out = f.filter(LogEvent::new(format!("e{i}"))).await.unwrap();
            assert_eq!(out.len(), 1);
            stamps.push(start.elapsed());
        }

        let total = stamps[4];
        assert!(
            total >= Duration::from_millis(390) && total <= Duration::from_millis(450),
            "5 events at 10/s should take ~400ms, took {total:?}"
        );
        for pair in stamps.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(90), "gap too small: {gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_passes_immediately_after_idle() {
        let mut f = limiter(10.0, 4);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let start = Instant::now();
        for i in 0..6 {
            f.filter(LogEvent::new(format!("e{i}"))).await.unwrap();
        }
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(150) && elapsed <= Duration::from_millis(250),
            "4 burst + 2 paced events should take ~200ms, took {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_starts_full() {
        let mut f = limiter(1.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            f.filter(LogEvent::new("x")).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn rejects_non_positive_rate() {
        assert!(RateLimitFilter::new(RateLimitConfig { rate: 0.0, burst: 1 }).is_err());
        assert!(RateLimitFilter::new(RateLimitConfig { rate: -1.0, burst: 1 }).is_err());
        assert!(RateLimitFilter::new(RateLimitConfig { rate: 1.0, burst: 0 }).is_err());
    }
}
