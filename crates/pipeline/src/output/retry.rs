//! 출력 재시도 정책과 추적기
//!
//! [`RetryTracker`]는 페이로드 내용의 SHA-256 다이제스트를 키로 실패 횟수를
//! 기록합니다. 같은 내용의 페이로드가 다시 실패하면 같은 항목으로 집계되며,
//! 한도를 넘으면 [`RetryDecision::Exhausted`]를 돌려주고 항목을 지웁니다.
//! 포기한 페이로드는 호출자가 에러 로그와 함께 버립니다.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// 기본 최대 재시도 횟수
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// 기본 초기 백오프 (ms)
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
/// 기본 최대 백오프 (ms)
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// 백오프 전략
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// 시도마다 두 배 (최대 백오프에서 멈춤)
    #[default]
    Exponential,
    /// 항상 초기 백오프
    Fixed,
}

/// 재시도 정책
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최초 시도 이후 허용되는 재시도 횟수
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            strategy: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// `attempt`번째 재시도(1부터) 전에 기다릴 시간
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.initial_backoff,
            BackoffStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.initial_backoff.saturating_mul(1 << shift)
            }
        };
        delay.min(self.max_backoff)
    }
}

/// 실패 기록 후의 판단
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// `delay` 후 `attempt`번째 재시도
    Retry { attempt: u32, delay: Duration },
    /// 한도 초과, 포기
    Exhausted { attempts: u32 },
}

type PayloadDigest = [u8; 32];

fn digest(payload: &[u8]) -> PayloadDigest {
    Sha256::digest(payload).into()
}

/// 페이로드별 재시도 추적기
#[derive(Debug, Default)]
pub struct RetryTracker {
    policy: RetryPolicy,
    failures: HashMap<PayloadDigest, u32>,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 전송 실패를 기록하고 다음 행동을 결정합니다.
    pub fn record_failure(&mut self, payload: &[u8]) -> RetryDecision {
        let key = digest(payload);
        let failures = self.failures.entry(key).or_insert(0);
        *failures += 1;
        let failures = *failures;

        if failures > self.policy.max_retries {
            self.failures.remove(&key);
            return RetryDecision::Exhausted { attempts: failures };
        }
        RetryDecision::Retry {
            attempt: failures,
            delay: self.policy.delay_for(failures),
        }
    }

    /// 전송 성공 시 추적 항목을 지웁니다.
    pub fn record_success(&mut self, payload: &[u8]) {
        self.failures.remove(&digest(payload));
    }

    /// 재시도 대기 중인 페이로드 수
    pub fn pending(&self) -> usize {
        self.failures.len()
    }
}
