//! 일시정지 플래그: 출력 상태에 따른 입력 역압
//!
//! 디스패치 루프가 유일한 쓰기 주체이며, 입력은 읽기만 합니다.
//! 파이프라인마다 하나씩 만들어지므로 여러 파이프라인이 서로 간섭하지 않습니다.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// 파이프라인 단위 일시정지 플래그
///
/// 복제본은 모두 같은 상태를 공유합니다. 초기값은 `false`(진행)입니다.
#[derive(Debug, Clone)]
pub struct PauseFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for PauseFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseFlag {
    /// 진행 상태의 새 플래그를 생성합니다.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// 현재 일시정지 여부
    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    /// 플래그를 설정합니다. 값이 바뀌었으면 `true`를 반환합니다.
    pub fn set_paused(&self, paused: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == paused {
                false
            } else {
                *current = paused;
                true
            }
        })
    }

    /// 상태 변경을 구독합니다.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// 일시정지가 풀릴 때까지 기다립니다.
    ///
    /// 재개되면 `true`, 그 전에 취소되면 `false`를 반환합니다.
    pub async fn wait_resumed(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            res = rx.wait_for(|paused| !*paused) => res.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_unpaused() {
        let flag = PauseFlag::new();
        assert!(!flag.is_paused());
    }

    #[test]
    fn clones_share_state() {
        let flag = PauseFlag::new();
        let reader = flag.clone();
        assert!(flag.set_paused(true));
        assert!(reader.is_paused());
        assert!(!flag.set_paused(true));
        assert!(flag.set_paused(false));
        assert!(!reader.is_paused());
    }

    #[tokio::test]
    async fn wait_resumed_returns_immediately_when_running() {
        let flag = PauseFlag::new();
        let cancel = CancellationToken::new();
        assert!(flag.wait_resumed(&cancel).await);
    }

    #[tokio::test]
    async fn wait_resumed_wakes_on_clear() {
        let flag = PauseFlag::new();
        flag.set_paused(true);

        let writer = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set_paused(false);
        });

        let cancel = CancellationToken::new();
        let resumed = tokio::time::timeout(Duration::from_secs(1), flag.wait_resumed(&cancel))
            .await
            .unwrap();
        assert!(resumed);
    }

    #[tokio::test]
    async fn wait_resumed_stops_on_cancel() {
        let flag = PauseFlag::new();
        flag.set_paused(true);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!flag.wait_resumed(&cancel).await);
    }
}
