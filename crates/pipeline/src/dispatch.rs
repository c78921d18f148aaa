//! 디스패치 루프: 출력 팬아웃과 헬스 모니터
//!
//! 필터 드라이버가 보낸 이벤트를 모든 출력에 동시에 전달하고, 모든 출력이
//! 끝날 때까지 기다린 뒤 다음 이벤트를 꺼냅니다. 느린 출력은 그대로 상위
//! 단계의 역압이 됩니다.
//!
//! 대기 중인 이벤트가 없을 때 `health_check_interval`마다 각 출력의
//! `is_running()`을 확인합니다. 하나라도 false(또는 에러)면 일시정지 플래그를
//! 세우고 `health_retry_interval`마다 다시 확인하며, 그동안 디스패치하지 않습니다.
//! 파이프라인이 취소되면 게이트를 풀어 드레인이 죽은 출력에 막히지 않게 합니다.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logferry_core::backpressure::PauseFlag;
use logferry_core::event::LogEvent;
use logferry_core::metrics as m;
use logferry_core::plugin::DynOutput;

/// 디스패치 루프
pub struct Dispatcher {
    outputs: Vec<Arc<dyn DynOutput>>,
    pause: PauseFlag,
    health_check_interval: Duration,
    health_retry_interval: Duration,
    observer: Option<mpsc::UnboundedSender<LogEvent>>,
}

impl Dispatcher {
    pub fn new(
        outputs: Vec<Arc<dyn DynOutput>>,
        pause: PauseFlag,
        health_check_interval: Duration,
        health_retry_interval: Duration,
    ) -> Self {
        Self {
            outputs,
            pause,
            health_check_interval,
            health_retry_interval,
            observer: None,
        }
    }

    /// 디스패치된 이벤트의 복사본을 받을 관측 채널을 설정합니다.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<LogEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// 비정상 출력의 이름. 모두 정상이면 None.
    fn unhealthy_output(&self) -> Option<String> {
        for output in &self.outputs {
            match output.is_running() {
                Ok(true) => {}
                Ok(false) => return Some(output.name().to_owned()),
                Err(e) => {
                    warn!(output = output.name(), error = %e, "output health check failed");
                    return Some(output.name().to_owned());
                }
            }
        }
        None
    }

    fn set_paused(&self, paused: bool) -> bool {
        let changed = self.pause.set_paused(paused);
        if changed {
            gauge!(m::PIPELINE_PAUSED).set(if paused { 1.0 } else { 0.0 });
        }
        changed
    }

    /// 모든 출력이 정상이 될 때까지(또는 취소될 때까지) 기다립니다.
    async fn wait_healthy(&self, cancel: &CancellationToken) {
        loop {
            match self.unhealthy_output() {
                None => {
                    if self.set_paused(false) {
                        info!("all outputs running, resuming inputs");
                    }
                    return;
                }
                Some(name) => {
                    if self.set_paused(true) {
                        warn!(output = name, "output not running, pausing inputs");
                    } else {
                        debug!(output = name, "output still not running");
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.health_retry_interval) => {}
                _ = cancel.cancelled() => {
                    if self.set_paused(false) {
                        info!("pipeline cancelled, lifting pause for drain");
                    }
                    return;
                }
            }
        }
    }

    /// 이벤트 하나를 모든 출력에 전달하고 전부 끝날 때까지 기다립니다.
    ///
    /// 관측 채널은 모든 출력이 끝난 뒤에 이벤트를 받습니다.
    async fn dispatch(&self, event: LogEvent, cancel: &CancellationToken) {
        let mut set = JoinSet::new();
        for output in &self.outputs {
            let output = Arc::clone(output);
            let token = cancel.child_token();
            let event = event.clone();
            set.spawn(async move {
                let result = output.output(token, event).await;
                (output.name().to_owned(), result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    warn!(output = name.as_str(), error = %e, "output failed");
                    counter!(m::OUTPUT_ERRORS_TOTAL, m::LABEL_PLUGIN => name).increment(1);
                }
                Err(e) => error!(error = %e, "output task panicked"),
            }
        }
        counter!(m::EVENTS_DISPATCHED_TOTAL).increment(1);

        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }

    /// 디스패치 루프
    ///
    /// `rx`가 닫히고 비어 있으면 반환합니다.
    pub async fn run(self, mut rx: mpsc::Receiver<LogEvent>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        debug!(outputs = self.outputs.len(), "dispatch loop started");
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => self.dispatch(event, &cancel).await,
                    None => break,
                },
                _ = ticker.tick(), if !cancel.is_cancelled() => {
                    self.wait_healthy(&cancel).await;
                }
            }
        }

        self.set_paused(false);
        debug!("dispatch loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use logferry_core::error::{LogferryError, PluginError};
    use logferry_core::plugin::Output;

    /// 받은 메시지를 기록하는 출력
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        healthy: AtomicBool,
        fail: bool,
        delay: Duration,
    }

    impl Recorder {
        fn healthy() -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(true),
                ..Self::default()
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Output for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn output(&self, _cancel: CancellationToken, event: LogEvent) -> Result<(), LogferryError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(PluginError::failed("recorder", "sink refused").into());
            }
            self.seen.lock().unwrap().push(event.message);
            Ok(())
        }

        fn is_running(&self) -> Result<bool, LogferryError> {
            Ok(self.healthy.load(Ordering::SeqCst))
        }
    }

    fn dispatcher(outputs: Vec<Arc<dyn DynOutput>>, pause: PauseFlag) -> Dispatcher {
        Dispatcher::new(
            outputs,
            pause,
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn fans_out_to_every_output() {
        let a = Recorder::healthy();
        let b = Recorder::healthy();
        let (tx, rx) = mpsc::channel(8);
        let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
        let d = dispatcher(vec![a.clone() as Arc<dyn DynOutput>, b.clone()], PauseFlag::new())
            .with_observer(obs_tx);

        tx.send(LogEvent::new("one")).await.unwrap();
        tx.send(LogEvent::new("two")).await.unwrap();
        drop(tx);
        d.run(rx, CancellationToken::new()).await;

        assert_eq!(a.seen(), vec!["one", "two"]);
        assert_eq!(b.seen(), vec!["one", "two"]);
        assert_eq!(obs_rx.recv().await.unwrap().message, "one");
        assert_eq!(obs_rx.recv().await.unwrap().message, "two");
    }

    #[tokio::test]
    async fn observer_sees_event_after_outputs_finish() {
        let slow = Arc::new(Recorder {
            healthy: AtomicBool::new(true),
            delay: Duration::from_millis(150),
            ..Recorder::default()
        });
        let (tx, rx) = mpsc::channel(8);
        let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
        let d = dispatcher(vec![slow.clone() as Arc<dyn DynOutput>], PauseFlag::new())
            .with_observer(obs_tx);
        let handle = tokio::spawn(d.run(rx, CancellationToken::new()));

        tx.send(LogEvent::new("x")).await.unwrap();
        let observed = tokio::time::timeout(Duration::from_secs(2), obs_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(observed.message, "x");
        assert_eq!(slow.seen(), vec!["x"]);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failing_output_does_not_block_others() {
        let good = Recorder::healthy();
        let bad = Arc::new(Recorder {
            healthy: AtomicBool::new(true),
            fail: true,
            ..Recorder::default()
        });
        let (tx, rx) = mpsc::channel(8);
        tx.send(LogEvent::new("x")).await.unwrap();
        drop(tx);

        dispatcher(vec![good.clone() as Arc<dyn DynOutput>, bad], PauseFlag::new())
            .run(rx, CancellationToken::new())
            .await;
        assert_eq!(good.seen(), vec!["x"]);
    }

    #[tokio::test]
    async fn unhealthy_output_pauses_and_recovery_resumes() {
        let out = Recorder::healthy();
        out.healthy.store(false, Ordering::SeqCst);
        let pause = PauseFlag::new();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let d = dispatcher(vec![out.clone() as Arc<dyn DynOutput>], pause.clone());
        let handle = tokio::spawn(d.run(rx, cancel.clone()));

        let mut paused = pause.subscribe();
        tokio::time::timeout(Duration::from_secs(2), paused.wait_for(|p| *p))
            .await
            .unwrap()
            .unwrap();

        // 일시정지 동안은 디스패치하지 않음
        tx.send(LogEvent::new("held")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(out.seen().is_empty());

        out.healthy.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), paused.wait_for(|p| !*p))
            .await
            .unwrap()
            .unwrap();

        drop(tx);
        handle.await.unwrap();
        assert_eq!(out.seen(), vec!["held"]);
    }

    #[tokio::test]
    async fn cancel_lifts_pause_and_drains() {
        let out = Recorder::healthy();
        out.healthy.store(false, Ordering::SeqCst);
        let pause = PauseFlag::new();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let d = dispatcher(vec![out.clone() as Arc<dyn DynOutput>], pause.clone());
        let handle = tokio::spawn(d.run(rx, cancel.clone()));
        let mut paused = pause.subscribe();
        tokio::time::timeout(Duration::from_secs(2), paused.wait_for(|p| *p))
            .await
            .unwrap()
            .unwrap();

        tx.send(LogEvent::new("a")).await.unwrap();
        tx.send(LogEvent::new("b")).await.unwrap();
        drop(tx);
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.seen(), vec!["a", "b"]);
        assert!(!pause.is_paused());
    }
}
