//! 필터 체인과 필터 드라이버 태스크
//!
//! 입력 채널에서 이벤트를 하나씩 꺼내 필터를 정의 순서대로 적용하고
//! 결과를 디스패치 채널로 보냅니다.
//!
//! 취소되면 입력 채널을 닫아 새 전송을 막고, 이미 버퍼에 있는 이벤트를
//! 모두 체인에 통과시킨 뒤 디스패치 채널 송신측을 drop합니다.

use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logferry_core::event::LogEvent;
use logferry_core::metrics as m;
use logferry_core::plugin::DynFilter;

/// 순서가 있는 필터 목록
pub struct FilterChain {
    filters: Vec<Box<dyn DynFilter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn DynFilter>>) -> Self {
        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// 필터 타입 이름 (적용 순서)
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// 이벤트 하나를 체인에 통과시킵니다.
    ///
    /// 필터가 빈 결과를 돌려주면 그 이벤트는 거기서 멈춥니다. 필터 에러는
    /// 해당 이벤트만 버리고 나머지 이벤트는 계속 처리합니다.
    pub async fn apply(&mut self, event: LogEvent) -> Vec<LogEvent> {
        let mut batch = vec![event];

        for filter in &mut self.filters {
            let mut next = Vec::with_capacity(batch.len());
            for event in batch {
                match filter.filter(event).await {
                    Ok(out) if out.is_empty() => {
                        counter!(m::EVENTS_FILTERED_OUT_TOTAL).increment(1);
                    }
                    Ok(out) => next.extend(out),
                    Err(e) => {
                        warn!(filter = filter.name(), error = %e, "filter failed, event dropped");
                        counter!(m::FILTER_ERRORS_TOTAL, m::LABEL_PLUGIN => filter.name().to_owned())
                            .increment(1);
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            batch = next;
        }
        batch
    }

    /// 결과를 디스패치 채널로 보냅니다. 채널이 닫혔으면 `false`.
    async fn forward(&mut self, event: LogEvent, tx: &mpsc::Sender<LogEvent>) -> bool {
        for out in self.apply(event).await {
            if tx.send(out).await.is_err() {
                warn!("dispatch channel closed, filter driver stopping");
                return false;
            }
        }
        true
    }

    /// 필터 드라이버 루프
    ///
    /// 모든 입력 송신측이 사라지거나 취소 후 드레인이 끝나면 반환합니다.
    /// 반환 시 `tx`가 drop되어 디스패치 루프가 종료 조건을 봅니다.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<LogEvent>,
        tx: mpsc::Sender<LogEvent>,
        cancel: CancellationToken,
    ) {
        debug!(filters = ?self.names(), "filter driver started");

        loop {
            let event = tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("input channel closed, filter driver stopping");
                        return;
                    }
                },
                _ = cancel.cancelled() => break,
            };
            if !self.forward(event, &tx).await {
                return;
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(event) = rx.recv().await {
            drained += 1;
            if !self.forward(event, &tx).await {
                return;
            }
        }
        info!(drained, "filter driver drained input channel");
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.names())
            .finish()
    }
}
