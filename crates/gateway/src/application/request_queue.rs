//! Throttled Request Queue
//!
//! Serializes REST calls for one exchange against a requests-per-second
//! budget. Every dispatch restarts a one-second reset timer, so the window is
//! a rolling quiet second rather than a fixed clock boundary. An optional
//! burst budget applies until the first rate-limit rejection, after which the
//! normal budget applies for the rest of the session.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::{ExchangeId, RestFetcher};
use crate::error::FetchError;

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Request budget for one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub requests_per_second: u32,
    pub burst_requests_per_second: Option<u32>,
}

impl RequestLimits {
    pub fn new(requests_per_second: u32) -> Self {
        RequestLimits {
            requests_per_second: requests_per_second.max(1),
            burst_requests_per_second: None,
        }
    }

    pub fn with_burst(mut self, burst_requests_per_second: u32) -> Self {
        self.burst_requests_per_second = Some(burst_requests_per_second.max(1));
        self
    }
}

type Reply = oneshot::Sender<Result<Value, FetchError>>;

struct PendingRequest {
    path: String,
    reply: Reply,
    /// Set when the exchange rejected this request for rate limiting
    exceeded_at: Option<Instant>,
}

struct QueueState {
    pending: VecDeque<PendingRequest>,
    dispatched_in_window: u32,
    burst_active: bool,
    stopped: bool,
    /// Bumped on every timer restart; stale timers see a mismatch and exit
    timer_generation: u64,
}

impl QueueState {
    fn limit(&self, limits: &RequestLimits) -> u32 {
        match limits.burst_requests_per_second {
            Some(burst) if self.burst_active => burst,
            _ => limits.requests_per_second,
        }
    }
}

struct Shared {
    exchange: ExchangeId,
    limits: RequestLimits,
    fetcher: Arc<dyn RestFetcher>,
    state: Mutex<QueueState>,
}

/// Rate-limited FIFO of REST requests. Cheap to clone; clones share the queue.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct ThrottledRequestQueue {
    shared: Arc<Shared>,
}

impl ThrottledRequestQueue {
    pub fn new(exchange: ExchangeId, fetcher: Arc<dyn RestFetcher>, limits: RequestLimits) -> Self {
        ThrottledRequestQueue {
            shared: Arc::new(Shared {
                exchange,
                limits,
                fetcher,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    dispatched_in_window: 0,
                    burst_active: limits.burst_requests_per_second.is_some(),
                    stopped: false,
                    timer_generation: 0,
                }),
            }),
        }
    }

    /// Queue a GET for `path`. Returns at once; the receiver yields exactly
    /// one response.
    ///
    /// Enqueueing also resumes a queue halted by [`Self::stop`].
    pub fn enqueue(&self, path: impl Into<String>) -> oneshot::Receiver<Result<Value, FetchError>> {
        let (reply, response) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            state.pending.push_back(PendingRequest {
                path: path.into(),
                reply,
                exceeded_at: None,
            });
            state.stopped = false;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { drain(&shared) });
        response
    }

    /// Queue a GET and wait for its response
    pub async fn request(&self, path: impl Into<String>) -> Result<Value, FetchError> {
        self.enqueue(path).await.unwrap_or(Err(FetchError::Stopped))
    }

    /// Halt draining. Pending requests stay queued.
    pub fn stop(&self) {
        self.shared.state.lock().stopped = true;
    }

    pub fn is_burst_active(&self) -> bool {
        self.shared.state.lock().burst_active
    }

    /// Budget currently in force
    pub fn current_limit(&self) -> u32 {
        self.shared.state.lock().limit(&self.shared.limits)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

/// Dispatch from the head of the queue while the window has budget left
fn drain(shared: &Arc<Shared>) {
    let mut state = shared.state.lock();
    while !state.stopped && state.dispatched_in_window < state.limit(&shared.limits) {
        let Some(request) = state.pending.pop_front() else {
            break;
        };

        // A request rejected less than a window ago waits for the reset timer
        if let Some(at) = request.exceeded_at
            && at.elapsed() < RATE_WINDOW
        {
            state.pending.push_front(request);
            break;
        }

        state.dispatched_in_window += 1;
        restart_reset_timer(shared, &mut state);

        let task_shared = Arc::clone(shared);
        tokio::spawn(async move { dispatch(task_shared, request).await });
    }
}

async fn dispatch(shared: Arc<Shared>, mut request: PendingRequest) {
    tracing::trace!(exchange = %shared.exchange, path = %request.path, "Dispatching request");

    match shared.fetcher.get(&request.path).await {
        Err(FetchError::RateLimited) => {
            let mut state = shared.state.lock();
            if state.burst_active {
                state.burst_active = false;
                tracing::info!(
                    exchange = %shared.exchange,
                    limit = shared.limits.requests_per_second,
                    "Rate limited, leaving burst mode"
                );
            } else {
                tracing::warn!(exchange = %shared.exchange, path = %request.path, "Rate limited, requeueing");
            }
            request.exceeded_at = Some(Instant::now());
            state.pending.push_front(request);
            restart_reset_timer(&shared, &mut state);
        }
        result => {
            if let Err(e) = &result {
                tracing::warn!(exchange = %shared.exchange, path = %request.path, error = %e, "Request failed");
            }
            // Caller may have gone away; the response is simply discarded
            let _ = request.reply.send(result);
        }
    }
}

/// Zero the window count one second from now, superseding any earlier timer
fn restart_reset_timer(shared: &Arc<Shared>, state: &mut QueueState) {
    state.timer_generation = state.timer_generation.wrapping_add(1);
    let generation = state.timer_generation;
    let shared = Arc::clone(shared);

    tokio::spawn(async move {
        tokio::time::sleep(RATE_WINDOW).await;
        {
            let mut state = shared.state.lock();
            if state.timer_generation != generation {
                return;
            }
            state.dispatched_in_window = 0;
        }
        drain(&shared);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;

    /// Fetcher that records dispatch times and rejects chosen paths once
    #[derive(Default)]
    struct ScriptedFetcher {
        dispatched: Mutex<Vec<(String, Instant)>>,
        reject_once: Mutex<HashSet<String>>,
        fail: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl RestFetcher for ScriptedFetcher {
        async fn get(&self, path: &str) -> Result<Value, FetchError> {
            self.dispatched
                .lock()
                .push((path.to_string(), Instant::now()));
            if self.reject_once.lock().remove(path) {
                return Err(FetchError::RateLimited);
            }
            if self.fail.lock().contains(path) {
                return Err(FetchError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(json!({ "path": path }))
        }
    }

    fn queue(fetcher: &Arc<ScriptedFetcher>, limits: RequestLimits) -> ThrottledRequestQueue {
        ThrottledRequestQueue::new(ExchangeId::new("test"), fetcher.clone(), limits)
    }

    fn dispatched_before(fetcher: &ScriptedFetcher, deadline: Instant) -> usize {
        fetcher
            .dispatched
            .lock()
            .iter()
            .filter(|(_, at)| *at < deadline)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_boundary() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let queue = queue(&fetcher, RequestLimits::new(3));
        let start = Instant::now();

        let responses: Vec<_> = (0..4).map(|i| queue.enqueue(format!("/{i}"))).collect();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fetcher.dispatched.lock().len(), 3);
        assert_eq!(queue.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fetcher.dispatched.lock().len(), 4);
        assert_eq!(dispatched_before(&fetcher, start + RATE_WINDOW), 3);

        for (i, response) in responses.into_iter().enumerate() {
            let value = response.await.unwrap().unwrap();
            assert_eq!(value["path"], format!("/{i}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let queue = queue(&fetcher, RequestLimits::new(1));

        for path in ["/a", "/b", "/c"] {
            let _ = queue.enqueue(path);
        }
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let order: Vec<String> = fetcher
            .dispatched
            .lock()
            .iter()
            .map(|(p, _)| p.clone())
            .collect();
        assert_eq!(order, vec!["/a", "/b", "/c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_downgrade_on_429() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.reject_once.lock().insert("/3".to_string());
        let queue = queue(&fetcher, RequestLimits::new(3).with_burst(6));
        assert!(queue.is_burst_active());
        assert_eq!(queue.current_limit(), 6);
        let start = Instant::now();

        let responses: Vec<_> = (1..=6).map(|i| queue.enqueue(format!("/{i}"))).collect();

        tokio::time::sleep(Duration::from_millis(100)).await;
        // All six go out at once in burst mode
        assert_eq!(fetcher.dispatched.lock().len(), 6);
        assert!(!queue.is_burst_active());
        assert_eq!(queue.current_limit(), 3);

        // Request 3 is retried once the window resets
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let retries: Vec<Instant> = fetcher
            .dispatched
            .lock()
            .iter()
            .filter(|(p, _)| p == "/3")
            .map(|(_, at)| *at)
            .collect();
        assert_eq!(retries.len(), 2);
        assert!(retries[1] >= start + RATE_WINDOW);

        for response in responses {
            assert!(response.await.unwrap().is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_downgrade_is_permanent() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.reject_once.lock().insert("/first".to_string());
        let queue = queue(&fetcher, RequestLimits::new(2).with_burst(5));

        queue.request("/first").await.unwrap();
        assert!(!queue.is_burst_active());

        tokio::time::sleep(Duration::from_secs(5)).await;
        fetcher.dispatched.lock().clear();
        let start = Instant::now();

        let responses: Vec<_> = (0..5).map(|i| queue.enqueue(format!("/{i}"))).collect();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(dispatched_before(&fetcher, start + RATE_WINDOW), 2);

        for response in responses {
            assert!(response.await.unwrap().is_ok());
        }
        assert_eq!(queue.current_limit(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_reach_caller() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.fail.lock().insert("/broken".to_string());
        let queue = queue(&fetcher, RequestLimits::new(5));

        let err = queue.request("/broken").await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Api {
                status: 500,
                message: "boom".to_string()
            }
        );
        // Not retried
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fetcher.dispatched.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_draining() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let queue = queue(&fetcher, RequestLimits::new(1));

        let _first = queue.enqueue("/a");
        let _second = queue.enqueue("/b");
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.stop();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fetcher.dispatched.lock().len(), 1);
        assert_eq!(queue.pending_count(), 1);

        // Enqueue resumes draining
        let third = queue.enqueue("/c");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fetcher.dispatched.lock().len(), 3);
        assert!(third.await.unwrap().is_ok());
    }
}
