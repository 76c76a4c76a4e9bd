use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::config::BatchConfig;
use crate::providers::Payload;
use crate::{LinguaError, Result};

/// Delays applied before the first, second, and third retry of one queued
/// request. A request that fails after the table is exhausted is terminal.
const RETRY_BACKOFF_MS: [u64; 3] = [1000, 2000, 4000];

/// Seam between the scheduler and whatever executes a single payload.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, payload: &Payload) -> Result<String>;
}

/// Higher values drain first; ties drain in submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    Default = 1,
    Translation = 2,
    Urgent = 3,
}

struct QueuedRequest {
    payload: Payload,
    priority: RequestPriority,
    retries: u32,
    seq: u64,
    responder: oneshot::Sender<Result<String>>,
}

struct QueueState {
    queue: Vec<QueuedRequest>,
    draining: bool,
    next_seq: u64,
}

/// Priority-queue scheduler for bulk submissions. The drain task starts
/// lazily on the first enqueue and exits when the queue runs dry; the
/// `draining` flag is only cleared under the queue lock, so a concurrent
/// submit either sees the running drain or restarts it, never neither.
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    executor: Arc<dyn RequestExecutor>,
    config: BatchConfig,
    state: Mutex<QueueState>,
}

impl BatchScheduler {
    pub fn new(executor: Arc<dyn RequestExecutor>, config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                config,
                state: Mutex::new(QueueState {
                    queue: Vec::new(),
                    draining: false,
                    next_seq: 0,
                }),
            }),
        }
    }

    /// Enqueues the payload and resolves once the drain task has executed it
    /// (including any retries).
    pub async fn submit(&self, payload: Payload, priority: RequestPriority) -> Result<String> {
        let (responder, receiver) = oneshot::channel();

        let start_drain = {
            let mut state = lock_state(&self.inner.state);
            let seq = state.next_seq;
            state.next_seq = state.next_seq.wrapping_add(1);
            state.queue.push(QueuedRequest {
                payload,
                priority,
                retries: 0,
                seq,
                responder,
            });
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };

        if start_drain {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain().await });
        }

        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(LinguaError::InvalidResponse(
                "batch request was dropped before completion".to_string(),
            )),
        }
    }

    pub fn pending(&self) -> usize {
        lock_state(&self.inner.state).queue.len()
    }
}

impl Inner {
    async fn drain(self: Arc<Self>) {
        loop {
            let group = {
                let mut state = lock_state(&self.state);
                if state.queue.is_empty() {
                    state.draining = false;
                    return;
                }
                state
                    .queue
                    .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
                let take = self.config.batch_size.max(1).min(state.queue.len());
                state.queue.drain(..take).collect::<Vec<_>>()
            };

            tracing::debug!(group = group.len(), "dispatching batch group");
            join_all(group.into_iter().map(|request| self.run_one(request))).await;

            if self.config.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
        }
    }

    async fn run_one(&self, mut request: QueuedRequest) {
        loop {
            match self.executor.execute(&request.payload).await {
                Ok(text) => {
                    let _ = request.responder.send(Ok(text));
                    return;
                }
                Err(err) => {
                    let retries = request.retries as usize;
                    if retries >= RETRY_BACKOFF_MS.len() || !err.is_retryable() {
                        let _ = request.responder.send(Err(err));
                        return;
                    }
                    tracing::debug!(retry = retries + 1, error = %err, "retrying queued request");
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS[retries])).await;
                    request.retries += 1;
                }
            }
        }
    }
}

fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
