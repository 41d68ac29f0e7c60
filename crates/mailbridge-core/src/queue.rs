//! Per-backend admission queue.
//!
//! Bounds concurrent IMAP work, enforces a per-second dispatch ceiling,
//! applies exponential backoff with jitter after failures, honors an
//! externally armed cooldown, and retries failed work a bounded number of
//! times from the head of the queue.
//!
//! The queue is an actor: one driver task owns all state and is fed by an
//! unbounded channel. Work runs in spawned tasks; completions flow back
//! through the same channel, so no lock is ever held across an await.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, sleep_until};

use crate::error::{Error, Result};

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type JobFn = Box<dyn Fn() -> BoxFuture + Send>;
type RejectFn = Box<dyn FnOnce(Error) + Send>;

/// Tunables for one backend's queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum jobs running at once.
    pub max_concurrent: usize,
    /// Maximum job starts in any rolling second.
    pub max_per_second: usize,
    /// First backoff step after a failure.
    pub base_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Retries per job before rejecting the caller.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_per_second: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Snapshot of queue state for observability.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Jobs waiting for dispatch.
    pub queue_length: usize,
    /// Jobs currently running.
    pub active: usize,
    /// Concurrency bound.
    pub max_concurrent: usize,
    /// Consecutive failures feeding the backoff.
    pub consecutive_failures: u32,
    /// Milliseconds until the external cooldown lifts, if armed.
    pub rate_limited_for_ms: Option<u64>,
}

struct Pending {
    run: JobFn,
    reject: RejectFn,
    retry_count: u32,
}

enum QueueMsg {
    Enqueue(Pending),
    SetRateLimited(Duration),
    Completed {
        pending: Pending,
        error: Option<Error>,
    },
    Shutdown,
}

/// Handle to one backend's admission queue.
#[derive(Clone)]
pub struct AdmissionQueue {
    tx: mpsc::UnboundedSender<QueueMsg>,
    stats: Arc<Mutex<QueueStats>>,
}

impl AdmissionQueue {
    /// Creates the queue and spawns its driver task.
    #[must_use]
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(QueueStats {
            max_concurrent: config.max_concurrent,
            ..QueueStats::default()
        }));

        let driver = Driver {
            name: name.into(),
            config,
            rx,
            tx: tx.clone(),
            queue: VecDeque::new(),
            active: 0,
            started: VecDeque::new(),
            failures: 0,
            cooldown_until: None,
            backoff_until: None,
            wake_at: None,
            shutting_down: false,
            stats: stats.clone(),
        };
        tokio::spawn(driver.run());

        Self { tx, stats }
    }

    /// Enqueues work and awaits its final outcome.
    ///
    /// `make` is called once per attempt, so the work must be restartable;
    /// retryable failures are retried up to the configured bound, then the
    /// last error is returned. Non-retryable errors (not-found,
    /// not-routable) are returned immediately without tripping the
    /// backoff.
    ///
    /// # Errors
    ///
    /// Returns the work's error, or [`Error::Shutdown`] when the queue is
    /// draining.
    pub async fn enqueue<T, F, Fut>(&self, make: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T>>();
        let slot = Arc::new(Mutex::new(Some(result_tx)));
        let make = Arc::new(make);

        let run_slot = slot.clone();
        let run: JobFn = Box::new(move || {
            let make = make.clone();
            let slot = run_slot.clone();
            Box::pin(async move {
                match (*make)().await {
                    Ok(value) => {
                        deliver(&slot, Ok(value));
                        Ok(())
                    }
                    Err(e) if !e.is_retryable() => {
                        deliver(&slot, Err(e));
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            })
        });

        let reject: RejectFn = Box::new(move |e| deliver(&slot, Err(e)));

        self.tx
            .send(QueueMsg::Enqueue(Pending {
                run,
                reject,
                retry_count: 0,
            }))
            .map_err(|_| Error::Shutdown)?;

        result_rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Arms the cooldown: no dispatch until `seconds` from now.
    ///
    /// Called when the HTTP rate limiter emits a 429, propagating
    /// user-facing back-pressure down to IMAP.
    pub fn set_rate_limited(&self, seconds: u64) {
        let _ = self
            .tx
            .send(QueueMsg::SetRateLimited(Duration::from_secs(seconds)));
    }

    /// Drains the queue, rejecting all pending work with `Shutdown`.
    pub fn shutdown(&self) {
        let _ = self.tx.send(QueueMsg::Shutdown);
    }

    /// Current queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

fn deliver<T>(slot: &Mutex<Option<oneshot::Sender<Result<T>>>>, result: Result<T>) {
    let sender = slot
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(result);
    }
}

struct Driver {
    name: String,
    config: QueueConfig,
    rx: mpsc::UnboundedReceiver<QueueMsg>,
    tx: mpsc::UnboundedSender<QueueMsg>,
    queue: VecDeque<Pending>,
    active: usize,
    started: VecDeque<Instant>,
    failures: u32,
    cooldown_until: Option<Instant>,
    backoff_until: Option<Instant>,
    wake_at: Option<Instant>,
    shutting_down: bool,
    stats: Arc<Mutex<QueueStats>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle(msg);
                }
                () = maybe_sleep(self.wake_at), if self.wake_at.is_some() => {
                    self.wake_at = None;
                }
            }

            self.drive();
            self.publish_stats();

            if self.shutting_down && self.active == 0 && self.queue.is_empty() {
                break;
            }
        }
    }

    fn handle(&mut self, msg: QueueMsg) {
        match msg {
            QueueMsg::Enqueue(pending) => {
                if self.shutting_down {
                    (pending.reject)(Error::Shutdown);
                } else {
                    self.queue.push_back(pending);
                }
            }
            QueueMsg::SetRateLimited(duration) => {
                tracing::warn!(queue = %self.name, ?duration, "cooldown armed");
                self.cooldown_until = Some(Instant::now() + duration);
            }
            QueueMsg::Completed { pending, error } => {
                self.active -= 1;
                match error {
                    None => self.failures = 0,
                    Some(e) => self.job_failed(pending, e),
                }
                // Safety tick after every completion.
                self.wake_no_later_than(Instant::now() + Duration::from_millis(100));
            }
            QueueMsg::Shutdown => {
                self.shutting_down = true;
                for pending in self.queue.drain(..) {
                    (pending.reject)(Error::Shutdown);
                }
            }
        }
    }

    fn job_failed(&mut self, mut pending: Pending, error: Error) {
        self.failures += 1;

        if let Error::RateLimited(seconds) = error {
            self.cooldown_until = Some(Instant::now() + Duration::from_secs(seconds));
        } else if error.is_rate_limited() {
            // Provider-side throttle without an explicit horizon.
            self.cooldown_until = Some(Instant::now() + Duration::from_secs(30));
        }

        if pending.retry_count < self.config.max_retries && !self.shutting_down {
            pending.retry_count += 1;
            tracing::debug!(
                queue = %self.name,
                retry = pending.retry_count,
                %error,
                "retrying from queue head"
            );
            self.queue.push_front(pending);
        } else {
            tracing::warn!(queue = %self.name, %error, "job rejected after retries");
            (pending.reject)(error);
        }
    }

    /// Dispatches as much queued work as the gates allow.
    fn drive(&mut self) {
        loop {
            if self.shutting_down || self.queue.is_empty() {
                return;
            }
            if self.active >= self.config.max_concurrent {
                return;
            }

            let now = Instant::now();

            if let Some(until) = self.cooldown_until {
                if now < until {
                    let wake = (until + Duration::from_millis(100))
                        .min(now + Duration::from_secs(5));
                    self.wake_no_later_than(wake);
                    return;
                }
                self.cooldown_until = None;
            }

            while let Some(&front) = self.started.front() {
                if now.duration_since(front) > Duration::from_secs(1) {
                    self.started.pop_front();
                } else {
                    break;
                }
            }
            if self.started.len() >= self.config.max_per_second {
                self.wake_no_later_than(now + Duration::from_millis(150));
                return;
            }

            if self.failures > 0 {
                match self.backoff_until {
                    Some(until) if now >= until => {
                        // One successful wait earns one dispatch.
                        self.failures -= 1;
                        self.backoff_until = None;
                    }
                    Some(until) => {
                        self.wake_no_later_than(until);
                        return;
                    }
                    None => {
                        let delay = self.backoff_delay();
                        self.backoff_until = Some(now + delay);
                        self.wake_no_later_than(now + delay);
                        return;
                    }
                }
            }

            let Some(pending) = self.queue.pop_front() else {
                return;
            };
            self.active += 1;
            self.started.push_back(now);

            let tx = self.tx.clone();
            tokio::spawn(async move {
                let error = (pending.run)().await.err();
                let _ = tx.send(QueueMsg::Completed { pending, error });
            });
        }
    }

    /// `min(base * 2^(failures-1), max)` with ±25% jitter.
    fn backoff_delay(&self) -> Duration {
        let exponent = self.failures.saturating_sub(1).min(16);
        let unjittered = self
            .config
            .base_backoff
            .saturating_mul(1 << exponent)
            .min(self.config.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        unjittered.mul_f64(jitter)
    }

    fn wake_no_later_than(&mut self, at: Instant) {
        self.wake_at = Some(self.wake_at.map_or(at, |current| current.min(at)));
    }

    fn publish_stats(&self) {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        stats.queue_length = self.queue.len();
        stats.active = self.active;
        stats.consecutive_failures = self.failures;
        stats.rate_limited_for_ms = self.cooldown_until.and_then(|until| {
            let now = Instant::now();
            (until > now).then(|| until.duration_since(now).as_millis().try_into().unwrap_or(u64::MAX))
        });
    }
}

async fn maybe_sleep(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
