//! The public service surface.
//!
//! [`InboxService`] owns every process singleton: the account registry,
//! one admission queue + connection manager + IDLE listener per backend,
//! the three caches, the change-subscriber set, and the HTTP-facing
//! limiters. Collaborators construct it once at startup,
//! pass it to their handlers, and tear it down via [`InboxService::shutdown`].
//!
//! Reads are total: they degrade to stale cache, then to empty, and never
//! surface IMAP failures. Mutations report honestly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant, sleep, sleep_until, timeout};

use crate::account::AccountRegistry;
use crate::alias::{Alias, CatchAll, Route, Router, generate_dot_alias, generate_plus_alias};
use crate::cache::TtlLru;
use crate::config::{Profile, Settings};
use crate::connection::BackendConnection;
use crate::error::{Error, Result};
use crate::idle::{IdleListener, MailboxEvent};
use crate::limiter::{Decision, LimiterSet};
use crate::message::{Message, MessagePayload, Provider, Viewer};
use crate::pipeline;
use crate::queue::{AdmissionQueue, QueueConfig};

const VIEW_CACHE_CAPACITY: usize = 200;
const VIEW_CACHE_TTL: Duration = Duration::from_secs(10);
const STORE_CAPACITY: usize = 500;
const STORE_TTL: Duration = Duration::from_secs(180);
const PAYLOAD_CACHE_CAPACITY: usize = 200;
const PAYLOAD_CACHE_TTL: Duration = Duration::from_secs(180);

/// Union views are truncated to this many messages.
const AGGREGATE_LIMIT: usize = 30;
/// Backends fetched in parallel before batching kicks in.
const FANOUT_BATCH: usize = 3;
/// Pause between fan-out batches.
const BATCH_DELAY: Duration = Duration::from_millis(200);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Which messages a view may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Visibility {
    /// Everything on the route.
    Full,
    /// Alias-addressed mail only.
    AliasOnly,
}

fn visibility_for(viewer: Viewer, provider: Provider) -> Visibility {
    match viewer {
        Viewer::Authenticated => Visibility::Full,
        // Catch-all domain views are public by design.
        Viewer::Anonymous if provider == Provider::Domain => Visibility::Full,
        Viewer::Anonymous => Visibility::AliasOnly,
    }
}

/// Whether one message may appear in a viewer's results.
fn visible(viewer: Viewer, message: &Message) -> bool {
    viewer == Viewer::Authenticated || message.provider == Provider::Domain || message.is_alias
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ViewKey {
    /// Normalized target address, or "*" for the aggregate view.
    target: String,
    scope: Visibility,
}

#[derive(Clone)]
struct CachedView {
    messages: Vec<Message>,
    /// Backend epochs this view was built from; any bump invalidates it.
    epochs: Vec<(String, u64)>,
}

struct Backend {
    connection: Arc<BackendConnection>,
    queue: AdmissionQueue,
    provider: Provider,
}

/// A registered change subscriber.
struct Subscriber {
    id: u64,
    callback: Arc<dyn Fn() + Send + Sync>,
}

/// Capability to remove a change subscriber.
pub struct Subscription {
    id: u64,
    inner: std::sync::Weak<Inner>,
}

impl Subscription {
    /// Deregisters the subscriber. Safe to call from inside the callback.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_subscriber(self.id);
        }
    }
}

/// Public descriptor of one configured account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDescriptor {
    /// Account address.
    pub email: String,
    /// Account provider.
    pub provider: Provider,
    /// True when the viewer may read the backend's own inbox.
    pub direct_inbox: bool,
}

/// Accounts listing with provider availability flags.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsView {
    /// Visible accounts.
    pub accounts: Vec<AccountDescriptor>,
    /// Which providers are configured.
    pub providers: ProviderFlags,
}

/// Provider availability flags.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderFlags {
    /// At least one Gmail account is configured.
    pub gmail: bool,
    /// At least one Outlook account is configured.
    pub outlook: bool,
}

/// Aggregate queue statistics for observability.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Pending jobs across all backends.
    pub queue_length: usize,
    /// Running jobs across all backends.
    pub active_connections: usize,
    /// Sum of concurrency bounds.
    pub max_connections: usize,
    /// Worst consecutive-failure count.
    pub consecutive_failures: u32,
    /// Unix milliseconds until which dispatch is paused, if any queue is
    /// cooling down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited_until: Option<i64>,
}

/// Cache sizes for observability.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Entries in the per-address view cache.
    pub views: usize,
    /// Entries in the global message store.
    pub messages: usize,
    /// Entries in the attachment payload cache.
    pub payloads: usize,
}

/// The `stats()` payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Queue state.
    pub queue: QueueSnapshot,
    /// Cache state.
    pub cache: CacheSnapshot,
    /// When the snapshot was taken.
    pub timestamp: chrono::DateTime<Utc>,
}

/// One attachment ready to serve.
#[derive(Debug, Clone)]
pub struct AttachmentDownload {
    /// Filename for Content-Disposition.
    pub filename: String,
    /// Content type header value.
    pub content_type: String,
    /// Decoded bytes.
    pub data: Vec<u8>,
}

struct Inner {
    registry: AccountRegistry,
    router: Router,
    profile: Profile,
    backends: HashMap<String, Backend>,
    view_cache: TtlLru<ViewKey, CachedView>,
    store: TtlLru<String, Message>,
    payloads: TtlLru<String, Arc<MessagePayload>>,
    epochs: StdMutex<HashMap<String, u64>>,
    inflight: StdMutex<HashMap<ViewKey, broadcast::Sender<Vec<Message>>>>,
    subscribers: StdMutex<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    limiters: LimiterSet,
    shutting_down: AtomicBool,
}

struct RunningTasks {
    listeners: Vec<IdleListener>,
    events_tx: mpsc::UnboundedSender<MailboxEvent>,
    event_loop: tokio::task::JoinHandle<()>,
}

/// The inbox aggregation service.
pub struct InboxService {
    inner: Arc<Inner>,
    tasks: tokio::sync::Mutex<Option<RunningTasks>>,
}

impl InboxService {
    /// Builds the service and spawns its background tasks.
    ///
    /// `catchall` names the mailbox and domains of the catch-all model,
    /// when the deployment has one; the domain list comes from the
    /// collaborator, not the environment.
    ///
    /// # Errors
    ///
    /// Returns configuration errors from registry construction.
    pub fn start(settings: &Settings, catchall: Option<CatchAll>) -> Result<Self> {
        let registry = AccountRegistry::from_settings(settings)?;
        let router = Router::new(registry.accounts(), catchall);
        let profile = settings.profile;

        let queue_config = QueueConfig {
            max_concurrent: profile.max_concurrent(),
            max_per_second: profile.max_per_second(),
            ..QueueConfig::default()
        };

        let mut backends = HashMap::new();
        for account in registry.accounts() {
            let key = account.normalized_address();
            backends.insert(
                key.clone(),
                Backend {
                    connection: Arc::new(BackendConnection::new(account.clone())),
                    queue: AdmissionQueue::new(key, queue_config.clone()),
                    provider: account.provider,
                },
            );
        }

        let inner = Arc::new(Inner {
            registry,
            router,
            profile,
            backends,
            view_cache: TtlLru::new(VIEW_CACHE_CAPACITY, VIEW_CACHE_TTL),
            store: TtlLru::new(STORE_CAPACITY, STORE_TTL),
            payloads: TtlLru::new(PAYLOAD_CACHE_CAPACITY, PAYLOAD_CACHE_TTL),
            epochs: StdMutex::new(HashMap::new()),
            inflight: StdMutex::new(HashMap::new()),
            subscribers: StdMutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            limiters: LimiterSet::default(),
            shutting_down: AtomicBool::new(false),
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let listeners = inner
            .backends
            .values()
            .map(|backend| IdleListener::spawn(backend.connection.clone(), events_tx.clone()))
            .collect();
        let event_loop = tokio::spawn(event_loop(
            inner.clone(),
            events_rx,
            profile.debounce(),
        ));

        Ok(Self {
            inner,
            tasks: tokio::sync::Mutex::new(Some(RunningTasks {
                listeners,
                events_tx,
                event_loop,
            })),
        })
    }

    /// Current messages visible to `viewer` for `address`.
    ///
    /// Total: unroutable addresses and IMAP failures yield an empty (or
    /// stale) view, never an error.
    pub async fn fetch_for_address(&self, address: &str, viewer: Viewer) -> Vec<Message> {
        let Some(route) = self.inner.router.route(address) else {
            tracing::debug!(address, "not routable");
            return Vec::new();
        };

        let target = address.to_lowercase();
        let key = ViewKey {
            target: target.clone(),
            scope: visibility_for(viewer, route.provider),
        };
        let plan = FetchPlan {
            backends: vec![(route.backend.to_lowercase(), route.provider)],
            target: Some(target),
            truncate: None,
        };
        self.fetch_view(key, plan, viewer).await
    }

    /// The aggregate view: recent messages across every backend, newest
    /// first, truncated to the top 30.
    pub async fn fetch_all(&self, viewer: Viewer) -> Vec<Message> {
        let key = ViewKey {
            target: "*".to_string(),
            scope: match viewer {
                Viewer::Authenticated => Visibility::Full,
                Viewer::Anonymous => Visibility::AliasOnly,
            },
        };
        let plan = FetchPlan {
            backends: self
                .inner
                .backends
                .iter()
                .map(|(key, backend)| (key.clone(), backend.provider))
                .collect(),
            target: None,
            truncate: Some(AGGREGATE_LIMIT),
        };
        self.fetch_view(key, plan, viewer).await
    }

    /// Invalidates every cache on the route, then fetches.
    pub async fn refresh_address(&self, address: &str, viewer: Viewer) -> Vec<Message> {
        if let Some(route) = self.inner.router.route(address) {
            self.inner.bump_epoch(&route.backend.to_lowercase());
            self.inner.view_cache.clear();
        }
        self.fetch_for_address(address, viewer).await
    }

    /// Invalidates everything, then fetches the aggregate view.
    pub async fn refresh_all(&self, viewer: Viewer) -> Vec<Message> {
        for backend in self.inner.backends.keys() {
            self.inner.bump_epoch(backend);
        }
        self.inner.view_cache.clear();
        self.fetch_all(viewer).await
    }

    /// Deletes a message: `\Deleted` + EXPUNGE on an ephemeral session,
    /// then cache eviction.
    ///
    /// Returns `false` when the message is unknown or the mutation
    /// failed; mutation failures are not silently retried into success.
    pub async fn delete_message(&self, id: &str, backend: &str) -> bool {
        let backend_key = backend.to_lowercase();
        let Some(handle) = self.inner.backends.get(&backend_key) else {
            return false;
        };
        let Some(uid) = self.inner.resolve_uid(id, &backend_key) else {
            return false;
        };

        let connection = handle.connection.clone();
        let result = handle
            .queue
            .enqueue(move || {
                let connection = connection.clone();
                async move { connection.delete_message(uid).await }
            })
            .await;

        match result {
            Ok(true) => {
                self.inner.store.remove(&id.to_string());
                self.inner.payloads.remove(&id.to_string());
                self.inner.bump_epoch(&backend_key);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(id, backend = %backend_key, error = %e, "delete failed");
                false
            }
        }
    }

    /// Serves an attachment, from the payload cache when possible.
    ///
    /// Returns `None` when the message or attachment does not exist.
    pub async fn get_attachment(
        &self,
        id: &str,
        filename: &str,
        backend: &str,
    ) -> Option<AttachmentDownload> {
        let id_key = id.to_string();

        if let Some(payload) = self.inner.payloads.get(&id_key) {
            return pick_attachment(&payload, filename);
        }

        // Cache miss: re-fetch the message by UID.
        let backend_key = backend.to_lowercase();
        let handle = self.inner.backends.get(&backend_key)?;
        let uid = self.inner.resolve_uid(id, &backend_key)?;
        let provider = handle.provider;

        let connection = handle.connection.clone();
        let fetched = handle
            .queue
            .enqueue(move || {
                let connection = connection.clone();
                async move { connection.fetch_message(uid).await }
            })
            .await
            .ok()??;

        let (message, payload) = pipeline::normalize(&handle.connection.account().address, provider, &fetched)?;
        let payload = Arc::new(payload);
        self.inner.store.insert(message.id.clone(), message.clone());
        self.inner.payloads.insert(message.id.clone(), payload.clone());

        pick_attachment(&payload, filename)
    }

    /// Generates an alias for a known base account.
    ///
    /// Gmail picks the plus or dot variant at random when neither a
    /// suffix nor `use_dot` is given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRoutable`] for unknown bases or provider
    /// mismatches, and a config error for invalid suffixes.
    pub fn generate_alias(
        &self,
        provider: Provider,
        base: &str,
        suffix: Option<&str>,
        use_dot: bool,
    ) -> Result<Alias> {
        let account = self
            .inner
            .registry
            .lookup(base)
            .ok_or_else(|| Error::NotRoutable(base.to_string()))?;
        if account.provider != provider {
            return Err(Error::NotRoutable(format!(
                "{base} is not a {provider} account"
            )));
        }

        match provider {
            Provider::Gmail => {
                let dot = use_dot || (suffix.is_none() && rand::random::<bool>());
                if dot {
                    generate_dot_alias(&account.address)
                } else {
                    generate_plus_alias(&account.address, provider, suffix)
                }
            }
            Provider::Outlook => generate_plus_alias(&account.address, provider, suffix),
            Provider::Domain => Err(Error::NotRoutable(
                "aliases are generated for provider accounts only".to_string(),
            )),
        }
    }

    /// Routes an arbitrary recipient, for collaborators that need the
    /// backend and alias classification.
    #[must_use]
    pub fn route(&self, recipient: &str) -> Option<Route> {
        self.inner.router.route(recipient)
    }

    /// Public account descriptors with viewer-aware capabilities.
    #[must_use]
    pub fn list_accounts_for_viewer(&self, viewer: Viewer) -> AccountsView {
        let direct_inbox = viewer == Viewer::Authenticated;
        let accounts: Vec<AccountDescriptor> = self
            .inner
            .registry
            .accounts()
            .iter()
            .map(|account| AccountDescriptor {
                email: account.address.clone(),
                provider: account.provider,
                direct_inbox,
            })
            .collect();

        let providers = ProviderFlags {
            gmail: accounts.iter().any(|a| a.provider == Provider::Gmail),
            outlook: accounts.iter().any(|a| a.provider == Provider::Outlook),
        };

        AccountsView { accounts, providers }
    }

    /// Observability snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let mut queue = QueueSnapshot {
            queue_length: 0,
            active_connections: 0,
            max_connections: 0,
            consecutive_failures: 0,
            rate_limited_until: None,
        };

        for backend in self.inner.backends.values() {
            let stats = backend.queue.stats();
            queue.queue_length += stats.queue_length;
            queue.active_connections += stats.active;
            queue.max_connections += stats.max_concurrent;
            queue.consecutive_failures = queue.consecutive_failures.max(stats.consecutive_failures);
            if let Some(ms) = stats.rate_limited_for_ms {
                let until = Utc::now()
                    .timestamp_millis()
                    .saturating_add(i64::try_from(ms).unwrap_or(i64::MAX));
                queue.rate_limited_until =
                    Some(queue.rate_limited_until.map_or(until, |u: i64| u.max(until)));
            }
        }

        StatsSnapshot {
            queue,
            cache: CacheSnapshot {
                views: self.inner.view_cache.len(),
                messages: self.inner.store.len(),
                payloads: self.inner.payloads.len(),
            },
            timestamp: Utc::now(),
        }
    }

    /// Registers a change subscriber, invoked after each IDLE debounce
    /// window.
    #[must_use]
    pub fn on_change(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock_subscribers()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Checks the general API limiter.
    pub fn check_general_limit(&self, client: &str) -> Decision {
        self.inner.limiters.general.check(client)
    }

    /// Checks the auth limiter.
    pub fn check_auth_limit(&self, client: &str) -> Decision {
        self.inner.limiters.auth.check(client)
    }

    /// Checks the email-ops limiter; denials also arm every backend's
    /// admission cooldown, propagating the 429 down to IMAP.
    pub fn check_email_limit(&self, client: &str) -> Decision {
        let decision = self.inner.limiters.email_ops.check(client);
        if let Some(retry_after) = decision.retry_after {
            self.set_rate_limited(retry_after);
        }
        decision
    }

    /// Arms every backend queue's cooldown for `seconds`.
    pub fn set_rate_limited(&self, seconds: u64) {
        for backend in self.inner.backends.values() {
            backend.queue.set_rate_limited(seconds);
        }
    }

    /// Drains queues, stops listeners, closes sessions, clears
    /// subscribers. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("inbox service shutting down");

        for backend in self.inner.backends.values() {
            backend.queue.shutdown();
        }

        if let Some(tasks) = self.tasks.lock().await.take() {
            for listener in tasks.listeners {
                listener.shutdown().await;
            }
            drop(tasks.events_tx);
            if timeout(SHUTDOWN_GRACE, tasks.event_loop).await.is_err() {
                tracing::debug!("event loop did not stop in time");
            }
        }

        for backend in self.inner.backends.values() {
            backend.connection.shutdown().await;
        }

        self.inner.lock_subscribers().clear();
        self.inner.view_cache.clear();
    }

    /// The configured deployment profile.
    #[must_use]
    pub fn profile(&self) -> Profile {
        self.inner.profile
    }

    // === Internals ===

    /// Cache-checked, coalesced view fetch.
    async fn fetch_view(&self, key: ViewKey, plan: FetchPlan, viewer: Viewer) -> Vec<Message> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Vec::new();
        }

        if let Some(view) = self.inner.view_cache.get(&key)
            && self.inner.epochs_valid(&view.epochs)
        {
            return view.messages;
        }

        // Coalesce: one in-flight fetch per key; later callers await it.
        let waiter = {
            let mut inflight = self.inner.lock_inflight();
            match inflight.get(&key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    inflight.insert(key.clone(), sender);
                    None
                }
            }
        };

        if let Some(mut receiver) = waiter {
            return receiver.recv().await.unwrap_or_default();
        }

        let messages = self.fetch_and_populate(&key, plan, viewer).await;

        let sender = self.inner.lock_inflight().remove(&key);
        if let Some(sender) = sender {
            let _ = sender.send(messages.clone());
        }
        messages
    }

    /// The leader path: per-backend fetches through the admission
    /// queues, cache population, filtering, ordering, truncation.
    async fn fetch_and_populate(
        &self,
        key: &ViewKey,
        plan: FetchPlan,
        viewer: Viewer,
    ) -> Vec<Message> {
        let epochs = self.inner.epoch_snapshot(plan.backends.iter().map(|(b, _)| b.as_str()));
        let limit = self.inner.profile.fetch_window();

        let mut items = Vec::new();
        let mut any_success = false;

        for (index, batch) in plan.backends.chunks(FANOUT_BATCH).enumerate() {
            if index > 0 {
                // Pace fan-out beyond the first parallel batch.
                sleep(BATCH_DELAY).await;
            }
            let mut set = JoinSet::new();
            for (backend_key, provider) in batch {
                let Some(backend) = self.inner.backends.get(backend_key) else {
                    continue;
                };
                let connection = backend.connection.clone();
                let queue = backend.queue.clone();
                let target = plan.target.clone();
                let provider = *provider;
                set.spawn(async move {
                    queue
                        .enqueue(move || {
                            let connection = connection.clone();
                            let target = target.clone();
                            async move {
                                pipeline::fetch_backend(
                                    &connection,
                                    target.as_deref(),
                                    provider,
                                    limit,
                                )
                                .await
                            }
                        })
                        .await
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(batch_items)) => {
                        any_success = true;
                        items.extend(batch_items);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "backend fetch failed");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "backend fetch task failed");
                    }
                }
            }
        }

        if !any_success {
            // Total failure: prefer the stale view over an empty answer.
            if let Some(stale) = self.inner.view_cache.get_stale(key) {
                tracing::debug!(view = %key.target, "serving stale view after fetch failure");
                return stale.messages;
            }
            return Vec::new();
        }

        for (message, payload) in &items {
            self.inner.store.insert(message.id.clone(), message.clone());
            self.inner
                .payloads
                .insert(message.id.clone(), Arc::new(payload.clone()));
        }

        let mut messages: Vec<Message> = items
            .into_iter()
            .map(|(message, _)| message)
            .filter(|message| visible(viewer, message))
            .collect();
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        if let Some(limit) = plan.truncate {
            messages.truncate(limit);
        }

        self.inner.view_cache.insert(
            key.clone(),
            CachedView {
                messages: messages.clone(),
                epochs,
            },
        );
        messages
    }

    #[cfg(test)]
    fn inject_event(&self, tasks: &RunningTasks, backend: &str, kind: crate::idle::ChangeKind) {
        let _ = tasks.events_tx.send(MailboxEvent {
            backend: backend.to_string(),
            kind,
        });
    }
}

struct FetchPlan {
    backends: Vec<(String, Provider)>,
    target: Option<String>,
    truncate: Option<usize>,
}

impl Inner {
    fn bump_epoch(&self, backend: &str) {
        let mut epochs = self
            .epochs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *epochs.entry(backend.to_lowercase()).or_insert(0) += 1;
    }

    fn epoch_snapshot<'a>(&self, backends: impl Iterator<Item = &'a str>) -> Vec<(String, u64)> {
        let epochs = self
            .epochs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        backends
            .map(|b| (b.to_string(), epochs.get(b).copied().unwrap_or(0)))
            .collect()
    }

    fn epochs_valid(&self, snapshot: &[(String, u64)]) -> bool {
        let epochs = self
            .epochs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        snapshot
            .iter()
            .all(|(backend, epoch)| epochs.get(backend).copied().unwrap_or(0) == *epoch)
    }

    /// Maps a message id to its UID: via the global store, else by
    /// decoding the `uid-<backend>-<uid>` fallback form.
    fn resolve_uid(&self, id: &str, backend: &str) -> Option<u32> {
        if let Some(message) = self.store.get_stale(&id.to_string())
            && message.backend.eq_ignore_ascii_case(backend)
        {
            return Some(message.uid);
        }

        id.strip_prefix("uid-")?
            .strip_prefix(backend)?
            .strip_prefix('-')?
            .parse()
            .ok()
    }

    fn notify_subscribers(&self) {
        let callbacks: Vec<Arc<dyn Fn() + Send + Sync>> = self
            .lock_subscribers()
            .iter()
            .map(|s| s.callback.clone())
            .collect();
        // No lock held: subscribers may unsubscribe from inside.
        for callback in callbacks {
            callback();
        }
    }

    fn remove_subscriber(&self, id: u64) {
        self.lock_subscribers().retain(|s| s.id != id);
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_inflight(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ViewKey, broadcast::Sender<Vec<Message>>>> {
        self.inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Debounces IDLE events: epochs are zeroed immediately per event; the
/// view-cache clear and subscriber fan-out fire once per quiet window.
async fn event_loop(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<MailboxEvent>,
    debounce: Duration,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                tracing::debug!(backend = %event.backend, kind = ?event.kind, "mailbox change");
                inner.bump_epoch(&event.backend);
                deadline = Some(Instant::now() + debounce);
            }
            () = maybe_sleep(deadline), if deadline.is_some() => {
                deadline = None;
                inner.view_cache.clear();
                inner.notify_subscribers();
            }
        }
    }
}

async fn maybe_sleep(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn pick_attachment(payload: &MessagePayload, filename: &str) -> Option<AttachmentDownload> {
    payload
        .attachments
        .iter()
        .find(|a| a.filename == filename)
        .map(|a| AttachmentDownload {
            filename: a.filename.clone(),
            content_type: a.content_type.clone(),
            data: a.data.clone(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::idle::ChangeKind;
    use std::sync::atomic::AtomicUsize;

    fn settings() -> Settings {
        Settings {
            accounts: vec![
                AccountConfig {
                    address: "alice@gmail.com".into(),
                    password: "pw".into(),
                    provider: Provider::Gmail,
                },
                AccountConfig {
                    address: "bob@outlook.com".into(),
                    password: "pw".into(),
                    provider: Provider::Outlook,
                },
            ],
            profile: Profile::Standard,
        }
    }

    fn message(id: &str, to: &str, provider: Provider, is_alias: bool) -> Message {
        Message {
            id: id.into(),
            uid: 1,
            from: "sender@example.com".into(),
            from_name: None,
            to: to.into(),
            subject: "s".into(),
            date: Utc::now(),
            text_body: None,
            html_body: None,
            attachments: Vec::new(),
            backend: "alice@gmail.com".into(),
            provider,
            is_alias,
        }
    }

    #[tokio::test]
    async fn visibility_rule() {
        let alias = message("1", "alice+x@gmail.com", Provider::Gmail, true);
        let own = message("2", "alice@gmail.com", Provider::Gmail, false);
        let domain = message("3", "any@d.test", Provider::Domain, true);

        assert!(visible(Viewer::Anonymous, &alias));
        assert!(!visible(Viewer::Anonymous, &own));
        assert!(visible(Viewer::Anonymous, &domain));
        assert!(visible(Viewer::Authenticated, &own));
    }

    #[tokio::test]
    async fn accounts_view_capabilities() {
        let service = InboxService::start(&settings(), None).unwrap();

        let anonymous = service.list_accounts_for_viewer(Viewer::Anonymous);
        assert_eq!(anonymous.accounts.len(), 2);
        assert!(anonymous.accounts.iter().all(|a| !a.direct_inbox));
        assert!(anonymous.providers.gmail);
        assert!(anonymous.providers.outlook);

        let authed = service.list_accounts_for_viewer(Viewer::Authenticated);
        assert!(authed.accounts.iter().all(|a| a.direct_inbox));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn alias_generation_validates_base_and_provider() {
        let service = InboxService::start(&settings(), None).unwrap();

        let alias = service
            .generate_alias(Provider::Gmail, "alice@gmail.com", Some("shop"), false)
            .unwrap();
        assert_eq!(alias.alias_address, "alice+shop@gmail.com");

        assert!(matches!(
            service.generate_alias(Provider::Gmail, "stranger@gmail.com", None, false),
            Err(Error::NotRoutable(_))
        ));
        assert!(matches!(
            service.generate_alias(Provider::Outlook, "alice@gmail.com", None, false),
            Err(Error::NotRoutable(_))
        ));

        // No suffix: gmail picks some variant that still routes home.
        for _ in 0..10 {
            let alias = service
                .generate_alias(Provider::Gmail, "alice@gmail.com", None, false)
                .unwrap();
            let route = service.route(&alias.alias_address).unwrap();
            assert_eq!(route.backend, "alice@gmail.com");
        }

        service.shutdown().await;
    }

    #[tokio::test]
    async fn email_limit_denial_arms_queue_cooldown() {
        let service = InboxService::start(&settings(), None).unwrap();

        let mut denial = None;
        for _ in 0..31 {
            let decision = service.check_email_limit("client");
            if !decision.allowed {
                denial = Some(decision);
                break;
            }
        }
        let denial = denial.expect("31st request should be denied");
        assert!(denial.retry_after.is_some());

        // The bridge armed every backend queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = service.stats();
        assert!(stats.queue.rate_limited_until.is_some());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn debounce_coalesces_events_into_one_notification() {
        let service = InboxService::start(
            &Settings {
                profile: Profile::UltraFast,
                ..settings()
            },
            None,
        )
        .unwrap();

        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        let _subscription = service.on_change(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Seed a view so we can observe the epoch invalidation.
        let key = ViewKey {
            target: "x@d.test".into(),
            scope: Visibility::Full,
        };
        let epochs = service.inner.epoch_snapshot(["alice@gmail.com"].into_iter());
        service.inner.view_cache.insert(
            key.clone(),
            CachedView {
                messages: Vec::new(),
                epochs,
            },
        );
        assert!(service.inner.epochs_valid(&service.inner.view_cache.get(&key).unwrap().epochs));

        {
            let tasks = service.tasks.lock().await;
            let tasks = tasks.as_ref().unwrap();
            for _ in 0..5 {
                service.inject_event(tasks, "alice@gmail.com", ChangeKind::NewMail);
            }
        }

        // Epoch bumps are immediate: the seeded view is already invalid
        // before the debounce window closes.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cached = service.inner.view_cache.get(&key).unwrap();
        assert!(!service.inner.epochs_valid(&cached.epochs));
        assert_eq!(notifications.load(Ordering::SeqCst), 0);

        // One notification after the quiet window.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        assert!(service.inner.view_cache.is_empty());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn unsubscribe_from_inside_callback_is_tolerated() {
        let service = InboxService::start(
            &Settings {
                profile: Profile::UltraFast,
                ..settings()
            },
            None,
        )
        .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let slot: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));
        let slot_in_callback = slot.clone();
        let subscription = service.on_change(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = slot_in_callback.lock().unwrap().take() {
                subscription.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(subscription);

        {
            let tasks = service.tasks.lock().await;
            let tasks = tasks.as_ref().unwrap();
            service.inject_event(tasks, "alice@gmail.com", ChangeKind::Expunge);
        }
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A second window does not call the unsubscribed callback.
        {
            let tasks = service.tasks.lock().await;
            let tasks = tasks.as_ref().unwrap();
            service.inject_event(tasks, "alice@gmail.com", ChangeKind::Expunge);
        }
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn coalesced_followers_share_the_inflight_result() {
        let service = InboxService::start(&settings(), None).unwrap();

        let key = ViewKey {
            target: "alice+shop@gmail.com".into(),
            scope: Visibility::AliasOnly,
        };
        let (sender, _keep) = broadcast::channel(1);
        service
            .inner
            .lock_inflight()
            .insert(key.clone(), sender.clone());

        let expected = vec![message("m", "alice+shop@gmail.com", Provider::Gmail, true)];
        let follower = {
            let to_send = expected.clone();
            let service = &service;
            async move {
                tokio::join!(
                    service.fetch_for_address("alice+shop@gmail.com", Viewer::Anonymous),
                    async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        let _ = sender.send(to_send);
                    }
                )
                .0
            }
        };

        let got = follower.await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "m");

        service.shutdown().await;
    }

    #[tokio::test]
    async fn resolve_uid_from_fallback_id() {
        let service = InboxService::start(&settings(), None).unwrap();
        assert_eq!(
            service
                .inner
                .resolve_uid("uid-alice@gmail.com-42", "alice@gmail.com"),
            Some(42)
        );
        assert_eq!(
            service.inner.resolve_uid("uid-other@gmail.com-42", "alice@gmail.com"),
            None
        );
        assert_eq!(service.inner.resolve_uid("random-id", "alice@gmail.com"), None);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn delete_unknown_backend_or_id_is_false() {
        let service = InboxService::start(&settings(), None).unwrap();
        assert!(!service.delete_message("some-id", "nobody@gmail.com").await);
        assert!(!service.delete_message("opaque-id", "alice@gmail.com").await);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn stats_shape() {
        let service = InboxService::start(&settings(), None).unwrap();
        let stats = service.stats();
        assert_eq!(stats.queue.queue_length, 0);
        assert_eq!(stats.queue.active_connections, 0);
        // Two backends, three slots each under the standard profile.
        assert_eq!(stats.queue.max_connections, 6);
        assert_eq!(stats.cache.views, 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["queue"]["queueLength"].is_number());
        assert!(json["queue"]["maxConnections"].is_number());
        assert!(json["timestamp"].is_string());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_rejects_new_fetches() {
        let service = InboxService::start(&settings(), None).unwrap();
        service.shutdown().await;
        service.shutdown().await;

        let messages = service.fetch_for_address("alice+x@gmail.com", Viewer::Anonymous).await;
        assert!(messages.is_empty());
    }
}
