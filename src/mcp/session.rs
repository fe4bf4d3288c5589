//! Session lifecycle: creation, lookup, idle expiry and capacity eviction.
//!
//! The store maps session ids to `Arc<Session>`. Removing a session from the
//! map never invalidates the `Arc`s already handed out, so a request that
//! resolved a session just before a sweep still completes against it. Only
//! the next lookup by id misses.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::catalog::{Prompt, PromptRegistry, Resource, ResourceRegistry};
use super::tools::{ToolDescriptor, ToolRegistry};
use crate::config::SessionsConfig;

/// The tools, resources and prompts a new session is seeded with
#[derive(Debug, Clone, Default)]
pub struct SessionTemplate {
    tools: ToolRegistry,
    resources: ResourceRegistry,
    prompts: PromptRegistry,
}

impl SessionTemplate {
    pub fn add_tool(&mut self, tool: ToolDescriptor) -> &mut Self {
        self.tools.register(tool);
        self
    }

    pub fn add_resource(&mut self, resource: Resource) -> &mut Self {
        self.resources.register(resource);
        self
    }

    pub fn add_prompt(&mut self, prompt: Prompt) -> &mut Self {
        self.prompts.register(prompt);
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }
}

/// Identity and creation time, as reported to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// A server-side session with its private registries
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    created: Instant,
    /// Milliseconds between `created` and the latest access
    last_seen_ms: AtomicU64,
    metadata: RwLock<HashMap<String, String>>,
    tools: RwLock<ToolRegistry>,
    resources: RwLock<ResourceRegistry>,
    prompts: RwLock<PromptRegistry>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_seen_ms", &self.last_seen_ms.load(Ordering::Relaxed))
            .finish()
    }
}

impl Session {
    fn new(id: String, template: &SessionTemplate, rate_limit: Option<NonZeroU32>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            created: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            metadata: RwLock::new(HashMap::new()),
            tools: RwLock::new(template.tools.clone()),
            resources: RwLock::new(template.resources.clone()),
            prompts: RwLock::new(template.prompts.clone()),
            limiter: rate_limit.map(|n| RateLimiter::direct(Quota::per_second(n))),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            created_at: self.created_at,
        }
    }

    /// Record an access. Never moves last activity backwards.
    pub fn touch(&self) {
        let elapsed = Instant::now().duration_since(self.created).as_millis() as u64;
        self.last_seen_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.created + Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed))
    }

    /// Time since the latest access
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Merge entries into the metadata; later values win
    pub async fn merge_metadata(&self, entries: HashMap<String, String>) {
        if entries.is_empty() {
            return;
        }
        self.metadata.write().await.extend(entries);
    }

    pub async fn metadata(&self) -> HashMap<String, String> {
        self.metadata.read().await.clone()
    }

    /// Whether a request may proceed under the per-session quota
    pub fn check_rate_limit(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Add a tool visible only to this session
    pub async fn register_tool(&self, tool: ToolDescriptor) {
        tracing::debug!(session_id = %self.id, tool = %tool.name(), "Registering session tool");
        self.tools.write().await.register(tool);
    }

    pub async fn register_resource(&self, resource: Resource) {
        self.resources.write().await.register(resource);
    }

    pub async fn register_prompt(&self, prompt: Prompt) {
        self.prompts.write().await.register(prompt);
    }

    pub async fn tool(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn tools(&self) -> tokio::sync::RwLockReadGuard<'_, ToolRegistry> {
        self.tools.read().await
    }

    pub async fn resources(&self) -> tokio::sync::RwLockReadGuard<'_, ResourceRegistry> {
        self.resources.read().await
    }

    pub async fn prompts(&self) -> tokio::sync::RwLockReadGuard<'_, PromptRegistry> {
        self.prompts.read().await
    }
}

/// Diagnostic counts, computed against the idle window at call time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

/// Owns every live session
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    template: SessionTemplate,
    config: SessionsConfig,
}

impl SessionStore {
    pub fn new(config: SessionsConfig, template: SessionTemplate) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            template,
            config,
        }
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.config
    }

    /// Mint a fresh session seeded from the template.
    ///
    /// When the store is full the least recently active session makes room.
    pub async fn create_session(&self) -> Arc<Session> {
        let rate_limit = self.config.rate_limit_per_second.and_then(NonZeroU32::new);
        let mut sessions = self.sessions.lock().await;

        let mut id = uuid::Uuid::new_v4().to_string();
        while sessions.contains_key(&id) {
            id = uuid::Uuid::new_v4().to_string();
        }

        let capacity = self.config.capacity();
        if sessions.len() >= capacity {
            let evicted = evict_least_recent(&mut sessions, capacity - 1);
            tracing::info!(evicted, "Session store at capacity, evicted least recently active");
        }

        let session = Arc::new(Session::new(id.clone(), &self.template, rate_limit));
        sessions.insert(id.clone(), session.clone());
        tracing::info!(session_id = %id, total = sessions.len(), "Created session");
        session
    }

    /// Look up a session and refresh its last activity
    pub async fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.lock().await.get(id).cloned()?;
        session.touch();
        Some(session)
    }

    /// Resolve `id`, or create a new session if it is absent or unknown.
    ///
    /// An unknown or expired id is not an error: the caller gets a new
    /// session and must adopt the returned id.
    pub async fn get_or_create_session(&self, id: Option<&str>) -> (String, Arc<Session>) {
        if let Some(id) = id {
            if let Some(session) = self.get_session(id).await {
                return (session.id().to_string(), session);
            }
            tracing::debug!(requested = %id, "Unknown session id, creating a new session");
        }
        let session = self.create_session().await;
        (session.id().to_string(), session)
    }

    /// Remove a session, reporting whether it existed
    pub async fn delete_session(&self, id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Deleted session");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn stats(&self) -> SessionStats {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout();
        let sessions = self.sessions.lock().await;
        let expired = sessions
            .values()
            .filter(|s| s.idle_for(now) > idle_timeout)
            .count();
        SessionStats {
            total: sessions.len(),
            active: sessions.len() - expired,
            expired,
        }
    }

    /// Drop idle sessions, then trim to capacity by least recent activity
    pub async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout();
        let mut sessions = self.sessions.lock().await;

        let before = sessions.len();
        sessions.retain(|_, s| s.idle_for(now) <= idle_timeout);
        let expired = before - sessions.len();

        let evicted = evict_least_recent(&mut sessions, self.config.capacity());

        if expired > 0 || evicted > 0 {
            tracing::info!(expired, evicted, remaining = sessions.len(), "Session sweep");
        } else {
            tracing::debug!(remaining = sessions.len(), "Session sweep found nothing to remove");
        }
        SweepReport { expired, evicted }
    }

    /// Run [`SessionStore::sweep`] every sweep interval until the handle is
    /// shut down or dropped, or the store itself is dropped
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let store: Weak<SessionStore> = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        store.sweep().await;
                    }
                }
            }
            tracing::debug!("Session sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Remove least recently active sessions until at most `keep` remain
fn evict_least_recent(sessions: &mut HashMap<String, Arc<Session>>, keep: usize) -> usize {
    if sessions.len() <= keep {
        return 0;
    }
    let mut by_activity: Vec<(Instant, String)> = sessions
        .iter()
        .map(|(id, s)| (s.last_activity(), id.clone()))
        .collect();
    by_activity.sort();

    let excess = sessions.len() - keep;
    for (_, id) in by_activity.into_iter().take(excess) {
        tracing::debug!(session_id = %id, "Evicting session over capacity");
        sessions.remove(&id);
    }
    excess
}

/// Controls the background sweep task. Dropping it aborts the task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
