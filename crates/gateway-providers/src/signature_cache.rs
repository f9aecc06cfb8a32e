//! Thought-signature continuity cache.
//!
//! Two maps share one TTL:
//! - tool-call id to the `thoughtSignature` the upstream attached to that call
//! - thinking signature to the model family that issued it
//!
//! Expiry is checked on every read, so a stale entry is never returned even
//! if the background sweep has not run yet.

use dashmap::DashMap;
use gateway_config::SignatureConfig;
use gateway_core::ModelFamily;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    payload: T,
    inserted_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(payload: T) -> Self {
        Self {
            payload,
            inserted_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// TTL-bounded signature store, safe for concurrent use
#[derive(Debug)]
pub struct SignatureCache {
    tool_signatures: DashMap<String, CacheEntry<String>>,
    thinking_families: DashMap<String, CacheEntry<ModelFamily>>,
    ttl: Duration,
    sweep_interval: Duration,
    min_signature_length: usize,
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new(&SignatureConfig::default())
    }
}

impl SignatureCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(config: &SignatureConfig) -> Self {
        Self {
            tool_signatures: DashMap::new(),
            thinking_families: DashMap::new(),
            ttl: config.ttl,
            sweep_interval: config.sweep_interval,
            min_signature_length: config.min_signature_length,
        }
    }

    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remember the signature attached to a tool call. Empty arguments are ignored.
    pub fn cache_signature(&self, tool_call_id: &str, signature: &str) {
        if tool_call_id.is_empty() || signature.is_empty() {
            return;
        }
        trace!(tool_call_id, "Caching tool-call signature");
        self.tool_signatures
            .insert(tool_call_id.to_string(), CacheEntry::new(signature.to_string()));
    }

    /// Signature for a tool call, if present and fresh. Expired entries are
    /// evicted on read.
    #[must_use]
    pub fn get_cached_signature(&self, tool_call_id: &str) -> Option<String> {
        read_fresh(&self.tool_signatures, tool_call_id, self.ttl)
    }

    /// Remember which family issued a thinking signature. Signatures shorter
    /// than the configured minimum are placeholders and are ignored.
    pub fn cache_thinking_signature(&self, signature: &str, family: ModelFamily) {
        if signature.len() < self.min_signature_length {
            return;
        }
        self.thinking_families
            .insert(signature.to_string(), CacheEntry::new(family));
    }

    /// Family that issued a thinking signature, if present and fresh
    #[must_use]
    pub fn get_cached_signature_family(&self, signature: &str) -> Option<ModelFamily> {
        read_fresh(&self.thinking_families, signature, self.ttl)
    }

    /// Remove every expired entry from both maps. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let before = self.len();
        self.tool_signatures.retain(|_, e| !e.is_expired(ttl));
        self.thinking_families.retain(|_, e| !e.is_expired(ttl));
        let removed = before.saturating_sub(self.len());
        if removed > 0 {
            debug!(removed, remaining = self.len(), "Swept expired signatures");
        }
        removed
    }

    /// Drop everything
    pub fn clear(&self) {
        self.tool_signatures.clear();
        self.thinking_families.clear();
    }

    /// Physical entry count across both maps, expired entries included
    #[must_use]
    pub fn len(&self) -> usize {
        self.tool_signatures.len() + self.thinking_families.len()
    }

    /// Whether both maps are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic sweep on the current tokio runtime.
    ///
    /// The task only holds a weak reference and exits once the cache is
    /// dropped or the handle is shut down.
    #[must_use]
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let period = self.sweep_interval.max(Duration::from_millis(1));
        let weak: Weak<Self> = Arc::downgrade(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(cache) = weak.upgrade() else { break };
                        cache.sweep();
                    }
                }
            }
            debug!("Signature sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

fn read_fresh<T: Clone>(
    map: &DashMap<String, CacheEntry<T>>,
    key: &str,
    ttl: Duration,
) -> Option<T> {
    let hit = map
        .get(key)
        .map(|entry| (entry.is_expired(ttl), entry.payload.clone()));
    match hit {
        Some((false, payload)) => Some(payload),
        Some((true, _)) => {
            map.remove_if(key, |_, e| e.is_expired(ttl));
            None
        }
        None => None,
    }
}

/// Handle to the background sweep task
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweep and wait for the task to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Whether the task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
