//! In-process backend
//!
//! Emulates the subset of Redis behaviour the engine relies on: per-key TTLs,
//! expiration events that are only published once enabled, `SET NX` claims,
//! and lossy event delivery to slow subscribers. Used by the test suites and
//! for single-node deployments where credentials may be lost on restart.
//!
//! Each TTL is a spawned tokio timer tagged with the key's write generation,
//! so a key that was rewritten or re-armed is never expired by an older timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::{Backend, BoxFuture, EXPIRY_CHANNEL_CAPACITY};
use crate::error::{Error, Result};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
    generation: u64,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

struct State {
    entries: HashMap<String, Entry>,
    publish_expired: bool,
    next_generation: u64,
    reachable: bool,
}

struct Shared {
    state: Mutex<State>,
    events: broadcast::Sender<String>,
}

/// Thread-safe in-memory key-value backend.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EXPIRY_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    publish_expired: false,
                    next_generation: 0,
                    reachable: true,
                }),
                events,
            }),
        }
    }

    /// Simulate an outage: while unreachable every operation fails with
    /// `StoreUnavailable`. Timers keep running, as they would on a real server.
    pub async fn set_reachable(&self, reachable: bool) {
        self.shared.state.lock().await.reachable = reachable;
    }

    /// Expire `key` now, as if its TTL had elapsed. No-op for missing keys.
    pub async fn expire_now(&self, key: &str) {
        let mut state = self.shared.state.lock().await;
        if state.entries.remove(key).is_some() && state.publish_expired {
            let _ = self.shared.events.send(key.to_string());
        }
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, State>> {
        let state = self.shared.state.lock().await;
        if !state.reachable {
            return Err(Error::StoreUnavailable("memory backend marked unreachable".into()));
        }
        Ok(state)
    }

    fn insert(&self, state: &mut State, key: &str, value: String, ttl: Option<Duration>) {
        state.next_generation += 1;
        let generation = state.next_generation;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        state.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                generation,
            },
        );
        if let Some(deadline) = expires_at {
            self.spawn_expiry(key.to_string(), generation, deadline);
        }
    }

    fn spawn_expiry(&self, key: String, generation: u64, deadline: Instant) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut state = shared.state.lock().await;
            let current = state.entries.get(&key).map(|e| e.generation);
            if current != Some(generation) {
                return;
            }
            state.entries.remove(&key);
            debug!(key, "key expired");
            if state.publish_expired {
                // No receivers is fine: nobody is subscribed yet.
                let _ = shared.events.send(key);
            }
        });
    }
}

impl Backend for MemoryBackend {
    fn id(&self) -> &str {
        "memory"
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let _state = self.lock().await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let state = self.lock().await?;
            let now = Instant::now();
            Ok(state
                .entries
                .get(key)
                .filter(|e| e.is_live(now))
                .map(|e| e.value.clone()))
        })
    }

    fn put_record<'a>(
        &'a self,
        key: &'a str,
        value: String,
        trigger_key: &'a str,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock().await?;
            self.insert(&mut state, key, value, None);
            match ttl {
                Some(ttl) => self.insert(&mut state, trigger_key, String::from("1"), Some(ttl)),
                None => {
                    state.entries.remove(trigger_key);
                }
            }
            Ok(())
        })
    }

    fn update_if_present<'a>(
        &'a self,
        key: &'a str,
        value: Option<String>,
        trigger_key: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut state = self.lock().await?;
            let now = Instant::now();
            if !state.entries.get(key).is_some_and(|e| e.is_live(now)) {
                return Ok(false);
            }
            if let Some(value) = value {
                self.insert(&mut state, key, value, None);
            }
            self.insert(&mut state, trigger_key, String::from("1"), Some(ttl));
            Ok(true)
        })
    }

    fn arm<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock().await?;
            self.insert(&mut state, key, String::from("1"), Some(ttl));
            Ok(())
        })
    }

    fn delete<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let mut state = self.lock().await?;
            let now = Instant::now();
            let mut removed = 0;
            for key in keys {
                if state.entries.remove(key).is_some_and(|e| e.is_live(now)) {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn ttl<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Duration>>> {
        Box::pin(async move {
            let state = self.lock().await?;
            let now = Instant::now();
            Ok(state
                .entries
                .get(key)
                .filter(|e| e.is_live(now))
                .and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(now)))
        })
    }

    fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let state = self.lock().await?;
            let now = Instant::now();
            Ok(state
                .entries
                .iter()
                .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }

    fn enable_expiry_events(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.lock().await?.publish_expired = true;
            Ok(())
        })
    }

    fn expiry_events(&self) -> BoxFuture<'_, Result<mpsc::Receiver<String>>> {
        Box::pin(async move {
            // Subscribe while holding the lock so no expiry slips in between.
            let mut events = {
                let _state = self.lock().await?;
                self.shared.events.subscribe()
            };
            let (tx, rx) = mpsc::channel(EXPIRY_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(key) => {
                            if tx.send(key).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(dropped)) => {
                            warn!(dropped, "expiry subscriber lagging, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(rx)
        })
    }

    fn try_claim<'a>(
        &'a self,
        key: &'a str,
        token: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut state = self.lock().await?;
            let now = Instant::now();
            if state.entries.get(key).is_some_and(|e| e.is_live(now)) {
                return Ok(false);
            }
            self.insert(&mut state, key, token.to_string(), Some(ttl));
            Ok(true)
        })
    }

    fn release_claim<'a>(&'a self, key: &'a str, token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock().await?;
            if state.entries.get(key).is_some_and(|e| e.value == token) {
                state.entries.remove(key);
            }
            Ok(())
        })
    }
}
