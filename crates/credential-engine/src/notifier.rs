//! Expiration notifier
//!
//! Turns the backend's stream of expired key names into application
//! callbacks. Only trigger keys (`expired:<user>`) are delivered; claim
//! expiries and keys belonging to anything else sharing the server are
//! dropped here.
//!
//! Delivery is at-least-once at best: the backend may drop events for slow
//! subscribers and events published while no subscriber is connected are
//! lost. `RefreshCoordinator::rearm_orphans` covers the latter at startup.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::keys;

/// Default pause before resubscribing after the event stream drops.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct ExpirationNotifier {
    backend: Arc<dyn Backend>,
    reconnect_delay: Duration,
}

impl ExpirationNotifier {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Subscribe to trigger expirations for the lifetime of the process.
    ///
    /// The first subscription is established before this returns, so no
    /// trigger armed afterwards can be missed. Events are then delivered on a
    /// spawned listener task; each `callback(key)` runs on its own task so a
    /// slow callback never holds up the listener. If the stream closes, the
    /// listener waits `reconnect_delay`, re-enables notifications and
    /// resubscribes.
    pub async fn subscribe<F, Fut>(&self, callback: F) -> Result<JoinHandle<()>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let events = self.backend.expiry_events().await?;
        info!(backend = self.backend.id(), "listening for trigger expirations");

        let backend = self.backend.clone();
        let reconnect_delay = self.reconnect_delay;
        let callback = Arc::new(callback);

        Ok(tokio::spawn(async move {
            let mut events = events;
            loop {
                dispatch(&mut events, &callback).await;
                warn!(
                    retry_in_secs = reconnect_delay.as_secs_f64(),
                    "expiry event stream closed, resubscribing"
                );
                events = resubscribe(backend.as_ref(), reconnect_delay).await;
            }
        }))
    }
}

/// Forward matching keys until the channel closes.
async fn dispatch<F, Fut>(events: &mut mpsc::Receiver<String>, callback: &Arc<F>)
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    while let Some(key) = events.recv().await {
        if keys::user_from_trigger(&key).is_none() {
            trace!(key, "ignoring non-trigger expiry");
            continue;
        }
        metrics::counter!("credential_expiry_events_total").increment(1);
        debug!(key, "trigger expired");
        let callback = callback.clone();
        tokio::spawn(async move { callback(key).await });
    }
}

/// Retry until a new subscription is open.
async fn resubscribe(backend: &dyn Backend, delay: Duration) -> mpsc::Receiver<String> {
    loop {
        tokio::time::sleep(delay).await;
        if let Err(e) = backend.enable_expiry_events().await {
            warn!(error = %e, "re-enabling expiry notifications failed");
            continue;
        }
        match backend.expiry_events().await {
            Ok(events) => {
                info!("resubscribed to trigger expirations");
                return events;
            }
            Err(e) => warn!(error = %e, "resubscribe failed"),
        }
    }
}
