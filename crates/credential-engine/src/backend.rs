//! Key-value backend abstraction
//!
//! Decouples the credential store from any particular server. A backend must
//! offer per-key TTLs, an atomic "write record + arm trigger" operation, a
//! conditional claim, and a stream of expired key names. Redis provides all of
//! these natively; `MemoryBackend` emulates them in-process.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Backend>`).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Result;

/// Boxed, sendable future returned by backend operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capacity of the channel an expiry subscription delivers into. When the
/// consumer falls this far behind, further events are dropped.
pub const EXPIRY_CHANNEL_CAPACITY: usize = 1024;

pub trait Backend: Send + Sync {
    /// Identifier for logging and health reporting ("redis", "memory").
    fn id(&self) -> &str;

    /// Round-trip to the server.
    fn ping(&self) -> BoxFuture<'_, Result<()>>;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Atomically store `value` at `key` (no expiry) and either arm
    /// `trigger_key` with `ttl` or, when `ttl` is `None`, remove it.
    fn put_record<'a>(
        &'a self,
        key: &'a str,
        value: String,
        trigger_key: &'a str,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Only while `key` exists: optionally overwrite it with `value`, then arm
    /// `trigger_key` with `ttl`, all in one atomic step. Returns `false` and
    /// writes nothing when `key` is gone.
    fn update_if_present<'a>(
        &'a self,
        key: &'a str,
        value: Option<String>,
        trigger_key: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Create or reset a sentinel key that expires after `ttl`.
    fn arm<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>>;

    /// Remove keys in one operation. Returns how many existed.
    fn delete<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<u64>>;

    /// Remaining lifetime of `key`; `None` if the key is missing or has no TTL.
    fn ttl<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Duration>>>;

    /// All live keys starting with `prefix`.
    fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Turn on publication of expiration events. Idempotent; Redis does not
    /// persist this across restarts, so callers re-apply it on reconnect.
    fn enable_expiry_events(&self) -> BoxFuture<'_, Result<()>>;

    /// Open a subscription delivering the name of every key that expires.
    ///
    /// The channel closes when the underlying connection is lost.
    fn expiry_events(&self) -> BoxFuture<'_, Result<mpsc::Receiver<String>>>;

    /// Set `key` to `token` with `ttl` only if `key` does not exist.
    /// Returns whether the claim was acquired.
    fn try_claim<'a>(
        &'a self,
        key: &'a str,
        token: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Delete `key` only if it still holds `token`.
    fn release_claim<'a>(&'a self, key: &'a str, token: &'a str) -> BoxFuture<'a, Result<()>>;
}
