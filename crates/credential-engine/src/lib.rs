//! Credential lifecycle engine
//!
//! Keeps every linked user's Spotify access token usable without polling.
//! Each credential record is stored under a key that never expires, next to a
//! sentinel trigger key whose TTL equals the access token lifetime. When the
//! backend reports the trigger expired, the refresh coordinator swaps the
//! stale access token for a new one and re-arms the trigger.
//!
//! Credential lifecycle:
//! 1. Callback exchanges the code → `CredentialStore::save(user, record, Some(expires_in))`
//! 2. Trigger `expired:<user>` expires in the backend
//! 3. `ExpirationNotifier` receives the key and invokes the coordinator
//! 4. `RefreshCoordinator` claims, loads, refreshes and saves with a fresh trigger
//! 5. Logout → `CredentialStore::delete(user)` removes record and trigger

pub mod backend;
pub mod error;
pub mod keys;
pub mod memory;
pub mod notifier;
pub mod redis_backend;
pub mod refresh;
pub mod store;

pub use backend::{Backend, BoxFuture};
pub use error::{Error, Result};
pub use memory::MemoryBackend;
pub use notifier::ExpirationNotifier;
pub use redis_backend::RedisBackend;
pub use refresh::{
    AbandonReason, RefreshCoordinator, RefreshOutcome, RefreshPolicy, spawn_refresh_listener,
};
pub use store::CredentialStore;
