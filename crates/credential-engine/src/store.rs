//! Credential store
//!
//! Typed facade over a `Backend`: maps user ids to keys, serializes records
//! as JSON, and keeps the record and its expiration trigger in step. The
//! store never refreshes anything itself. The refresh coordinator reacts to
//! trigger expiry.

use std::sync::Arc;
use std::time::Duration;

use spotify_auth::Credential;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::keys;

/// Shared handle to the per-user credential records.
///
/// Constructed once at startup and shared via `Arc` by the HTTP handlers and
/// the refresh coordinator. All coordination is delegated to the backend's
/// atomic per-key writes; the store holds no locks of its own.
pub struct CredentialStore {
    backend: Arc<dyn Backend>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Upsert a user's record. With `ttl`, the trigger is armed (or re-armed)
    /// in the same atomic write; without, any outstanding trigger is cleared.
    pub async fn save(
        &self,
        user_id: &str,
        credential: &Credential,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let json = serde_json::to_string(credential)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        self.backend
            .put_record(
                &keys::record_key(user_id),
                json,
                &keys::trigger_key(user_id),
                ttl,
            )
            .await?;
        debug!(user_id, ttl_secs = ttl.map(|t| t.as_secs()), "saved credential");
        Ok(())
    }

    /// Current record for `user_id`, or `None` if never linked or logged out.
    pub async fn load(&self, user_id: &str) -> Result<Option<Credential>> {
        let Some(json) = self.backend.get(&keys::record_key(user_id)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| Error::CorruptRecord {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// Overwrite an existing record and re-arm its trigger in one atomic
    /// step. Returns `false` without writing anything when the user has no
    /// record, so a logout racing a refresh is never undone.
    pub async fn update(
        &self,
        user_id: &str,
        credential: &Credential,
        ttl: Duration,
    ) -> Result<bool> {
        let json = serde_json::to_string(credential)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let written = self
            .backend
            .update_if_present(
                &keys::record_key(user_id),
                Some(json),
                &keys::trigger_key(user_id),
                ttl,
            )
            .await?;
        debug!(user_id, written, ttl_secs = ttl.as_secs(), "updated credential");
        Ok(written)
    }

    /// Remove the record, its trigger and any refresh claim (explicit logout).
    /// Returns whether the user had a record.
    pub async fn delete(&self, user_id: &str) -> Result<bool> {
        let record = keys::record_key(user_id);
        let existed = self.backend.get(&record).await?.is_some();
        let targets = [
            record,
            keys::trigger_key(user_id),
            keys::claim_key(user_id),
        ];
        self.backend.delete(&targets).await?;
        debug!(user_id, existed, "deleted credential");
        Ok(existed)
    }

    /// Enable expiration event publication on the backend. Idempotent.
    pub async fn configure_notifications(&self) -> Result<()> {
        self.backend.enable_expiry_events().await
    }

    /// Access token for a resource call. Absence is `NotAuthenticated`;
    /// backend failures stay `StoreUnavailable`.
    pub async fn access_token(&self, user_id: &str) -> Result<String> {
        self.load(user_id)
            .await?
            .map(|c| c.access_token)
            .ok_or_else(|| Error::NotAuthenticated(user_id.to_string()))
    }

    /// Arm the trigger only if the user still has a record. Returns whether
    /// it was armed.
    pub async fn rearm_if_present(&self, user_id: &str, ttl: Duration) -> Result<bool> {
        self.backend
            .update_if_present(
                &keys::record_key(user_id),
                None,
                &keys::trigger_key(user_id),
                ttl,
            )
            .await
    }

    /// Time until the user's trigger fires, `None` if no trigger is armed.
    pub async fn trigger_ttl(&self, user_id: &str) -> Result<Option<Duration>> {
        self.backend.ttl(&keys::trigger_key(user_id)).await
    }

    /// Every user id with a stored record.
    pub async fn user_ids(&self) -> Result<Vec<String>> {
        let keys = self.backend.keys_with_prefix(keys::RECORD_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(keys::RECORD_PREFIX).map(str::to_string))
            .collect())
    }

    /// Try to take the advisory refresh claim for `user_id`.
    pub async fn try_claim(&self, user_id: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.backend
            .try_claim(&keys::claim_key(user_id), token, ttl)
            .await
    }

    /// Release a claim taken with `token`; a claim that lapsed and was taken
    /// by someone else is left alone.
    pub async fn release_claim(&self, user_id: &str, token: &str) -> Result<()> {
        self.backend
            .release_claim(&keys::claim_key(user_id), token)
            .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use spotify_auth::TokenResponse;

    fn credential(access: &str, refresh: &str) -> Credential {
        Credential::from_grant(TokenResponse {
            access_token: access.into(),
            token_type: "Bearer".into(),
            scope: None,
            expires_in: 3600,
            refresh_token: Some(refresh.into()),
        })
        .unwrap()
    }

    fn store_with(backend: &MemoryBackend) -> CredentialStore {
        CredentialStore::new(Arc::new(backend.clone()))
    }

    #[tokio::test]
    async fn load_nonexistent_is_absent() {
        let store = store_with(&MemoryBackend::new());
        assert!(store.load("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = store_with(&MemoryBackend::new());
        let cred = credential("A1", "R1");
        store
            .save("u1", &cred, Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        assert_eq!(store.load("u1").await.unwrap(), Some(cred));
        let ttl = store.trigger_ttl("u1").await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(3590));
    }

    #[tokio::test(start_paused = true)]
    async fn save_is_idempotent() {
        let backend = MemoryBackend::new();
        let store = store_with(&backend);
        let cred = credential("A1", "R1");
        let ttl = Some(Duration::from_secs(60));

        store.save("u1", &cred, ttl).await.unwrap();
        let once = (
            backend.get("credential:u1").await.unwrap(),
            store.trigger_ttl("u1").await.unwrap(),
        );
        store.save("u1", &cred, ttl).await.unwrap();
        let twice = (
            backend.get("credential:u1").await.unwrap(),
            store.trigger_ttl("u1").await.unwrap(),
        );

        assert_eq!(once, twice);
        assert_eq!(store.user_ids().await.unwrap(), vec!["u1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_expiry_never_deletes_record() {
        let backend = MemoryBackend::new();
        let store = store_with(&backend);
        let cred = credential("A1", "R1");
        store
            .save("u1", &cred, Some(Duration::from_secs(1)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.trigger_ttl("u1").await.unwrap().is_none());
        assert_eq!(store.load("u1").await.unwrap(), Some(cred.clone()));

        backend.delete(&["expired:u1".to_string()]).await.unwrap();
        assert_eq!(store.load("u1").await.unwrap(), Some(cred));
    }

    #[tokio::test]
    async fn load_after_delete_is_absent() {
        let store = store_with(&MemoryBackend::new());
        store
            .save("u1", &credential("A1", "R1"), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(store.delete("u1").await.unwrap());
        assert!(store.load("u1").await.unwrap().is_none());
        assert!(store.trigger_ttl("u1").await.unwrap().is_none());
        assert!(!store.delete("u1").await.unwrap(), "second delete finds nothing");
    }

    #[tokio::test]
    async fn save_without_ttl_clears_trigger() {
        let store = store_with(&MemoryBackend::new());
        let cred = credential("A1", "R1");
        store
            .save("u1", &cred, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        store.save("u1", &cred, None).await.unwrap();
        assert!(store.trigger_ttl("u1").await.unwrap().is_none());
        assert!(store.load("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unavailable_store_is_not_reported_as_absent() {
        let backend = MemoryBackend::new();
        let store = store_with(&backend);
        backend.set_reachable(false).await;

        assert!(matches!(store.load("u1").await, Err(Error::StoreUnavailable(_))));
        assert!(matches!(
            store.access_token("u1").await,
            Err(Error::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn access_token_for_unknown_user_is_not_authenticated() {
        let store = store_with(&MemoryBackend::new());
        assert!(matches!(
            store.access_token("ghost").await,
            Err(Error::NotAuthenticated(id)) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let backend = MemoryBackend::new();
        let store = store_with(&backend);
        backend
            .put_record("credential:u1", "not json".into(), "expired:u1", None)
            .await
            .unwrap();

        assert!(matches!(
            store.load("u1").await,
            Err(Error::CorruptRecord { .. })
        ));
    }

    #[tokio::test]
    async fn delete_clears_claim() {
        let store = store_with(&MemoryBackend::new());
        store
            .save("u1", &credential("A1", "R1"), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(store.try_claim("u1", "t1", Duration::from_secs(30)).await.unwrap());

        store.delete("u1").await.unwrap();
        assert!(store.try_claim("u1", "t2", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn update_after_delete_writes_nothing() {
        let store = store_with(&MemoryBackend::new());
        store
            .save("u1", &credential("A1", "R1"), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        store.delete("u1").await.unwrap();

        let written = store
            .update("u1", &credential("A2", "R1"), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(!written);
        assert!(store.load("u1").await.unwrap().is_none());
        assert!(store.trigger_ttl("u1").await.unwrap().is_none());

        assert!(!store.rearm_if_present("u1", Duration::from_secs(60)).await.unwrap());
        assert!(store.trigger_ttl("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_replaces_existing_record() {
        let store = store_with(&MemoryBackend::new());
        store.save("u1", &credential("A1", "R1"), None).await.unwrap();

        let renewed = credential("A2", "R1");
        assert!(store
            .update("u1", &renewed, Duration::from_secs(3600))
            .await
            .unwrap());
        assert_eq!(store.load("u1").await.unwrap(), Some(renewed));
        assert!(store.trigger_ttl("u1").await.unwrap().unwrap() > Duration::from_secs(3590));
    }
}
