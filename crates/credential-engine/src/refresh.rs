//! Refresh coordinator
//!
//! Reacts to trigger expirations by renewing the affected user's access
//! token. Each attempt runs:
//!
//! Triggered → Claiming → Loading → Exchanging → Persisting → Complete
//!
//! and may end early in Abandoned. Failures never propagate: the listener
//! serves every user, so an attempt logs, records its outcome and returns.
//! A failed exchange leaves the stale record in place and re-arms the trigger
//! with a backoff so the user is retried instead of silently going stale.

use std::sync::Arc;
use std::time::{Duration, Instant};

use spotify_auth::OAuthClient;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::keys;
use crate::notifier::ExpirationNotifier;
use crate::store::CredentialStore;

/// Timing knobs for refresh attempts.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Lifetime of the per-user advisory claim; bounds how long a crashed
    /// attempt blocks the next one.
    pub claim_ttl: Duration,
    /// Trigger delay after a transient failure (timeout, 5xx, store outage).
    pub retry_backoff: Duration,
    /// Trigger delay after the provider rejected the refresh token.
    pub rejected_backoff: Duration,
    /// Trigger delay used when re-arming users whose trigger went missing.
    pub orphan_delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(60),
            rejected_backoff: Duration::from_secs(3600),
            orphan_delay: Duration::from_secs(1),
        }
    }
}

/// Why an attempt stopped before persisting a new token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// The expired key was not a trigger key.
    NotATrigger,
    /// Another attempt for the same user holds the claim.
    AlreadyRefreshing,
    /// No record: the user logged out between trigger and load.
    NotAuthenticated,
    /// The provider refused the refresh token; retried after `rejected_backoff`.
    Rejected,
    /// Provider unreachable, timed out or answered 5xx/429; retried after `retry_backoff`.
    ProviderUnavailable,
    /// The store failed mid-attempt.
    StoreUnavailable,
}

impl AbandonReason {
    /// Label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            AbandonReason::NotATrigger => "not_a_trigger",
            AbandonReason::AlreadyRefreshing => "already_refreshing",
            AbandonReason::NotAuthenticated => "not_authenticated",
            AbandonReason::Rejected => "rejected",
            AbandonReason::ProviderUnavailable => "provider_unavailable",
            AbandonReason::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Terminal state of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New token persisted with a trigger of `expires_in` seconds.
    Complete { expires_in: u64 },
    Abandoned(AbandonReason),
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Complete { .. } => "complete",
            RefreshOutcome::Abandoned(reason) => reason.label(),
        }
    }
}

pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    oauth: OAuthClient,
    policy: RefreshPolicy,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>, oauth: OAuthClient, policy: RefreshPolicy) -> Self {
        Self {
            store,
            oauth,
            policy,
        }
    }

    /// Entry point for the notifier: map the expired key to a user and refresh.
    pub async fn on_expired(&self, key: &str) -> RefreshOutcome {
        let Some(user_id) = keys::user_from_trigger(key) else {
            return RefreshOutcome::Abandoned(AbandonReason::NotATrigger);
        };
        self.refresh_user(user_id).await
    }

    /// Run one refresh attempt for `user_id`.
    pub async fn refresh_user(&self, user_id: &str) -> RefreshOutcome {
        let started = Instant::now();
        let token = uuid::Uuid::new_v4().simple().to_string();

        let outcome = match self
            .store
            .try_claim(user_id, &token, self.policy.claim_ttl)
            .await
        {
            Ok(true) => {
                let outcome = self.exchange_and_persist(user_id).await;
                if let Err(e) = self.store.release_claim(user_id, &token).await {
                    // The claim lapses on its own after claim_ttl
                    debug!(user_id, error = %e, "releasing refresh claim failed");
                }
                outcome
            }
            Ok(false) => {
                debug!(user_id, "refresh already in progress, skipping");
                RefreshOutcome::Abandoned(AbandonReason::AlreadyRefreshing)
            }
            Err(e) => {
                warn!(user_id, error = %e, "could not claim refresh, retrying later");
                self.rearm(user_id, self.policy.retry_backoff).await;
                RefreshOutcome::Abandoned(AbandonReason::StoreUnavailable)
            }
        };

        metrics::counter!("credential_refresh_total", "outcome" => outcome.label())
            .increment(1);
        metrics::histogram!("credential_refresh_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn exchange_and_persist(&self, user_id: &str) -> RefreshOutcome {
        // Loading
        let credential = match self.store.load(user_id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!(user_id, "no credential at trigger time, user logged out");
                return RefreshOutcome::Abandoned(AbandonReason::NotAuthenticated);
            }
            Err(e) => {
                warn!(user_id, error = %e, "loading credential for refresh failed");
                self.rearm(user_id, self.policy.retry_backoff).await;
                return RefreshOutcome::Abandoned(AbandonReason::StoreUnavailable);
            }
        };

        // Exchanging
        debug!(user_id, "attempting to refresh token");
        let response = match self.oauth.refresh(&credential.refresh_token).await {
            Ok(response) => response,
            Err(e) if e.is_rejection() => {
                warn!(
                    user_id,
                    error = %e,
                    retry_in_secs = self.policy.rejected_backoff.as_secs(),
                    "refresh token rejected, keeping stale credential"
                );
                self.rearm(user_id, self.policy.rejected_backoff).await;
                return RefreshOutcome::Abandoned(AbandonReason::Rejected);
            }
            Err(e) => {
                warn!(
                    user_id,
                    error = %e,
                    retry_in_secs = self.policy.retry_backoff.as_secs(),
                    "refresh failed (transient), will retry"
                );
                self.rearm(user_id, self.policy.retry_backoff).await;
                return RefreshOutcome::Abandoned(AbandonReason::ProviderUnavailable);
            }
        };

        // Persisting
        let renewed = credential.renewed(response);
        let expires_in = renewed.expires_in;
        match self
            .store
            .update(user_id, &renewed, Duration::from_secs(expires_in))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(user_id, "user logged out during refresh, discarding new token");
                return RefreshOutcome::Abandoned(AbandonReason::NotAuthenticated);
            }
            Err(e) => {
                warn!(user_id, error = %e, "persisting refreshed credential failed");
                self.rearm(user_id, self.policy.retry_backoff).await;
                return RefreshOutcome::Abandoned(AbandonReason::StoreUnavailable);
            }
        }

        info!(user_id, expires_in, "token refreshed");
        RefreshOutcome::Complete { expires_in }
    }

    /// Re-arm after a failed attempt, unless the user has logged out since.
    async fn rearm(&self, user_id: &str, delay: Duration) {
        match self.store.rearm_if_present(user_id, delay).await {
            Ok(true) => {}
            Ok(false) => debug!(user_id, "no credential left to re-arm"),
            Err(e) => warn!(user_id, error = %e, "could not re-arm refresh trigger"),
        }
    }

    /// Re-arm every stored user whose trigger is missing, so refreshes whose
    /// expiry event was lost (process down, store dropped it) still happen.
    /// Returns how many users were re-armed.
    pub async fn rearm_orphans(&self) -> Result<usize> {
        let mut rearmed = 0;
        for user_id in self.store.user_ids().await? {
            if self.store.trigger_ttl(&user_id).await?.is_some() {
                continue;
            }
            // Deleted since the scan
            if !self
                .store
                .rearm_if_present(&user_id, self.policy.orphan_delay)
                .await?
            {
                continue;
            }
            debug!(user_id, "re-armed orphaned credential");
            rearmed += 1;
        }
        if rearmed > 0 {
            info!(rearmed, "re-armed credentials with missing triggers");
        }
        Ok(rearmed)
    }
}

/// Wire the coordinator to the notifier: every trigger expiry runs a refresh
/// attempt on its own task. Returns the listener's `JoinHandle`.
pub async fn spawn_refresh_listener(
    notifier: &ExpirationNotifier,
    coordinator: Arc<RefreshCoordinator>,
) -> Result<JoinHandle<()>> {
    notifier
        .subscribe(move |key| {
            let coordinator = coordinator.clone();
            async move {
                coordinator.on_expired(&key).await;
            }
        })
        .await
}
