// ── Token lifecycle ──
//
// Owns the bearer pair for a session. Every consumer asks this manager for
// a usable access token; it refreshes when the token is close to expiry
// and makes sure concurrent callers share a single refresh request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use secrecy::SecretString;
use techtrax_api::{AccessClaims, ApiClient, TokenPair};
use tracing::{debug, info, warn};

use crate::credentials::{self, CredentialStore};
use crate::error::CoreError;

type RefreshFuture = Shared<BoxFuture<'static, Result<SecretString, String>>>;

/// Refresh coordination and expiry evaluation for one session.
///
/// Cheaply cloneable via `Arc<TokenInner>`.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    client: Arc<ApiClient>,
    store: Arc<dyn CredentialStore>,
    current: ArcSwapOption<TokenPair>,
    /// The single in-flight refresh, if any.
    pending: Mutex<Option<RefreshFuture>>,
    /// Bumped by `clear` and `set_tokens`; a refresh started under an
    /// older epoch must not install its result.
    epoch: Mutex<u64>,
    generation: AtomicU64,
    window: chrono::Duration,
}

impl TokenLifecycleManager {
    /// Build a manager, picking up any pair already in `store`.
    pub fn new(
        client: Arc<ApiClient>,
        store: Arc<dyn CredentialStore>,
        refresh_window: Duration,
    ) -> Result<Self, CoreError> {
        let current = credentials::load_pair(store.as_ref())?.map(Arc::new);
        let window = chrono::Duration::from_std(refresh_window).map_err(|e| CoreError::Config {
            message: format!("refresh window out of range: {e}"),
        })?;

        Ok(Self {
            inner: Arc::new(TokenInner {
                client,
                store,
                current: ArcSwapOption::new(current),
                pending: Mutex::new(None),
                epoch: Mutex::new(0),
                generation: AtomicU64::new(0),
                window,
            }),
        })
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.inner.client
    }

    // ── Token access ─────────────────────────────────────────────────

    /// A token that will not expire within the refresh window.
    ///
    /// Refreshes (or joins the refresh already in flight) when the current
    /// token is close to expiry, has no `exp`, or cannot be decoded.
    pub async fn get_valid_access_token(&self) -> Result<SecretString, CoreError> {
        let Some(pair) = self.inner.current.load_full() else {
            return Err(CoreError::SessionInvalid {
                reason: "not logged in".into(),
            });
        };

        let expiring = pair
            .access_claims()
            .map_or(true, |c| c.expires_within(self.inner.window, chrono::Utc::now()));
        if !expiring {
            return Ok(pair.access_token.clone());
        }

        debug!("access token inside refresh window");
        self.refresh().await
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Concurrent callers await the same request. On failure every stored
    /// credential is cleared and [`CoreError::SessionInvalid`] is returned.
    pub async fn refresh(&self) -> Result<SecretString, CoreError> {
        let shared = {
            let mut slot = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = slot.as_ref() {
                debug!("joining in-flight refresh");
                existing.clone()
            } else {
                let fut = run_refresh(Arc::clone(&self.inner)).boxed().shared();
                *slot = Some(fut.clone());
                fut
            }
        };

        shared
            .await
            .map_err(|reason| CoreError::SessionInvalid { reason })
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Store a freshly issued pair (login).
    pub fn set_tokens(&self, pair: TokenPair) -> Result<(), CoreError> {
        let mut epoch = self.inner.lock_epoch();
        *epoch += 1;
        credentials::save_pair(self.inner.store.as_ref(), &pair)?;
        self.inner.install(pair);
        Ok(())
    }

    /// Forget every credential, including the legacy single-token key.
    ///
    /// A refresh still in flight is discarded when it completes.
    pub fn clear(&self) -> Result<(), CoreError> {
        let mut epoch = self.inner.lock_epoch();
        *epoch += 1;
        self.inner.current.store(None);
        credentials::clear_all(self.inner.store.as_ref())
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn current_access(&self) -> Option<SecretString> {
        self.inner
            .current
            .load()
            .as_ref()
            .map(|p| p.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.current.load().is_some()
    }

    /// Claims of the current access token, if one is stored and decodable.
    pub fn claims(&self) -> Option<AccessClaims> {
        self.inner
            .current
            .load()
            .as_ref()
            .and_then(|p| p.access_claims().ok())
    }

    /// Bumped every time a new pair is stored.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }
}

impl TokenInner {
    fn install(&self, pair: TokenPair) {
        self.current.store(Some(Arc::new(pair)));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "token pair stored");
    }

    fn epoch(&self) -> u64 {
        *self.lock_epoch()
    }

    /// Held while the stored pair is replaced or cleared.
    fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_pending(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Why a refresh produced no token.
enum RefreshFailure {
    /// The backend refused the exchange; the session is over.
    Rejected(String),
    /// `clear` or `set_tokens` ran while the request was in flight.
    Superseded,
}

/// The body of the shared refresh. Clears the pending slot before its
/// result is observed, so the next refresh always starts fresh.
async fn run_refresh(inner: Arc<TokenInner>) -> Result<SecretString, String> {
    let epoch = inner.epoch();
    let result = exchange(&inner, epoch).await;
    inner.clear_pending();

    match result {
        Ok(access) => Ok(access),
        Err(RefreshFailure::Superseded) => {
            debug!("credentials changed during refresh, discarding the result");
            Err("credentials changed during refresh".into())
        }
        Err(RefreshFailure::Rejected(reason)) => {
            let mut current_epoch = inner.lock_epoch();
            if *current_epoch == epoch {
                warn!(%reason, "token refresh failed, clearing credentials");
                *current_epoch += 1;
                inner.current.store(None);
                if let Err(e) = credentials::clear_all(inner.store.as_ref()) {
                    warn!(error = %e, "failed to clear stored credentials");
                }
            }
            Err(reason)
        }
    }
}

async fn exchange(inner: &TokenInner, epoch: u64) -> Result<SecretString, RefreshFailure> {
    let refresh_token = match inner.current.load_full() {
        Some(pair) => pair.refresh_token.clone(),
        None => return Err(RefreshFailure::Rejected("no refresh token stored".into())),
    };

    let pair = inner
        .client
        .refresh(&refresh_token)
        .await
        .map_err(|e| RefreshFailure::Rejected(e.to_string()))?;

    let current_epoch = inner.lock_epoch();
    if *current_epoch != epoch {
        return Err(RefreshFailure::Superseded);
    }
    if let Err(e) = credentials::save_pair(inner.store.as_ref(), &pair) {
        warn!(error = %e, "refreshed tokens could not be persisted");
    }
    let access = pair.access_token.clone();
    inner.install(pair);
    drop(current_epoch);

    info!("access token refreshed");
    Ok(access)
}
