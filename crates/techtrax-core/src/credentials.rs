// ── Durable credential storage ──
//
// The token pair outlives the process. Storage backends implement
// `CredentialStore`; the token manager is the only writer.

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use techtrax_api::TokenPair;

use crate::error::CoreError;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Single-token key written by older clients; only ever removed.
pub const LEGACY_TOKEN_KEY: &str = "token";

/// Key-value holder for bearer credentials.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<SecretString>, CoreError>;
    fn set(&self, key: &str, value: &SecretString) -> Result<(), CoreError>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

/// Read the stored pair. Both halves must be present and non-empty.
pub fn load_pair(store: &dyn CredentialStore) -> Result<Option<TokenPair>, CoreError> {
    let access = store.get(ACCESS_TOKEN_KEY)?;
    let refresh = store.get(REFRESH_TOKEN_KEY)?;
    Ok(match (access, refresh) {
        (Some(a), Some(r)) if !a.expose_secret().is_empty() && !r.expose_secret().is_empty() => {
            Some(TokenPair {
                access_token: a,
                refresh_token: r,
            })
        }
        _ => None,
    })
}

pub fn save_pair(store: &dyn CredentialStore, pair: &TokenPair) -> Result<(), CoreError> {
    store.set(ACCESS_TOKEN_KEY, &pair.access_token)?;
    store.set(REFRESH_TOKEN_KEY, &pair.refresh_token)
}

/// Remove both halves of the pair and the legacy key.
pub fn clear_all(store: &dyn CredentialStore) -> Result<(), CoreError> {
    store.remove(ACCESS_TOKEN_KEY)?;
    store.remove(REFRESH_TOKEN_KEY)?;
    store.remove(LEGACY_TOKEN_KEY)
}

// ── In-memory store ──────────────────────────────────────────────────

/// Process-local store. Used by tests and one-shot token sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, SecretString>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with an existing pair.
    pub fn with_pair(pair: &TokenPair) -> Self {
        let store = Self::new();
        store
            .entries
            .insert(ACCESS_TOKEN_KEY.into(), pair.access_token.clone());
        store
            .entries
            .insert(REFRESH_TOKEN_KEY.into(), pair.refresh_token.clone());
        store
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<SecretString>, CoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &SecretString) -> Result<(), CoreError> {
        self.entries.insert(key.to_owned(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
