// ── Durable credential stores ──
//
// Both stores namespace keys by profile so several backends can be
// signed in at once.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use secrecy::{ExposeSecret, SecretString};

use techtrax_core::{CoreError, CredentialStore};

/// Keyring service name shared by every profile.
pub const KEYRING_SERVICE: &str = "techtrax";

fn store_err(what: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::Config {
        message: format!("credential store {what} failed: {e}"),
    }
}

// ── Keyring ─────────────────────────────────────────────────────────

/// Tokens in the system keyring, one entry per `{profile}/{key}`.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    profile: String,
}

impl KeyringCredentialStore {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, CoreError> {
        keyring::Entry::new(KEYRING_SERVICE, &format!("{}/{key}", self.profile))
            .map_err(|e| store_err("open", e))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: &str) -> Result<Option<SecretString>, CoreError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(SecretString::from(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(store_err("read", e)),
        }
    }

    fn set(&self, key: &str, value: &SecretString) -> Result<(), CoreError> {
        self.entry(key)?
            .set_password(value.expose_secret())
            .map_err(|e| store_err("write", e))
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(store_err("delete", e)),
        }
    }
}

// ── File ────────────────────────────────────────────────────────────

/// Tokens in a JSON object on disk. Owner-only permissions on unix.
///
/// The file is removed once its last key is.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>, CoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| store_err("parse", e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(store_err("read", e)),
        }
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<(), CoreError> {
        if entries.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(store_err("delete", e)),
            };
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| store_err("write", e))?;
        }
        let body = serde_json::to_string_pretty(entries).map_err(|e| store_err("encode", e))?;
        std::fs::write(&self.path, body).map_err(|e| store_err("write", e))?;
        restrict_permissions(&self.path)?;
        tracing::debug!(path = %self.path.display(), keys = entries.len(), "credentials written");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| store_err("chmod", e))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Result<Option<SecretString>, CoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.remove(key).map(SecretString::from))
    }

    fn set(&self, key: &str, value: &SecretString) -> Result<(), CoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read()?;
        entries.insert(key.to_owned(), value.expose_secret().to_owned());
        self.write(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read()?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.write(&entries)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use techtrax_api::TokenPair;
    use techtrax_core::credentials::{
        ACCESS_TOKEN_KEY, LEGACY_TOKEN_KEY, REFRESH_TOKEN_KEY, clear_all, load_pair, save_pair,
    };

    #[test]
    fn pair_survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials").join("clinic.json");

        save_pair(&FileCredentialStore::new(&path), &TokenPair::new("A1", "R1")).unwrap();

        let reopened = FileCredentialStore::new(&path);
        let pair = load_pair(&reopened).unwrap().unwrap();
        assert_eq!(pair.access_token.expose_secret(), "A1");
        assert_eq!(pair.refresh_token.expose_secret(), "R1");
    }

    #[test]
    fn clearing_every_key_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("p.json"));
        save_pair(&store, &TokenPair::new("A1", "R1")).unwrap();
        store
            .set(LEGACY_TOKEN_KEY, &SecretString::from("old"))
            .unwrap();
        assert!(store.path().exists());

        clear_all(&store).unwrap();
        assert!(!store.path().exists());
        assert!(store.get(ACCESS_TOKEN_KEY).unwrap().is_none());
    }

    #[test]
    fn removing_absent_key_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("p.json"));
        store.remove(REFRESH_TOKEN_KEY).unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = FileCredentialStore::new(&path)
            .get(ACCESS_TOKEN_KEY)
            .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("p.json"));
        store
            .set(ACCESS_TOKEN_KEY, &SecretString::from("A1"))
            .unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
