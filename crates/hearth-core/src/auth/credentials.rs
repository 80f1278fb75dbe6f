//! Secure storage for the access/refresh token pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keyring::Entry;
use thiserror::Error;
use tracing::{debug, warn};

/// Key under which the access token is stored
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Key under which the refresh token is stored
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to read {key} from secure storage: {reason}")]
    Read { key: String, reason: String },

    #[error("Failed to write {key} to secure storage: {reason}")]
    Write { key: String, reason: String },

    #[error("Failed to delete {key} from secure storage: {reason}")]
    Delete { key: String, reason: String },
}

/// Platform key/value store for secrets. Every operation may fail
/// independently.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// OS keychain
// ============================================================================

/// Secure store backed by the OS keychain.
///
/// keyring calls block, so each one runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, String> {
        Entry::new(&self.service, key).map_err(|e| format!("Failed to create keyring entry: {}", e))
    }
}

#[async_trait]
impl SecureStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let read_err = |reason: String| StoreError::Read {
            key: key.to_string(),
            reason,
        };
        let entry = self.entry(key).map_err(read_err)?;

        let result = tokio::task::spawn_blocking(move || entry.get_password())
            .await
            .map_err(|e| read_err(format!("Task join error: {}", e)))?;

        match result {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(read_err(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let write_err = |reason: String| StoreError::Write {
            key: key.to_string(),
            reason,
        };
        let entry = self.entry(key).map_err(write_err)?;
        let value = value.to_string();

        tokio::task::spawn_blocking(move || entry.set_password(&value))
            .await
            .map_err(|e| write_err(format!("Task join error: {}", e)))?
            .map_err(|e| write_err(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let delete_err = |reason: String| StoreError::Delete {
            key: key.to_string(),
            reason,
        };
        let entry = self.entry(key).map_err(delete_err)?;

        let result = tokio::task::spawn_blocking(move || entry.delete_credential())
            .await
            .map_err(|e| delete_err(format!("Task join error: {}", e)))?;

        match result {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(delete_err(e.to_string())),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Which operations of a [`MemoryStore`] should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureMode {
    pub get: bool,
    pub set: bool,
    pub delete: bool,
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<String, String>,
    failing_keys: HashMap<String, FailureMode>,
}

/// In-process secure store. Nothing survives the process. Failures can be
/// injected per key.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned map is still a valid map.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make operations on `key` fail according to `mode`.
    pub fn fail_on(&self, key: &str, mode: FailureMode) {
        self.lock().failing_keys.insert(key.to_string(), mode);
    }

    /// Read a value without going through failure injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    fn mode(&self, key: &str) -> FailureMode {
        self.lock().failing_keys.get(key).copied().unwrap_or_default()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.mode(key).get {
            return Err(StoreError::Read {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.mode(key).set {
            return Err(StoreError::Write {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.lock().values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.mode(key).delete {
            return Err(StoreError::Delete {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.lock().values.remove(key);
        Ok(())
    }
}

// ============================================================================
// Credential pair
// ============================================================================

/// The access/refresh token pair.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialPair { .. }")
    }
}

/// Tokens as read back from storage; either half may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Read both tokens. Any read failure fails the whole read.
pub async fn load_tokens(store: &dyn SecureStore) -> Result<StoredTokens, StoreError> {
    let access_token = store.get(ACCESS_TOKEN_KEY).await?;
    let refresh_token = store.get(REFRESH_TOKEN_KEY).await?;
    Ok(StoredTokens {
        access_token,
        refresh_token,
    })
}

/// Persist both tokens as a unit. If the refresh token cannot be written,
/// the access token just written is removed again.
pub async fn store_pair(store: &dyn SecureStore, pair: &CredentialPair) -> Result<(), StoreError> {
    store.set(ACCESS_TOKEN_KEY, &pair.access_token).await?;
    if let Err(e) = store.set(REFRESH_TOKEN_KEY, &pair.refresh_token).await {
        if let Err(rollback) = store.delete(ACCESS_TOKEN_KEY).await {
            warn!(error = %rollback, "Failed to roll back access token after partial write");
        }
        return Err(e);
    }
    debug!("Stored credential pair");
    Ok(())
}

/// Remove both tokens. Both deletes are always attempted; the first failure
/// is reported.
pub async fn clear_pair(store: &dyn SecureStore) -> Result<(), StoreError> {
    let (access, refresh) = futures::future::join(
        store.delete(ACCESS_TOKEN_KEY),
        store.delete(REFRESH_TOKEN_KEY),
    )
    .await;
    access.and(refresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> CredentialPair {
        CredentialPair {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap(); // Deleting twice is fine
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_and_load_pair() {
        let store = MemoryStore::new();
        store_pair(&store, &pair()).await.unwrap();

        let tokens = load_tokens(&store).await.unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("access"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn test_partial_write_is_rolled_back() {
        let store = MemoryStore::new();
        store.fail_on(REFRESH_TOKEN_KEY, FailureMode { set: true, ..Default::default() });

        let result = store_pair(&store, &pair()).await;
        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert_eq!(store.peek(ACCESS_TOKEN_KEY), None);
        assert_eq!(store.peek(REFRESH_TOKEN_KEY), None);
    }

    #[tokio::test]
    async fn test_clear_pair_attempts_both_deletes() {
        let store = MemoryStore::new();
        store_pair(&store, &pair()).await.unwrap();
        store.fail_on(ACCESS_TOKEN_KEY, FailureMode { delete: true, ..Default::default() });

        let result = clear_pair(&store).await;
        assert!(matches!(result, Err(StoreError::Delete { .. })));
        // The refresh token is gone even though the access token delete failed
        assert_eq!(store.peek(REFRESH_TOKEN_KEY), None);
        assert_eq!(store.peek(ACCESS_TOKEN_KEY).as_deref(), Some("access"));
    }

    #[tokio::test]
    async fn test_load_tokens_propagates_read_failure() {
        let store = MemoryStore::new();
        store_pair(&store, &pair()).await.unwrap();
        store.fail_on(REFRESH_TOKEN_KEY, FailureMode { get: true, ..Default::default() });

        assert!(matches!(load_tokens(&store).await, Err(StoreError::Read { .. })));
    }

    #[test]
    fn test_pair_debug_hides_tokens() {
        assert!(!format!("{:?}", pair()).contains("access"));
    }
}
