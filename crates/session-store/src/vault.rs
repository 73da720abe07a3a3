//! Session credential lifecycle
//!
//! `CredentialVault` reads, writes and clears the access/renewal token pair
//! (plus the cached user data tied to it) against a `KeyValueStore`. A pair
//! is only ever observed whole: if either token is missing the session is
//! treated as logged out.

use std::sync::Arc;

use common::Secret;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::KeyValueStore;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_ID_KEY: &str = "user_id";
pub const PROFILE_KEY: &str = "user_profile";

/// Every key that belongs to a session. `clear()` removes all of them.
pub const SESSION_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_ID_KEY, PROFILE_KEY];

/// Access token plus the renewal token used to obtain the next one.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub access: Secret<String>,
    pub refresh: Secret<String>,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Secret::new(access.into()),
            refresh: Secret::new(refresh.into()),
        }
    }
}

#[derive(Clone)]
pub struct CredentialVault {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persist both tokens in a single `set_many`.
    pub async fn store(&self, pair: &CredentialPair) -> Result<()> {
        self.store
            .set_many(vec![
                (ACCESS_TOKEN_KEY, pair.access.expose().clone()),
                (REFRESH_TOKEN_KEY, pair.refresh.expose().clone()),
            ])
            .await?;
        debug!("stored credential pair");
        Ok(())
    }

    /// Current pair, or `None` when logged out.
    ///
    /// Backend failures are logged and reported as `None`: a request then goes
    /// out unauthenticated and the server decides.
    pub async fn read(&self) -> Option<CredentialPair> {
        let access = self.read_key(ACCESS_TOKEN_KEY).await?;
        let refresh = self.read_key(REFRESH_TOKEN_KEY).await;
        match refresh {
            Some(refresh) => Some(CredentialPair {
                access: Secret::new(access),
                refresh: Secret::new(refresh),
            }),
            None => {
                debug!("access token present without renewal token, treating as logged out");
                None
            }
        }
    }

    /// Remove both tokens and all cached user data.
    ///
    /// Never fails: a backend error is logged and the session is still
    /// considered logged out.
    pub async fn clear(&self) {
        match self.store.remove(&SESSION_KEYS).await {
            Ok(()) => debug!("cleared session credentials"),
            Err(e) => warn!(error = %e, "failed to clear session store, treating session as logged out"),
        }
    }

    /// Cache the signed-in user's id and profile alongside the tokens.
    pub async fn store_user(&self, user_id: &str, profile: &serde_json::Value) -> Result<()> {
        self.store
            .set_many(vec![
                (USER_ID_KEY, user_id.to_string()),
                (PROFILE_KEY, profile.to_string()),
            ])
            .await
    }

    pub async fn user_id(&self) -> Option<String> {
        self.read_key(USER_ID_KEY).await
    }

    /// Cached profile. An unparsable entry is treated as absent.
    pub async fn profile(&self) -> Option<serde_json::Value> {
        let raw = self.read_key(PROFILE_KEY).await?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "cached profile is not valid JSON, ignoring");
                None
            }
        }
    }

    async fn read_key(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(Some(value)) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!(key, error = %e, "session store read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::{MemoryStore, StoreFuture};

    fn vault_with(store: Arc<MemoryStore>) -> CredentialVault {
        CredentialVault::new(store)
    }

    /// Backend whose every operation fails.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
            Box::pin(async { Err(Error::Unavailable("disk gone".into())) })
        }
        fn set<'a>(&'a self, _key: &'a str, _value: String) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(Error::Unavailable("disk gone".into())) })
        }
        fn remove<'a>(&'a self, _keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(Error::Unavailable("disk gone".into())) })
        }
        fn set_many<'a>(&'a self, _pairs: Vec<(&'a str, String)>) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(Error::Unavailable("disk gone".into())) })
        }
    }

    #[tokio::test]
    async fn store_then_read_pair() {
        let vault = vault_with(Arc::new(MemoryStore::new()));
        vault
            .store(&CredentialPair::new("at_1", "rt_1"))
            .await
            .unwrap();

        let pair = vault.read().await.unwrap();
        assert_eq!(pair.access.expose(), "at_1");
        assert_eq!(pair.refresh.expose(), "rt_1");
    }

    #[tokio::test]
    async fn empty_store_reads_none() {
        let vault = vault_with(Arc::new(MemoryStore::new()));
        assert!(vault.read().await.is_none());
    }

    #[tokio::test]
    async fn partial_pair_is_absent() {
        let store = Arc::new(MemoryStore::new());
        store.set(ACCESS_TOKEN_KEY, "at_only".into()).await.unwrap();
        assert!(vault_with(store.clone()).read().await.is_none());

        store.remove(&[ACCESS_TOKEN_KEY]).await.unwrap();
        store.set(REFRESH_TOKEN_KEY, "rt_only".into()).await.unwrap();
        assert!(vault_with(store).read().await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_tokens_and_user_data() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault_with(store.clone());
        vault
            .store(&CredentialPair::new("at", "rt"))
            .await
            .unwrap();
        vault
            .store_user("u-7", &serde_json::json!({"name": "Sam"}))
            .await
            .unwrap();
        store.set("unrelated", "kept".into()).await.unwrap();

        vault.clear().await;

        assert!(vault.read().await.is_none());
        assert!(vault.user_id().await.is_none());
        assert!(vault.profile().await.is_none());
        assert_eq!(store.len().await, 1, "only non-session keys survive");
    }

    #[tokio::test]
    async fn clear_swallows_backend_errors() {
        let vault = CredentialVault::new(Arc::new(BrokenStore));
        vault.clear().await;
        assert!(vault.read().await.is_none());
    }

    #[tokio::test]
    async fn store_propagates_backend_errors() {
        let vault = CredentialVault::new(Arc::new(BrokenStore));
        let result = vault.store(&CredentialPair::new("at", "rt")).await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }

    #[tokio::test]
    async fn user_profile_roundtrip() {
        let vault = vault_with(Arc::new(MemoryStore::new()));
        let profile = serde_json::json!({"name": "Sam", "age": 31});
        vault.store_user("u-7", &profile).await.unwrap();

        assert_eq!(vault.user_id().await.as_deref(), Some("u-7"));
        assert_eq!(vault.profile().await, Some(profile));
    }

    #[tokio::test]
    async fn corrupt_profile_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.set(PROFILE_KEY, "{not json".into()).await.unwrap();
        assert!(vault_with(store).profile().await.is_none());
    }
}
