//! Credential lookup.
//!
//! Secrets are opaque byte maps addressed by namespace + name. Only the
//! `token` entry is read, and resolved tokens never show up in `Debug` output.

use crate::error::{EmailError, EmailResult};
use async_trait::async_trait;
use reconcile_worker::{InMemoryStore, ObjectKey, ObjectMeta, ObjectReader, Resource, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Key read from a Secret's data map.
pub const TOKEN_KEY: &str = "token";

/// Opaque credential bundle
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            data: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("metadata", &self.metadata)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Resource for Secret {
    const KIND: &'static str = "Secret";
    type Status = ();

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> Option<&()> {
        None
    }

    fn set_status(&mut self, _status: ()) {}
}

/// Read-only secret lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `None` when the secret does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;
}

#[async_trait]
impl SecretStore for InMemoryStore<Secret> {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        self.get(&ObjectKey::new(namespace, name)).await
    }
}

/// Resolved provider API token
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

/// Turns a `(namespace, secret name)` reference into an [`ApiToken`].
#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Read the `token` entry of `namespace/name`.
    ///
    /// A missing secret, a missing entry and an empty entry are all errors.
    pub async fn resolve_token(&self, namespace: &str, name: &str) -> EmailResult<ApiToken> {
        let key = ObjectKey::new(namespace, name);

        let secret = self
            .store
            .get_secret(namespace, name)
            .await?
            .ok_or_else(|| EmailError::SecretNotFound(key.clone()))?;

        let token = secret
            .data
            .get(TOKEN_KEY)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .filter(|token| !token.is_empty())
            .ok_or(EmailError::SecretKeyMissing {
                secret: key,
                key: TOKEN_KEY,
            })?;

        Ok(ApiToken(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn resolver(mock: MockSecretStore) -> SecretResolver {
        SecretResolver::new(Arc::new(mock))
    }

    #[tokio::test]
    async fn test_resolves_token_entry() {
        let mut mock = MockSecretStore::new();
        mock.expect_get_secret()
            .with(eq("default"), eq("mailgun-token"))
            .times(1)
            .returning(|ns, name| Ok(Some(Secret::new(ns, name).with_entry("token", "key-123"))));

        let token = resolver(mock)
            .resolve_token("default", "mailgun-token")
            .await
            .unwrap();
        assert_eq!(token.expose(), "key-123");
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let mut mock = MockSecretStore::new();
        mock.expect_get_secret().returning(|_, _| Ok(None));

        let err = resolver(mock)
            .resolve_token("default", "absent")
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::SecretNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_and_empty_token_entry() {
        let mut mock = MockSecretStore::new();
        mock.expect_get_secret()
            .with(eq("default"), eq("wrong-key"))
            .returning(|ns, name| Ok(Some(Secret::new(ns, name).with_entry("apiKey", "x"))));
        mock.expect_get_secret()
            .with(eq("default"), eq("empty"))
            .returning(|ns, name| Ok(Some(Secret::new(ns, name).with_entry("token", ""))));
        let resolver = resolver(mock);

        for name in ["wrong-key", "empty"] {
            let err = resolver.resolve_token("default", name).await.unwrap_err();
            assert!(matches!(err, EmailError::SecretKeyMissing { key: "token", .. }));
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut mock = MockSecretStore::new();
        mock.expect_get_secret()
            .returning(|_, _| Err(StoreError::Unavailable("connection reset".into())));

        let err = resolver(mock)
            .resolve_token("default", "any")
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::Store(_)));
    }

    #[tokio::test]
    async fn test_in_memory_store_lookup() {
        let store = InMemoryStore::new();
        store
            .create(Secret::new("team-a", "token").with_entry("token", "abc"))
            .await
            .unwrap();

        let found = store.get_secret("team-a", "token").await.unwrap();
        assert!(found.is_some());
        assert!(store.get_secret("team-b", "token").await.unwrap().is_none());
    }

    #[test]
    fn test_debug_output_redacts_values() {
        let secret = Secret::new("default", "s").with_entry("token", "super-secret");
        let debug = format!("{secret:?} {:?}", ApiToken::new("super-secret"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("token"));
    }
}
