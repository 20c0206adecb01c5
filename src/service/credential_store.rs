use crate::db::IndexStorage;
use crate::error::NexusError;
use crate::google_oauth::tokens::TokenSet;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::warn;

pub const CREDENTIAL_SERVICE: &str = "search-nexus";
pub const CREDENTIAL_ACCOUNT: &str = "google-oauth";

/// Single durable slot holding the serialized token set.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<TokenSet>, NexusError>;
    async fn save(&self, tokens: &TokenSet) -> Result<(), NexusError>;
    async fn delete(&self) -> Result<(), NexusError>;
}

/// Credential slot backed by the `secrets` table.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    storage: IndexStorage,
}

impl SqliteCredentialStore {
    pub fn new(storage: IndexStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self) -> Result<Option<TokenSet>, NexusError> {
        let Some(blob) = self
            .storage
            .get_secret(CREDENTIAL_SERVICE, CREDENTIAL_ACCOUNT)
            .await?
        else {
            return Ok(None);
        };
        match TokenSet::from_blob(&blob) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                // An unreadable blob is as good as no credential.
                warn!("Discarding corrupt stored credential: {}", e);
                Ok(None)
            }
        }
    }

    async fn save(&self, tokens: &TokenSet) -> Result<(), NexusError> {
        let blob = tokens.to_blob()?;
        self.storage
            .set_secret(CREDENTIAL_SERVICE, CREDENTIAL_ACCOUNT, &blob)
            .await
    }

    async fn delete(&self) -> Result<(), NexusError> {
        self.storage
            .delete_secret(CREDENTIAL_SERVICE, CREDENTIAL_ACCOUNT)
            .await
    }
}

/// Process-local slot, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<TokenSet>>,
}

impl MemoryCredentialStore {
    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            slot: Mutex::new(Some(tokens)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<TokenSet>>, NexusError> {
        self.slot
            .lock()
            .map_err(|_| NexusError::Io(std::io::Error::other("credential slot poisoned")))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<TokenSet>, NexusError> {
        Ok(self.lock()?.clone())
    }

    async fn save(&self, tokens: &TokenSet) -> Result<(), NexusError> {
        *self.lock()? = Some(tokens.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<(), NexusError> {
        *self.lock()? = None;
        Ok(())
    }
}
