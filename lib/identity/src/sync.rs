//! Synchronizing external identities into the local user store.

use crate::error::{StoreError, SyncError};
use crate::identity::ExternalUserInfo;
use crate::user::UserRecord;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Persistent storage for local users.
///
/// Implementations must make `upsert` atomic per login: concurrent upserts
/// of the same login may overwrite each other but never produce two records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Finds a user by login name.
    async fn find(&self, login: &str) -> Result<Option<UserRecord>, Report<StoreError>>;

    /// Inserts the user, or replaces the stored record with the same login.
    async fn upsert(&self, user: &UserRecord) -> Result<(), Report<StoreError>>;
}

/// Process-local user store, used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored users.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Returns true if no user has been stored.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find(&self, login: &str) -> Result<Option<UserRecord>, Report<StoreError>> {
        Ok(self.users.read().await.get(login).cloned())
    }

    async fn upsert(&self, user: &UserRecord) -> Result<(), Report<StoreError>> {
        self.users
            .write()
            .await
            .insert(user.login().to_string(), user.clone());
        Ok(())
    }
}

/// Creates or updates the local user for an external identity.
///
/// The login is derived from the identity, so repeated logins by the same
/// person resolve to the same record. Profile fields are last-write-wins.
///
/// # Errors
///
/// Returns `SyncError::MissingLogin` when no login can be derived, and
/// `SyncError::Store` when the store fails. Nothing is written in the first
/// case.
#[instrument(skip_all, fields(issuer = %info.provider_context().issuer))]
pub async fn sync_user(
    store: &dyn UserStore,
    info: &dyn ExternalUserInfo,
) -> Result<UserRecord, Report<SyncError>> {
    let context = info.provider_context();
    let login = info.login();
    if login.is_empty() {
        return Err(SyncError::MissingLogin {
            subject: context.subject,
            issuer: context.issuer,
        }
        .into());
    }

    let existing = store.find(&login).await.map_err(|e| SyncError::Store {
        details: e.to_string(),
    })?;

    let is_new = existing.is_none();
    let mut user = existing.unwrap_or_else(|| UserRecord::new(login.clone()));
    user.apply_profile(info.profile());
    user.record_login(context);

    store.upsert(&user).await.map_err(|e| SyncError::Store {
        details: e.to_string(),
    })?;

    debug!(login = %login, is_new, "synced user from external identity");
    Ok(user)
}
