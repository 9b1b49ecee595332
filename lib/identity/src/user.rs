//! Local user record.
//!
//! A user is keyed by login name. The login is derived from the external
//! identity's email, so the same person signing in through several
//! providers lands on one record that remembers every linked account.

use crate::identity::{ProviderContext, UserProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local user of the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Login name, the natural key.
    login: String,
    /// Display metadata from the most recent login.
    profile: UserProfile,
    /// Every external account that has authenticated this user.
    providers: Vec<ProviderContext>,
    /// The external account behind the most recent login.
    last_authenticated_by: Option<ProviderContext>,
    /// When the user record was created.
    created_at: DateTime<Utc>,
    /// When the user record was last updated.
    updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Creates an empty record for a login seen for the first time.
    #[must_use]
    pub fn new(login: String) -> Self {
        let now = Utc::now();
        Self {
            login,
            profile: UserProfile::default(),
            providers: Vec::new(),
            last_authenticated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a record with all fields specified.
    ///
    /// Use this when reconstituting a user from storage.
    #[must_use]
    pub fn with_all_fields(
        login: String,
        profile: UserProfile,
        providers: Vec<ProviderContext>,
        last_authenticated_by: Option<ProviderContext>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            login,
            profile,
            providers,
            last_authenticated_by,
            created_at,
            updated_at,
        }
    }

    /// Returns the login name.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Returns the display metadata.
    #[must_use]
    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Returns every linked external account.
    #[must_use]
    pub fn providers(&self) -> &[ProviderContext] {
        &self.providers
    }

    /// Returns the external account behind the most recent login.
    #[must_use]
    pub fn last_authenticated_by(&self) -> Option<&ProviderContext> {
        self.last_authenticated_by.as_ref()
    }

    /// Returns when the user was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the user was last updated.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Overwrites profile fields the provider supplied. Fields the provider
    /// left out keep their stored value.
    pub fn apply_profile(&mut self, profile: UserProfile) {
        if profile.display_name.is_some() {
            self.profile.display_name = profile.display_name;
        }
        if profile.given_name.is_some() {
            self.profile.given_name = profile.given_name;
        }
        if profile.family_name.is_some() {
            self.profile.family_name = profile.family_name;
        }
        if profile.email.is_some() {
            self.profile.email = profile.email;
        }
        self.updated_at = Utc::now();
    }

    /// Records a login through the given external account.
    pub fn record_login(&mut self, context: ProviderContext) {
        match self.providers.iter_mut().find(|p| p.same_account(&context)) {
            Some(existing) => *existing = context.clone(),
            None => self.providers.push(context.clone()),
        }
        self.last_authenticated_by = Some(context);
        self.updated_at = Utc::now();
    }
}
