//! External identities and their mapping onto local users.
//!
//! Every provider kind turns its verified assertion into something that
//! implements [`ExternalUserInfo`]. User sync only talks to that trait, so
//! new provider kinds plug in without touching the sync logic.

use serde::{Deserialize, Serialize};

/// Claims read from a verified ID token.
///
/// The issuer is deliberately absent: it is attached by
/// [`OidcUserInfo::new`] from the provider configuration, never from the
/// token payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    /// The subject claim (unique user identifier at the provider).
    pub subject: String,
    /// Email address.
    pub email: Option<String>,
    /// Full display name.
    pub name: Option<String>,
    /// Given name.
    pub given_name: Option<String>,
    /// Family name.
    pub family_name: Option<String>,
}

impl IdentityClaims {
    /// Creates claims for a subject with no profile data.
    #[must_use]
    pub fn new(subject: String) -> Self {
        Self {
            subject,
            ..Self::default()
        }
    }

    /// Sets the email claim.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Sets the given and family names.
    #[must_use]
    pub fn with_names(mut self, given_name: Option<String>, family_name: Option<String>) -> Self {
        self.given_name = given_name;
        self.family_name = family_name;
        self
    }
}

/// Display metadata copied onto the local user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
}

/// Which external account authenticated a local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContext {
    /// Issuer URL of the provider.
    pub issuer: String,
    /// Subject at that issuer.
    pub subject: String,
    /// Email reported by the provider.
    pub email: Option<String>,
}

impl ProviderContext {
    /// Returns true if both contexts name the same external account.
    #[must_use]
    pub fn same_account(&self, other: &Self) -> bool {
        self.issuer == other.issuer && self.subject == other.subject
    }
}

/// The capability set every provider kind exposes to user sync.
pub trait ExternalUserInfo: Send + Sync {
    /// Local login name this identity maps to.
    fn login(&self) -> String;

    /// Display metadata for the local user record.
    fn profile(&self) -> UserProfile;

    /// The external account behind this identity.
    fn provider_context(&self) -> ProviderContext;
}

/// Identity produced by an OIDC provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcUserInfo {
    claims: IdentityClaims,
    issuer: String,
}

impl OidcUserInfo {
    /// Binds verified claims to the issuer of the provider that verified them.
    #[must_use]
    pub fn new(claims: IdentityClaims, issuer: impl Into<String>) -> Self {
        Self {
            claims,
            issuer: issuer.into(),
        }
    }

    /// Returns the subject claim.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.claims.subject
    }

    /// Returns the issuer this identity was stamped with.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the email claim, if any.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.claims.email.as_deref()
    }
}

impl ExternalUserInfo for OidcUserInfo {
    fn login(&self) -> String {
        self.claims
            .email
            .as_deref()
            .map(login_from_email)
            .unwrap_or_default()
    }

    fn profile(&self) -> UserProfile {
        UserProfile {
            display_name: self.claims.name.clone(),
            given_name: self.claims.given_name.clone(),
            family_name: self.claims.family_name.clone(),
            email: self.claims.email.clone(),
        }
    }

    fn provider_context(&self) -> ProviderContext {
        ProviderContext {
            issuer: self.issuer.clone(),
            subject: self.claims.subject.clone(),
            email: self.claims.email.clone(),
        }
    }
}

/// Derives a login name from the local part of an email address.
///
/// An address without `@` is used whole.
#[must_use]
pub fn login_from_email(email: &str) -> String {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, _)) => local.to_string(),
        None => email.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> IdentityClaims {
        IdentityClaims::new("sub_alice".to_string())
            .with_email(Some("alice@example.com".to_string()))
            .with_name(Some("Alice Liddell".to_string()))
            .with_names(Some("Alice".to_string()), Some("Liddell".to_string()))
    }

    #[test]
    fn login_is_email_local_part() {
        assert_eq!(login_from_email("alice@example.com"), "alice");
        assert_eq!(login_from_email(" bob.smith@corp.example "), "bob.smith");
        assert_eq!(login_from_email("no-domain"), "no-domain");
        assert_eq!(login_from_email(""), "");
    }

    #[test]
    fn oidc_user_info_derives_login_from_email() {
        let info = OidcUserInfo::new(alice(), "https://idp.example.com");
        assert_eq!(info.login(), "alice");
    }

    #[test]
    fn oidc_user_info_without_email_has_empty_login() {
        let info = OidcUserInfo::new(
            IdentityClaims::new("sub_x".to_string()),
            "https://idp.example.com",
        );
        assert_eq!(info.login(), "");
    }

    #[test]
    fn oidc_user_info_profile_copies_claims() {
        let profile = OidcUserInfo::new(alice(), "https://idp.example.com").profile();

        assert_eq!(profile.display_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(profile.given_name.as_deref(), Some("Alice"));
        assert_eq!(profile.family_name.as_deref(), Some("Liddell"));
        assert_eq!(profile.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn provider_context_uses_stamped_issuer() {
        let info = OidcUserInfo::new(alice(), "https://idp.example.com");
        let ctx = info.provider_context();

        assert_eq!(ctx.issuer, "https://idp.example.com");
        assert_eq!(ctx.subject, "sub_alice");
        assert_eq!(ctx.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn same_account_compares_issuer_and_subject() {
        let a = ProviderContext {
            issuer: "https://a.example.com".to_string(),
            subject: "1".to_string(),
            email: None,
        };
        let same = ProviderContext {
            email: Some("x@example.com".to_string()),
            ..a.clone()
        };
        let other_issuer = ProviderContext {
            issuer: "https://b.example.com".to_string(),
            ..a.clone()
        };

        assert!(a.same_account(&same));
        assert!(!a.same_account(&other_issuer));
    }
}
