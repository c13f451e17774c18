//! GitHub credential resolution.
//!
//! A user can hold several competing GitHub credentials at once: a personal
//! OAuth token, a GitHub-App installation token on the same account row, and
//! org-scoped tokens minted against a workspace's source control
//! installation. [`CredentialResolver`] picks the single best-available one
//! under a fixed precedence table:
//!
//! 1. org-scoped token, when the workspace links a source control org;
//! 2. app/installation token (narrower, revocable scope);
//! 3. personal OAuth token.
//!
//! "No credential" is a normal outcome, not an error. Missing users, mock
//! identities, absent profiles, blank usernames, missing tokens, and
//! decryption failures all resolve to `None`; callers can never learn *why*
//! a token was unavailable, only that it was.

use derive_more::Debug;
use tracing::{debug, warn};

use crate::{
    auth::{AccessToken, UserId, WorkspaceRef},
    secrets::SecretCipher,
    store::{CredentialStore, ProviderAccount, WorkspaceStore},
};

/// Provider key for GitHub credential rows.
pub const GITHUB_PROVIDER: &str = "github";

/// Envelope field names for the sensitive columns this module reads.
pub const FIELD_ACCESS_TOKEN: &str = "access_token";
pub const FIELD_APP_ACCESS_TOKEN: &str = "app_access_token";
pub const FIELD_SOURCE_CONTROL_TOKEN: &str = "source_control_token";

/// A resolved GitHub credential.
///
/// The only shape callers may transmit. The token is debug-redacted; do not
/// log it, and do not serialize this type into a response body.
#[derive(Clone, Debug)]
pub struct GithubCredential {
    pub username: String,
    pub token: AccessToken,
}

/// Configuration for credential resolution.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Substring marking mock/test identities, matched case-insensitively
    /// against user emails (so subdomains of the marker also match). Mock
    /// identities never resolve to a real credential.
    pub mock_email_marker: String,
}

/// Resolves the best-available GitHub credential for a user, optionally in
/// the context of a workspace. Stateless between calls; safe to share.
#[derive(Clone, Debug)]
#[debug("CredentialResolver(marker = {})", self.mock_email_marker)]
pub struct CredentialResolver {
    cipher: SecretCipher,
    mock_email_marker: String,
}

impl CredentialResolver {
    pub fn new(config: &ResolverConfig, cipher: SecretCipher) -> Self {
        Self {
            cipher,
            mock_email_marker: config.mock_email_marker.to_lowercase(),
        }
    }

    /// Whether the email belongs to a mock/test identity.
    pub fn is_mock_identity(&self, email: &str) -> bool {
        email.to_lowercase().contains(&self.mock_email_marker)
    }

    /// Resolve the user's GitHub credential.
    ///
    /// Without a workspace slug this is the "who am I" path: the newest
    /// account row's preferred token. With a slug, the workspace's linked
    /// source control org takes precedence; a workspace without one falls
    /// back to the personal path, logged as a degraded condition.
    #[tracing::instrument(skip(self, store), fields(workspace = workspace_slug.unwrap_or("-")))]
    pub async fn resolve_github_credential<S>(
        &self,
        store: &S,
        user_id: UserId,
        workspace_slug: Option<&str>,
    ) -> color_eyre::Result<Option<GithubCredential>>
    where
        S: CredentialStore + WorkspaceStore,
    {
        let Some(user) = store.user_by_id(user_id).await? else {
            return Ok(None);
        };
        if self.is_mock_identity(&user.email) {
            debug!("credentials.resolve.mock_identity");
            return Ok(None);
        }

        let Some(profile) = store.github_profile_by_user(user_id).await? else {
            return Ok(None);
        };
        let Some(username) = profile.username.filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };

        if let Some(slug) = workspace_slug {
            let workspace = store
                .workspace_by_ref(&WorkspaceRef::slug(slug))
                .await?
                .filter(|w| !w.deleted);
            match workspace.and_then(|w| w.source_control_org_id) {
                Some(org_id) => {
                    let Some(record) = store.source_control_token(user_id, org_id).await? else {
                        return Ok(None);
                    };
                    if record.token.is_empty() {
                        return Ok(None);
                    }
                    let Some(token) =
                        self.open_token(FIELD_SOURCE_CONTROL_TOKEN, &record.token)
                    else {
                        return Ok(None);
                    };
                    return Ok(Some(GithubCredential { username, token }));
                }
                None => {
                    // Degraded path: the workspace has no org-level
                    // installation, so the user's personal token stands in.
                    warn!("credentials.resolve.personal_fallback");
                }
            }
        }

        let accounts = store
            .accounts_by_user_and_provider(user_id, GITHUB_PROVIDER)
            .await?;
        let Some(account) = pick_account(&accounts) else {
            return Ok(None);
        };
        match self.preferred_account_token(account) {
            Some(token) => Ok(Some(GithubCredential { username, token })),
            None => Ok(None),
        }
    }

    /// The preferred token on an account row: the app/installation token
    /// when present (narrower, revocable scope), otherwise the personal
    /// OAuth token.
    pub fn preferred_account_token(&self, account: &ProviderAccount) -> Option<AccessToken> {
        if let Some(raw) = account.app_access_token.as_deref().filter(|t| !t.is_empty()) {
            if let Some(token) = self.open_token(FIELD_APP_ACCESS_TOKEN, raw) {
                return Some(token);
            }
            return None;
        }
        let raw = account.access_token.as_deref().filter(|t| !t.is_empty())?;
        self.open_token(FIELD_ACCESS_TOKEN, raw)
    }

    /// Decrypt a stored envelope, collapsing every failure to `None`.
    ///
    /// The cause is logged server-side without the envelope or any key
    /// material; callers only see "no credential".
    fn open_token(&self, field_name: &str, raw: &str) -> Option<AccessToken> {
        match self.cipher.decrypt_field_from_json(field_name, raw) {
            Ok(plaintext) if plaintext.is_empty() => None,
            Ok(plaintext) => Some(AccessToken::new(plaintext)),
            Err(error) => {
                warn!(%error, field_name, "credentials.resolve.decrypt_failed");
                None
            }
        }
    }
}

/// Deterministically pick among duplicate account rows: newest first.
fn pick_account(accounts: &[ProviderAccount]) -> Option<&ProviderAccount> {
    accounts
        .iter()
        .max_by_key(|account| (account.created_at, account.id))
}
