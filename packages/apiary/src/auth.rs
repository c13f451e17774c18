use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use derive_more::{Debug, Display, From, Into};
use serde::{Deserialize, Serialize};

/// An ID uniquely identifying a user account.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    Default,
    Deserialize,
    Serialize,
    From,
    Into,
)]
pub struct UserId(u64);

impl UserId {
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(id: i64) -> Self {
        Self(id as u64)
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

/// An ID uniquely identifying a workspace.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    Default,
    Deserialize,
    Serialize,
    From,
    Into,
)]
pub struct WorkspaceId(u64);

impl WorkspaceId {
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(id: i64) -> Self {
        Self(id as u64)
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

/// An ID uniquely identifying a provisioned swarm record.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    Default,
    Deserialize,
    Serialize,
    From,
    Into,
)]
pub struct SwarmId(u64);

impl SwarmId {
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(id: i64) -> Self {
        Self(id as u64)
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

/// An ID uniquely identifying an organization-level source control
/// installation.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    Default,
    Deserialize,
    Serialize,
    From,
    Into,
)]
pub struct SourceControlOrgId(u64);

impl SourceControlOrgId {
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(id: i64) -> Self {
        Self(id as u64)
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

/// A workspace addressed either by slug (human-facing) or by id.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum WorkspaceRef {
    #[display("{_0}")]
    Slug(String),
    #[display("{_0}")]
    Id(WorkspaceId),
}

impl WorkspaceRef {
    pub fn slug(slug: impl Into<String>) -> Self {
        Self::Slug(slug.into())
    }
}

impl From<WorkspaceId> for WorkspaceRef {
    fn from(id: WorkspaceId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for WorkspaceRef {
    fn from(slug: &str) -> Self {
        Self::Slug(slug.to_string())
    }
}

/// A user's role within a workspace.
///
/// `Owner` is derived from `workspace.owner_id` and is never stored as a
/// membership row; the remaining roles are membership roles.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Pm,
    Developer,
    Stakeholder,
    Viewer,
}

impl WorkspaceRole {
    /// Parse a role from its database name.
    pub fn from_db_name(name: &str) -> Option<Self> {
        match name {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "pm" => Some(Self::Pm),
            "developer" => Some(Self::Developer),
            "stakeholder" => Some(Self::Stakeholder),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    /// The role's database name.
    pub fn as_db_name(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Pm => "pm",
            Self::Developer => "developer",
            Self::Stakeholder => "stakeholder",
            Self::Viewer => "viewer",
        }
    }

    /// Whether this role can view workspace content.
    pub fn can_read(&self) -> bool {
        true
    }

    /// Whether this role can mutate workspace content.
    pub fn can_write(&self) -> bool {
        matches!(
            self,
            Self::Owner | Self::Admin | Self::Pm | Self::Developer
        )
    }

    /// Whether this role can administer the workspace (settings, members).
    pub fn can_admin(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Pm)
    }
}

/// An unauthenticated token extracted from the Authorization header.
///
/// These are provided by the client and have not yet been validated against
/// the database. To validate a token, use [`crate::db::Postgres::validate`].
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[debug("RawToken(..)")]
pub struct RawToken(String);

impl RawToken {
    /// Create a new raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// View the token's plaintext. Do not log or serialize the result.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl<S: Into<String>> From<S> for RawToken {
    fn from(token: S) -> Self {
        Self::new(token)
    }
}

impl AsRef<RawToken> for RawToken {
    fn as_ref(&self) -> &RawToken {
        self
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RawToken {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Err((StatusCode::UNAUTHORIZED, "Authorization header required"));
        };
        let Ok(token) = header.to_str() else {
            return Err((
                StatusCode::BAD_REQUEST,
                "Authorization header must be a string",
            ));
        };

        let token = match token.strip_prefix("Bearer") {
            Some(token) => token.trim(),
            None => token.trim(),
        };
        if token.is_empty() {
            return Err((StatusCode::BAD_REQUEST, "Empty authorization token"));
        }

        Ok(RawToken::new(token))
    }
}

/// An authenticated caller, validated against the database.
///
/// This type cannot be extracted directly from a request; it must be obtained
/// by calling [`crate::db::Postgres::validate`] with a [`RawToken`].
#[derive(Copy, Clone, Debug)]
pub struct AuthenticatedUser {
    /// The user ID the presented key belongs to.
    pub user_id: UserId,
}

/// A decrypted third-party access token.
///
/// The plaintext is only reachable through [`expose`](Self::expose); `Debug`
/// is redacted so the token cannot leak through logs or error formatting.
#[derive(Clone, Eq, PartialEq, Debug)]
#[debug("AccessToken(..)")]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// View the token's plaintext. Scope the result to the single call that
    /// needs it; never attach it to logged or serialized values.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
