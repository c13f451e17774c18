//! Current user endpoints.

use aerosol::axum::Dep;
use axum::{
    Json, Router, extract::Query, http::StatusCode, response::IntoResponse, routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    api::{OPAQUE_ERROR, State},
    auth::RawToken,
    credentials::CredentialResolver,
    db::Postgres,
};

pub fn router() -> Router<State> {
    Router::new().route("/github", get(github_status))
}

#[derive(Debug, Deserialize)]
pub struct GithubStatusParams {
    /// Optional workspace context; switches resolution to the workspace's
    /// org-scoped credential when one is linked.
    #[serde(default)]
    workspace: Option<String>,
}

/// Response for GET /me/github.
///
/// Presence signal only. The resolved token itself never appears in a
/// response body.
#[derive(Debug, Serialize)]
pub struct GithubStatusResponse {
    pub username: String,
}

/// Report whether the caller has a usable GitHub credential.
///
/// ## Endpoint
/// ```
/// GET /api/v1/me/github?workspace=<slug>
/// Authorization: Bearer <api_key>
/// ```
///
/// ## Responses
/// - 200: A credential resolved; body carries the GitHub username only
/// - 401: Not authenticated
/// - 404: No usable credential (for any reason; the cause is not disclosed)
#[tracing::instrument(skip(db, resolver, token))]
pub async fn github_status(
    Dep(db): Dep<Postgres>,
    Dep(resolver): Dep<CredentialResolver>,
    token: RawToken,
    Query(params): Query<GithubStatusParams>,
) -> GithubStatusHttpResponse {
    let user = match db.validate(&token).await {
        Ok(Some(user)) => user,
        Ok(None) => return GithubStatusHttpResponse::Unauthorized,
        Err(err) => {
            error!(?err, "me.github.auth_error");
            return GithubStatusHttpResponse::Error;
        }
    };

    match resolver
        .resolve_github_credential(&db, user.user_id, params.workspace.as_deref())
        .await
    {
        Ok(Some(credential)) => {
            info!(user_id = %user.user_id, "me.github.resolved");
            GithubStatusHttpResponse::Success(GithubStatusResponse {
                username: credential.username,
            })
        }
        Ok(None) => GithubStatusHttpResponse::NoCredential,
        Err(err) => {
            error!(?err, "me.github.error");
            GithubStatusHttpResponse::Error
        }
    }
}

#[derive(Debug)]
pub enum GithubStatusHttpResponse {
    Success(GithubStatusResponse),
    NoCredential,
    Unauthorized,
    Error,
}

impl IntoResponse for GithubStatusHttpResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            GithubStatusHttpResponse::Success(body) => {
                (StatusCode::OK, Json(body)).into_response()
            }
            GithubStatusHttpResponse::NoCredential => {
                (StatusCode::NOT_FOUND, "No GitHub credential available").into_response()
            }
            GithubStatusHttpResponse::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            GithubStatusHttpResponse::Error => {
                (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_ERROR).into_response()
            }
        }
    }
}
