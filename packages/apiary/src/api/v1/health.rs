use aerosol::axum::Dep;
use axum::{http::StatusCode, response::IntoResponse};
use color_eyre::eyre::Report;
use tracing::error;

use crate::db::Postgres;

/// Health check endpoint.
///
/// ## Validation
///
/// Validates that the database is accessible before responding.
#[tracing::instrument(skip(db))]
pub async fn handle(Dep(db): Dep<Postgres>) -> PingResponse {
    match db.ping().await {
        Ok(_) => PingResponse::Success,
        Err(err) => {
            error!(?err, "ping database");
            PingResponse::Error(err)
        }
    }
}

#[derive(Debug)]
pub enum PingResponse {
    Success,
    Error(Report),
}

impl IntoResponse for PingResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            PingResponse::Success => StatusCode::OK.into_response(),
            PingResponse::Error(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "health check failed").into_response()
            }
        }
    }
}
