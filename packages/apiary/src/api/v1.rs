use axum::{Router, routing::get};

use crate::api::State;

pub mod health;
pub mod me;
pub mod swarms;
pub mod workspaces;

pub fn router() -> Router<State> {
    Router::new()
        .route("/health", get(health::handle))
        .nest("/me", me::router())
        .nest(
            "/workspaces",
            workspaces::router().merge(swarms::workspace_router()),
        )
        .nest("/swarms", swarms::router())
}
