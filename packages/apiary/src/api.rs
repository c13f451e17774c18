//! API endpoint handlers for the service.
//!
//! ## Dependency injection
//!
//! We use [`aerosol`][^1] to manage dependencies and inject them into
//! handlers. Reference [`State`] for the list of dependencies; note that when
//! providing dependencies that are in this required list you need to provide
//! them in reverse order of the list.
//!
//! Items that are in the list can be extracted in handlers using the
//! [`Dep`](aerosol::axum::Dep) extractor.
//!
//! [^1]: https://docs.rs/aerosol
//!
//! ## Response types
//!
//! Handlers return a response type that implements
//! [`IntoResponse`](axum::response::IntoResponse). We do it this way instead
//! of returning a more generic response type because it supports better
//! documentation and makes it easier to realize if you're writing
//! backwards-incompatible changes to the API.
//!
//! ## Error rendering
//!
//! Two rules hold across every handler:
//!
//! - "does not exist", "was deleted", and "you have no relation to it" are
//!   indistinguishable in responses;
//! - store/driver error text never reaches a response body; internal
//!   failures render as a fixed opaque message.

use std::time::Duration;

use aerosol::Aero;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub mod v1;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// The opaque message rendered for internal failures. Driver and store
/// error text may contain connection strings or secret fragments; it stays
/// in logs.
pub const OPAQUE_ERROR: &str = "unknown error";

pub type State = Aero![
    crate::db::Postgres,
    crate::secrets::SecretCipher,
    crate::credentials::CredentialResolver,
    crate::swarm::SwarmProvisioner,
];

pub fn router(state: State) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    Router::new()
        .nest("/api/v1", v1::router())
        .layer(middleware)
        .with_state(state)
}
