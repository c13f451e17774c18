//! Rate limiting configuration for the API.
//!
//! Uses tower-governor to implement rate limiting based on client IP
//! address.

use std::sync::Arc;

use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

/// Rate limiter for the swarm provisioning endpoint.
///
/// Provisioning creates remote infrastructure; it should never be hit in a
/// tight loop.
///
/// **Configuration:**
/// - ~10 requests per minute per IP address
/// - Uses SmartIpKeyExtractor which checks x-forwarded-for, x-real-ip, and
///   forwarded headers before falling back to peer IP
pub fn provisioning() -> GovernorLayer<
    SmartIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
> {
    let config = GovernorConfigBuilder::default()
        .per_second(6) // ~10 per minute: replenish 1 every 6 seconds
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("valid governor config");

    GovernorLayer::new(Arc::new(config))
}

/// Rate limiter for the ingest webhook endpoint.
///
/// The ingestion service delivers progress in bursts; allow more headroom
/// than the provisioning endpoint while still bounding abuse.
///
/// **Configuration:**
/// - 60 requests per minute per IP address (1/second)
/// - Uses SmartIpKeyExtractor
pub fn webhook() -> GovernorLayer<
    SmartIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
> {
    let config = GovernorConfigBuilder::default()
        .per_second(1) // 60 per minute: replenish 1 every second
        .burst_size(20)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("valid governor config");

    GovernorLayer::new(Arc::new(config))
}
