use axum::{middleware, routing, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::chat::messages;
use crate::identity::middleware::inject_users;
use crate::identity::routes as identity_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
///
/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`:
/// the auth rate limiter keys on the peer address.
pub fn build_router(state: AppState) -> Router {
    let rate_limit = &state.rate_limit;
    // Rate limiting on register/login per peer IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(rate_limit.auth_per_second.max(1))
            .burst_size(rate_limit.auth_burst.max(1))
            .finish()
            .expect("non-zero governor quota"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/api/register", routing::post(identity_routes::register))
        .route("/api/login", routing::post(identity_routes::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Authenticated routes (bearer token required: AuthUser extractor validates it)
    let authenticated_routes = Router::new()
        .route("/api/users", routing::get(identity_routes::list_users))
        .route("/rooms/{room}/import", routing::post(messages::import_room));

    // Public read tier
    let public_routes = Router::new()
        .route("/rooms/{room}/messages", routing::get(messages::get_room_messages))
        .route("/rooms/{room}/export", routing::get(messages::export_room))
        .route("/health", routing::get(health_check));

    // WebSocket endpoint (auth via query param or bearer header)
    let ws_routes = Router::new().route("/ws", routing::get(ws_handler::ws_upgrade));

    Router::new()
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(public_routes)
        .merge(ws_routes)
        .layer(middleware::from_fn_with_state(state.clone(), inject_users))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
