//! Axum router configuration

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{
    fragment_config_get, fragment_config_set, fragment_start, fragment_status, fragment_stop,
    get_config, get_delay, health_check, hls_delayed, hls_live, live_start, live_status,
    live_stop, raw_captions, set_delay, version_check,
};
use super::ws::ws_handler;

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors_enabled = state.config.cors_enabled;

    let mut router = Router::new()
        // Health and version endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        // Configuration
        .route("/config", get(get_config))
        .route("/delay", get(get_delay).post(set_delay))
        // Live run control
        .route("/live/status", get(live_status))
        .route("/live/start", post(live_start))
        .route("/live/stop", post(live_stop))
        // Fragment rotation control
        .route("/fragment/config", get(fragment_config_get).post(fragment_config_set))
        .route("/fragment/status", get(fragment_status))
        .route("/fragment/start", post(fragment_start))
        .route("/fragment/stop", post(fragment_stop))
        .route("/fragment/raw-captions", get(raw_captions))
        // Derived playlists (segments are served by the adjacent static handler)
        .route("/hls/live.m3u8", get(hls_live))
        .route("/hls/delayed.m3u8", get(hls_delayed))
        // Realtime channel
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN])
            .max_age(Duration::from_secs(3600));
        router = router.layer(cors);
    }

    router.with_state(state)
}
