use axum::http::Method;
use tower_http::cors::{Any, CorsLayer};

/// CORS layer shared by both loopback services.
///
/// Browser extensions call these services from extension pages, so every
/// response carries `Access-Control-Allow-Origin: *` and OPTIONS preflight
/// is answered. The services bind loopback only; CORS is not an access
/// control here.
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}
