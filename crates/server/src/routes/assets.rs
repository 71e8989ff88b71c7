use axum::{Router, response::Response, routing::get};
use utils::assets::serve_asset;

use crate::Deployment;

/// Service worker that renders push payloads as notifications
pub async fn service_worker() -> Response {
    serve_asset("sw-push.js")
}

pub fn router() -> Router<Deployment> {
    Router::new().route("/sw-push.js", get(service_worker))
}
