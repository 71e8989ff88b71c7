use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::Deployment;

pub mod activity_logs;
pub mod assets;
pub mod functions;
pub mod health;
pub mod push_subscriptions;
pub mod recurring_tasks;
pub mod tasks;

pub fn router(deployment: Deployment) -> Router {
    let api_routes = Router::new()
        .merge(health::router(&deployment))
        .merge(tasks::router(&deployment))
        .merge(recurring_tasks::router(&deployment))
        .merge(push_subscriptions::router(&deployment))
        .merge(activity_logs::router(&deployment));

    // Browsers call the function endpoints directly, so CORS covers them too
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_routes)
        .nest("/functions/v1", functions::router(&deployment))
        .merge(assets::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(deployment)
}
