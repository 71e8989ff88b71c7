use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, header},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::push_subscription::{CreatePushSubscription, PushSubscription};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{Deployment, error::ApiError};

#[derive(Debug, Clone, Deserialize, TS)]
pub struct DeletePushSubscription {
    pub user_id: Uuid,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct VapidPublicKey {
    pub public_key: String,
}

/// Register the browser subscription, re-binding it when the endpoint is known
pub async fn subscribe(
    State(deployment): State<Deployment>,
    headers: HeaderMap,
    payload: Result<axum::Json<CreatePushSubscription>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<PushSubscription>>, ApiError> {
    let axum::Json(mut payload) = payload?;
    if !payload.endpoint.starts_with("https://") {
        return Err(ApiError::BadRequest(
            "endpoint must be an https URL".to_string(),
        ));
    }
    if payload.keys.p256dh.trim().is_empty() || payload.keys.auth.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "keys.p256dh and keys.auth are required".to_string(),
        ));
    }
    if payload.user_agent.is_none() {
        payload.user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let subscription = PushSubscription::upsert(&deployment.db().pool, &payload).await?;
    tracing::info!(
        subscription_id = %subscription.id,
        user_id = %subscription.user_id,
        "Push subscription registered"
    );
    Ok(ResponseJson(ApiResponse::success(subscription)))
}

pub async fn unsubscribe(
    State(deployment): State<Deployment>,
    payload: Result<axum::Json<DeletePushSubscription>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let axum::Json(payload) = payload?;
    let removed =
        PushSubscription::delete_by_endpoint(&deployment.db().pool, payload.user_id, &payload.endpoint)
            .await?;
    if removed == 0 {
        return Err(ApiError::NotFound("Push subscription"));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

/// Key browsers pass as `applicationServerKey` to `pushManager.subscribe`
pub async fn get_vapid_public_key(
    State(deployment): State<Deployment>,
) -> Result<ResponseJson<ApiResponse<VapidPublicKey>>, ApiError> {
    let public_key = deployment
        .vapid_public_key()
        .ok_or(ApiError::PushNotConfigured)?;
    Ok(ResponseJson(ApiResponse::success(VapidPublicKey {
        public_key: public_key.to_string(),
    })))
}

pub fn router(_deployment: &Deployment) -> Router<Deployment> {
    Router::new().nest(
        "/push",
        Router::new()
            .route("/subscriptions", post(subscribe).delete(unsubscribe))
            .route("/vapid-public-key", get(get_vapid_public_key)),
    )
}
