//! Fan-out of one notification to every push subscription of a set of users.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use db::{DBService, models::push_subscription::PushSubscription};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum PushError {
    /// The push service no longer knows the subscription (404/410)
    #[error("subscription gone (http {0})")]
    Gone(u16),
    #[error("push service rejected message: http {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("vapid error: {0}")]
    Vapid(String),
}

impl PushError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Rejected { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Gone(status) => Some(*status),
            Self::Rejected { status, .. } => Some(*status),
            Self::RateLimited => Some(429),
            _ => None,
        }
    }
}

/// Delivers an already serialised payload to one subscription
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Returns the push service's HTTP status on success
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        options: &DeliveryOptions,
    ) -> Result<u16, PushError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
}

impl Urgency {
    pub fn as_header_value(&self) -> &'static str {
        match self {
            Urgency::VeryLow => "very-low",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryOptions {
    pub urgency: Urgency,
}

#[derive(Debug, Error)]
pub enum PushFanoutError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user_id or user_ids is required")]
    MissingRecipients,
    #[error("title is required")]
    MissingTitle,
    #[error("json error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Body of `send-push-notification`
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct PushRequest {
    pub user_id: Option<Uuid>,
    pub user_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub title: String,
    pub body: Option<String>,
    pub url: Option<String>,
    pub tag: Option<String>,
    #[ts(type = "unknown")]
    pub data: Option<serde_json::Value>,
    pub urgency: Option<Urgency>,
}

impl PushRequest {
    /// All distinct recipients, `user_id` and `user_ids` combined
    pub fn recipients(&self) -> Vec<Uuid> {
        self.user_id
            .iter()
            .chain(self.user_ids.iter().flatten())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// What the service worker receives
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub data: Option<serde_json::Value>,
}

impl From<&PushRequest> for PushPayload {
    fn from(request: &PushRequest) -> Self {
        Self {
            title: request.title.clone(),
            body: request.body.clone().unwrap_or_default(),
            url: request.url.clone().unwrap_or_else(|| "/".to_string()),
            tag: request.tag.clone(),
            data: request.data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct PushResult {
    pub subscription_id: Uuid,
    pub endpoint: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    /// The subscription was expired and has been deleted
    pub removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct PushReport {
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<PushResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Looks up subscriptions and delivers through a [`PushSender`]
#[derive(Clone)]
pub struct PushFanout {
    db: DBService,
    sender: Arc<dyn PushSender>,
}

impl PushFanout {
    pub fn new(db: DBService, sender: Arc<dyn PushSender>) -> Self {
        Self { db, sender }
    }

    /// Send `request` to every subscription of its recipients.
    ///
    /// Deliveries run concurrently and fail independently. Subscriptions the
    /// push service reports as gone are deleted.
    pub async fn send(&self, request: &PushRequest) -> Result<PushReport, PushFanoutError> {
        let recipients = request.recipients();
        if recipients.is_empty() {
            return Err(PushFanoutError::MissingRecipients);
        }
        if request.title.trim().is_empty() {
            return Err(PushFanoutError::MissingTitle);
        }

        let subscriptions = PushSubscription::find_by_user_ids(&self.db.pool, &recipients).await?;
        if subscriptions.is_empty() {
            debug!(recipients = recipients.len(), "Push: no subscriptions found");
            return Ok(PushReport {
                message: Some("No subscriptions found".to_string()),
                ..Default::default()
            });
        }

        let payload = serde_json::to_vec(&PushPayload::from(request))?;
        let options = DeliveryOptions {
            urgency: request.urgency.clone().unwrap_or_default(),
        };

        let deliveries = subscriptions
            .iter()
            .map(|subscription| self.deliver(subscription, &payload, &options));
        let results = join_all(deliveries).await;

        let sent = results.iter().filter(|r| r.success).count();
        let report = PushReport {
            sent,
            failed: results.len() - sent,
            results,
            message: None,
        };

        info!(
            recipients = recipients.len(),
            sent = report.sent,
            failed = report.failed,
            "Push: fan-out complete"
        );

        Ok(report)
    }

    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        options: &DeliveryOptions,
    ) -> PushResult {
        match self.sender.send(subscription, payload, options).await {
            Ok(status) => {
                if let Err(e) = PushSubscription::touch(&self.db.pool, subscription.id).await {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Push: failed to update last_used_at"
                    );
                }
                PushResult {
                    subscription_id: subscription.id,
                    endpoint: subscription.endpoint.clone(),
                    success: true,
                    status_code: Some(status),
                    error: None,
                    removed: false,
                }
            }
            Err(e) => {
                let removed = matches!(e, PushError::Gone(_)) && self.remove(subscription).await;
                warn!(
                    subscription_id = %subscription.id,
                    user_id = %subscription.user_id,
                    error = %e,
                    removed,
                    "Push: delivery failed"
                );
                PushResult {
                    subscription_id: subscription.id,
                    endpoint: subscription.endpoint.clone(),
                    success: false,
                    status_code: e.status_code(),
                    error: Some(e.to_string()),
                    removed,
                }
            }
        }
    }

    async fn remove(&self, subscription: &PushSubscription) -> bool {
        match PushSubscription::delete(&self.db.pool, subscription.id).await {
            Ok(rows) => {
                info!(
                    subscription_id = %subscription.id,
                    "Push: removed expired subscription"
                );
                rows > 0
            }
            Err(e) => {
                warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Push: failed to remove expired subscription"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use db::models::push_subscription::{CreatePushSubscription, PushSubscriptionKeys};

    use super::*;

    /// Answers with a fixed status per endpoint and records accepted payloads
    #[derive(Debug, Default)]
    pub struct RecordingSender {
        statuses: HashMap<String, u16>,
        delivered: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingSender {
        /// Endpoints not listed answer 201 Created
        pub fn with_statuses(statuses: impl IntoIterator<Item = (String, u16)>) -> Self {
            Self {
                statuses: statuses.into_iter().collect(),
                delivered: Default::default(),
            }
        }

        /// Endpoints and payloads that were accepted
        pub fn delivered(&self) -> Vec<(String, Vec<u8>)> {
            self.delivered
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send(
            &self,
            subscription: &PushSubscription,
            payload: &[u8],
            _options: &DeliveryOptions,
        ) -> Result<u16, PushError> {
            let status = self
                .statuses
                .get(&subscription.endpoint)
                .copied()
                .unwrap_or(201);
            match status {
                200..=299 => {
                    self.delivered
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .push((subscription.endpoint.clone(), payload.to_vec()));
                    Ok(status)
                }
                404 | 410 => Err(PushError::Gone(status)),
                429 => Err(PushError::RateLimited),
                _ => Err(PushError::Rejected {
                    status,
                    body: String::new(),
                }),
            }
        }
    }

    async fn subscribe(db: &DBService, user_id: Uuid, endpoint: &str) -> PushSubscription {
        PushSubscription::upsert(
            &db.pool,
            &CreatePushSubscription {
                user_id,
                endpoint: endpoint.to_string(),
                keys: PushSubscriptionKeys {
                    p256dh: "key".to_string(),
                    auth: "auth".to_string(),
                },
                user_agent: None,
            },
        )
        .await
        .unwrap()
    }

    fn request(user_ids: Vec<Uuid>) -> PushRequest {
        PushRequest {
            user_ids: Some(user_ids),
            title: "Task due".to_string(),
            body: Some("Pay rent".to_string()),
            tag: Some("task-due".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_gone_subscription_is_removed_and_others_delivered() {
        let db = DBService::new_in_memory().await.unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        subscribe(&db, alice, "https://push.example.com/alice-laptop").await;
        let stale = subscribe(&db, alice, "https://push.example.com/alice-phone").await;
        subscribe(&db, bob, "https://push.example.com/bob").await;

        let sender = Arc::new(RecordingSender::with_statuses([(
            stale.endpoint.clone(),
            410,
        )]));
        let fanout = PushFanout::new(db.clone(), sender.clone());

        let report = fanout.send(&request(vec![alice, bob])).await.unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);
        let gone = report
            .results
            .iter()
            .find(|r| r.subscription_id == stale.id)
            .unwrap();
        assert!(gone.removed);
        assert_eq!(gone.status_code, Some(410));

        let remaining = PushSubscription::find_by_user_ids(&db.pool, &[alice, bob])
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|s| s.id != stale.id));

        let delivered = sender.delivered();
        assert_eq!(delivered.len(), 2);
        let payload: serde_json::Value = serde_json::from_slice(&delivered[0].1).unwrap();
        assert_eq!(payload["title"], "Task due");
        assert_eq!(payload["body"], "Pay rent");
        assert_eq!(payload["url"], "/");
        assert_eq!(payload["tag"], "task-due");
    }

    #[tokio::test]
    async fn test_other_failures_keep_subscription() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = Uuid::new_v4();
        let flaky = subscribe(&db, user, "https://push.example.com/flaky").await;
        let sender = Arc::new(RecordingSender::with_statuses([(flaky.endpoint.clone(), 500)]));

        let report = PushFanout::new(db.clone(), sender)
            .send(&request(vec![user]))
            .await
            .unwrap();

        assert_eq!((report.sent, report.failed), (0, 1));
        assert!(!report.results[0].removed);
        assert_eq!(
            PushSubscription::find_by_user_ids(&db.pool, &[user])
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_successful_delivery_touches_subscription() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = Uuid::new_v4();
        subscribe(&db, user, "https://push.example.com/ok").await;

        PushFanout::new(db.clone(), Arc::new(RecordingSender::default()))
            .send(&request(vec![user]))
            .await
            .unwrap();

        let stored = PushSubscription::find_by_user_ids(&db.pool, &[user])
            .await
            .unwrap();
        assert!(stored[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_no_subscriptions() {
        let db = DBService::new_in_memory().await.unwrap();
        let report = PushFanout::new(db, Arc::new(RecordingSender::default()))
            .send(&request(vec![Uuid::new_v4()]))
            .await
            .unwrap();

        assert_eq!((report.sent, report.failed), (0, 0));
        assert!(report.results.is_empty());
        assert!(report.message.is_some());
    }

    #[tokio::test]
    async fn test_validation() {
        let db = DBService::new_in_memory().await.unwrap();
        let fanout = PushFanout::new(db, Arc::new(RecordingSender::default()));

        let no_recipients = fanout.send(&request(vec![])).await;
        let no_title = fanout
            .send(&PushRequest {
                title: "  ".to_string(),
                ..request(vec![Uuid::new_v4()])
            })
            .await;

        assert!(matches!(no_recipients, Err(PushFanoutError::MissingRecipients)));
        assert!(matches!(no_title, Err(PushFanoutError::MissingTitle)));
    }

    #[test]
    fn test_recipients_merge_and_dedupe() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let req = PushRequest {
            user_id: Some(a),
            user_ids: Some(vec![b, a, b]),
            ..Default::default()
        };
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(req.recipients(), expected);
    }
}
