use std::sync::Arc;

use anyhow::Context;
use db::DBService;
use services::services::{
    push::{PushFanout, PushSender},
    web_push::{VapidKeys, WebPushSender},
};
use tracing::{info, warn};

use crate::config::Config;

/// Shared state handed to every route
#[derive(Clone)]
pub struct Deployment {
    db: DBService,
    push: Option<PushService>,
    functions_token: Option<Arc<str>>,
}

#[derive(Clone)]
struct PushService {
    fanout: PushFanout,
    public_key: Arc<str>,
}

impl Deployment {
    pub fn new(db: DBService) -> Self {
        Self {
            db,
            push: None,
            functions_token: None,
        }
    }

    /// Open the database and, when a VAPID key is configured, the web push sender
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = DBService::new(&config.database_url)
            .await
            .with_context(|| format!("failed to open database {}", config.database_url))?;
        let mut deployment = Self::new(db);

        match &config.vapid_private_key_path {
            Some(path) => {
                let keys = VapidKeys::from_pem_file(path, config.vapid_subject.clone())?;
                let sender = WebPushSender::new(keys, config.push_ttl())?;
                let public_key = sender.public_key().to_string();
                deployment = deployment.with_push_sender(Arc::new(sender), public_key);
            }
            None => warn!("VAPID_PRIVATE_KEY_PATH not set, push notifications are disabled"),
        }

        if let Some(token) = config.functions_token() {
            deployment = deployment.with_functions_token(token);
        } else {
            info!("TAZK_FUNCTIONS_TOKEN not set, function endpoints are unauthenticated");
        }

        Ok(deployment)
    }

    pub fn with_push_sender(
        mut self,
        sender: Arc<dyn PushSender>,
        public_key: impl Into<Arc<str>>,
    ) -> Self {
        self.push = Some(PushService {
            fanout: PushFanout::new(self.db.clone(), sender),
            public_key: public_key.into(),
        });
        self
    }

    pub fn with_functions_token(mut self, token: impl Into<Arc<str>>) -> Self {
        self.functions_token = Some(token.into());
        self
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn push(&self) -> Option<&PushFanout> {
        self.push.as_ref().map(|p| &p.fanout)
    }

    pub fn vapid_public_key(&self) -> Option<&str> {
        self.push.as_ref().map(|p| p.public_key.as_ref())
    }

    pub fn functions_token(&self) -> Option<&str> {
        self.functions_token.as_deref()
    }
}
