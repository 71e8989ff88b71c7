use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// A browser-registered Web Push endpoint and the keys needed to encrypt for it
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct PushSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub p256dh: String, // base64url uncompressed P-256 public key of the user agent
    pub auth: String,   // base64url 16-byte authentication secret
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PushSubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Mirrors the browser's `PushSubscription.toJSON()` shape plus the owner
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreatePushSubscription {
    pub user_id: Uuid,
    pub endpoint: String,
    pub keys: PushSubscriptionKeys,
    pub user_agent: Option<String>,
}

const PUSH_SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, endpoint, p256dh, auth, user_agent, created_at, last_used_at";

impl PushSubscription {
    /// Insert a subscription, or re-bind an already known endpoint to the
    /// given user and keys.
    pub async fn upsert(
        pool: &SqlitePool,
        data: &CreatePushSubscription,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, PushSubscription>(&format!(
            r#"INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth, user_agent, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT(endpoint) DO UPDATE SET
                   user_id = excluded.user_id,
                   p256dh = excluded.p256dh,
                   auth = excluded.auth,
                   user_agent = excluded.user_agent
               RETURNING {PUSH_SUBSCRIPTION_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.user_id)
        .bind(&data.endpoint)
        .bind(&data.keys.p256dh)
        .bind(&data.keys.auth)
        .bind(&data.user_agent)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_user_ids(
        pool: &SqlitePool,
        user_ids: &[Uuid],
    ) -> Result<Vec<Self>, sqlx::Error> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {PUSH_SUBSCRIPTION_COLUMNS} FROM push_subscriptions WHERE user_id IN ("
        ));
        let mut separated = query.separated(", ");
        for user_id in user_ids {
            separated.push_bind(*user_id);
        }
        separated.push_unseparated(") ORDER BY created_at ASC");

        query.build_query_as::<PushSubscription>().fetch_all(pool).await
    }

    pub async fn touch(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE push_subscriptions SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_endpoint(
        pool: &SqlitePool,
        user_id: Uuid,
        endpoint: &str,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM push_subscriptions WHERE user_id = $1 AND endpoint = $2")
                .bind(user_id)
                .bind(endpoint)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    fn subscription(user_id: Uuid, endpoint: &str) -> CreatePushSubscription {
        CreatePushSubscription {
            user_id,
            endpoint: endpoint.to_string(),
            keys: PushSubscriptionKeys {
                p256dh: "BPk3".to_string(),
                auth: "c2VjcmV0".to_string(),
            },
            user_agent: Some("Firefox".to_string()),
        }
    }

    #[tokio::test]
    async fn test_upsert_rebinds_known_endpoint() {
        let db = DBService::new_in_memory().await.unwrap();
        let first_owner = Uuid::new_v4();
        let second_owner = Uuid::new_v4();
        let endpoint = "https://push.example.com/send/abc";

        let first = PushSubscription::upsert(&db.pool, &subscription(first_owner, endpoint))
            .await
            .unwrap();
        let second = PushSubscription::upsert(&db.pool, &subscription(second_owner, endpoint))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.user_id, second_owner);
        assert!(
            PushSubscription::find_by_user_ids(&db.pool, &[first_owner])
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_find_by_user_ids_returns_only_requested_users() {
        let db = DBService::new_in_memory().await.unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        for (user, endpoint) in [
            (alice, "https://push.example.com/a1"),
            (alice, "https://push.example.com/a2"),
            (bob, "https://push.example.com/b1"),
            (carol, "https://push.example.com/c1"),
        ] {
            PushSubscription::upsert(&db.pool, &subscription(user, endpoint))
                .await
                .unwrap();
        }

        let found = PushSubscription::find_by_user_ids(&db.pool, &[alice, bob])
            .await
            .unwrap();

        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|s| s.user_id != carol));
    }
}
