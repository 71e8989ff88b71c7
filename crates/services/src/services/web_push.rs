//! Web Push delivery: `aes128gcm` payload encryption (RFC 8291) and VAPID
//! authentication (RFC 8292) over `reqwest`.

use std::{
    collections::HashMap,
    path::Path,
    sync::Mutex,
    time::{Duration, Instant},
};

use aes_gcm::{
    Aes128Gcm, KeyInit, Nonce,
    aead::Aead,
};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use db::models::push_subscription::PushSubscription;
use hkdf::Hkdf;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p256::{
    PublicKey, SecretKey,
    ecdh::EphemeralSecret,
    elliptic_curve::sec1::ToEncodedPoint,
    pkcs8::DecodePrivateKey,
};
use rand::{RngCore, rngs::OsRng};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::push::{DeliveryOptions, PushError, PushSender};

/// Record size advertised in the content coding header; one record per message
const RECORD_SIZE: u32 = 4096;
/// Push services accept 4096 bytes of body: 86 bytes of header, 16 of tag, 1 delimiter
pub const MAX_PLAINTEXT_LEN: usize = 3993;
const AUTH_SECRET_LEN: usize = 16;
/// VAPID tokens may live up to 24h; refresh well before the 12h expiry we sign
const VAPID_TOKEN_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);
const VAPID_TOKEN_REFRESH: Duration = Duration::from_secs(11 * 60 * 60);

#[derive(Debug, Serialize)]
struct VapidClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

struct CachedToken {
    token: String,
    created_at: Instant,
}

/// Application server identity used to sign VAPID tokens
pub struct VapidKeys {
    encoding_key: EncodingKey,
    /// base64url uncompressed P-256 point, what browsers pass as `applicationServerKey`
    public_key: String,
    subject: String,
}

impl std::fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidKeys")
            .field("public_key", &self.public_key)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl VapidKeys {
    /// Parse a PKCS#8 PEM P-256 private key; the public key is derived from it
    pub fn from_pem(pem: &str, subject: impl Into<String>) -> Result<Self, PushError> {
        let secret = SecretKey::from_pkcs8_pem(pem)
            .map_err(|e| PushError::Vapid(format!("invalid private key: {e}")))?;
        let encoding_key = EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| PushError::Vapid(format!("invalid private key: {e}")))?;
        let public_key =
            URL_SAFE_NO_PAD.encode(secret.public_key().to_encoded_point(false).as_bytes());

        Ok(Self {
            encoding_key,
            public_key,
            subject: subject.into(),
        })
    }

    pub fn from_pem_file(path: &Path, subject: impl Into<String>) -> Result<Self, PushError> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            PushError::Vapid(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_pem(&pem, subject)
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

/// [`PushSender`] speaking the Web Push protocol
pub struct WebPushSender {
    vapid: VapidKeys,
    client: Client,
    ttl: Duration,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl WebPushSender {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(vapid: VapidKeys, ttl: Duration) -> Result<Self, PushError> {
        let client = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("tazk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PushError::Transport(e.to_string()))?;

        info!(
            public_key = %vapid.public_key,
            subject = %vapid.subject,
            ttl_secs = ttl.as_secs(),
            "Web push sender initialized"
        );

        Ok(Self {
            vapid,
            client,
            ttl,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    pub fn public_key(&self) -> &str {
        self.vapid.public_key()
    }

    async fn send_once(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        options: &DeliveryOptions,
    ) -> Result<u16, PushError> {
        let ua_public = decode_base64url(&subscription.p256dh)
            .map_err(|_| PushError::InvalidSubscription("p256dh is not base64url".to_string()))?;
        let auth_secret = decode_base64url(&subscription.auth)
            .map_err(|_| PushError::InvalidSubscription("auth is not base64url".to_string()))?;
        let body = encrypt_payload(&ua_public, &auth_secret, payload)?;

        let audience = endpoint_origin(&subscription.endpoint)?;
        let jwt = self.vapid_token(&audience)?;

        let res = self
            .client
            .post(&subscription.endpoint)
            .header(
                "authorization",
                format!("vapid t={jwt}, k={}", self.vapid.public_key),
            )
            .header("ttl", self.ttl.as_secs().to_string())
            .header("urgency", options.urgency.as_header_value())
            .header("content-encoding", "aes128gcm")
            .header("content-type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = res.status();
        match status {
            s if s.is_success() => {
                debug!(
                    subscription_id = %subscription.id,
                    status = s.as_u16(),
                    "Web push accepted"
                );
                Ok(s.as_u16())
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(PushError::Gone(status.as_u16())),
            StatusCode::TOO_MANY_REQUESTS => Err(PushError::RateLimited),
            s => {
                let body = res.text().await.unwrap_or_default();
                Err(PushError::Rejected {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }

    /// Get a cached VAPID JWT for `audience` or sign a new one
    fn vapid_token(&self, audience: &str) -> Result<String, PushError> {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(cached) = tokens.get(audience) {
            if cached.created_at.elapsed() < VAPID_TOKEN_REFRESH {
                return Ok(cached.token.clone());
            }
        }

        let exp = Utc::now().timestamp() + VAPID_TOKEN_LIFETIME.as_secs() as i64;
        let claims = VapidClaims {
            aud: audience,
            exp,
            sub: &self.vapid.subject,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::ES256),
            &claims,
            &self.vapid.encoding_key,
        )
        .map_err(|e| PushError::Vapid(e.to_string()))?;

        tokens.insert(
            audience.to_string(),
            CachedToken {
                token: token.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(token)
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        options: &DeliveryOptions,
    ) -> Result<u16, PushError> {
        (|| async { self.send_once(subscription, payload, options).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(5))
                    .with_max_times(2)
                    .with_jitter(),
            )
            .when(|e: &PushError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Web push to {} failed, retrying after {:.2}s: {}",
                    subscription.id,
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> PushError {
    if e.is_timeout() {
        PushError::Timeout
    } else {
        PushError::Transport(e.to_string())
    }
}

/// Browsers hand out unpadded base64url, some libraries pad it
fn decode_base64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value.trim().trim_end_matches('='))
}

/// The VAPID `aud` claim: scheme, host and port of the push endpoint
fn endpoint_origin(endpoint: &str) -> Result<String, PushError> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| PushError::InvalidSubscription(format!("invalid endpoint: {e}")))?;
    match url.scheme() {
        "https" | "http" => Ok(url.origin().ascii_serialization()),
        scheme => Err(PushError::InvalidSubscription(format!(
            "unsupported endpoint scheme '{scheme}'"
        ))),
    }
}

/// Encrypt `plaintext` for a user agent as a single `aes128gcm` record
pub fn encrypt_payload(
    ua_public: &[u8],
    auth_secret: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, PushError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(PushError::PayloadTooLarge(plaintext.len()));
    }
    if auth_secret.len() != AUTH_SECRET_LEN {
        return Err(PushError::InvalidSubscription(format!(
            "auth secret must be {AUTH_SECRET_LEN} bytes, got {}",
            auth_secret.len()
        )));
    }
    let ua_key = PublicKey::from_sec1_bytes(ua_public)
        .map_err(|_| PushError::InvalidSubscription("p256dh is not a P-256 point".to_string()))?;

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let as_public = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(&ua_key);

    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);

    let (cek, nonce) = derive_content_keys(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        ua_key.to_encoded_point(false).as_bytes(),
        as_public.as_bytes(),
        &salt,
    )?;

    // Padding delimiter 0x02 marks the last (and only) record
    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(0x02);

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|e| PushError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|e| PushError::Encryption(e.to_string()))?;

    let key_id = as_public.as_bytes();
    let mut body = Vec::with_capacity(salt.len() + 5 + key_id.len() + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(key_id.len() as u8);
    body.extend_from_slice(key_id);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

/// Content encryption key and nonce shared by sender and user agent
fn derive_content_keys(
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8],
) -> Result<([u8; 16], [u8; 12]), PushError> {
    let mut key_info = Vec::with_capacity(14 + ua_public.len() + as_public.len());
    key_info.extend_from_slice(b"WebPush: info\0");
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), ecdh_secret)
        .expand(&key_info, &mut ikm)
        .map_err(|e| PushError::Encryption(e.to_string()))?;

    let prk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; 16];
    prk.expand(b"Content-Encoding: aes128gcm\0", &mut cek)
        .map_err(|e| PushError::Encryption(e.to_string()))?;
    let mut nonce = [0u8; 12];
    prk.expand(b"Content-Encoding: nonce\0", &mut nonce)
        .map_err(|e| PushError::Encryption(e.to_string()))?;

    Ok((cek, nonce))
}

#[cfg(test)]
mod tests {
    use p256::ecdh::diffie_hellman;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;
    use crate::services::push::Urgency;

    // Same format as `openssl genpkey -algorithm EC -pkeyopt ec_paramgen_curve:P-256`
    fn test_vapid_pem() -> String {
        use p256::pkcs8::{EncodePrivateKey, LineEnding};
        SecretKey::random(&mut OsRng)
            .to_pkcs8_pem(LineEnding::LF)
            .unwrap()
            .to_string()
    }

    /// User agent side of RFC 8291
    fn decrypt(ua_secret: &SecretKey, auth_secret: &[u8], body: &[u8]) -> Vec<u8> {
        let salt = &body[..16];
        let record_size = u32::from_be_bytes(body[16..20].try_into().unwrap());
        assert_eq!(record_size, RECORD_SIZE);
        let id_len = body[20] as usize;
        let as_public = &body[21..21 + id_len];
        let ciphertext = &body[21 + id_len..];

        let as_key = PublicKey::from_sec1_bytes(as_public).unwrap();
        let shared = diffie_hellman(ua_secret.to_nonzero_scalar(), as_key.as_affine());
        let ua_public = ua_secret.public_key().to_encoded_point(false);
        let (cek, nonce) = derive_content_keys(
            shared.raw_secret_bytes().as_slice(),
            auth_secret,
            ua_public.as_bytes(),
            as_public,
            salt,
        )
        .unwrap();

        Aes128Gcm::new_from_slice(&cek)
            .unwrap()
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .unwrap()
    }

    #[test]
    fn test_user_agent_can_decrypt_payload() {
        let ua_secret = SecretKey::random(&mut OsRng);
        let ua_public = ua_secret.public_key().to_encoded_point(false);
        let auth_secret = [7u8; 16];
        let message = br#"{"title":"Task due","url":"/"}"#;

        let body = encrypt_payload(ua_public.as_bytes(), &auth_secret, message).unwrap();

        assert_eq!(body[20], 65);
        let record = decrypt(&ua_secret, &auth_secret, &body);
        assert_eq!(record.last(), Some(&0x02));
        assert_eq!(&record[..record.len() - 1], message);
    }

    #[test]
    fn test_each_message_uses_fresh_salt_and_key() {
        let ua_public = SecretKey::random(&mut OsRng)
            .public_key()
            .to_encoded_point(false);
        let a = encrypt_payload(ua_public.as_bytes(), &[1u8; 16], b"same").unwrap();
        let b = encrypt_payload(ua_public.as_bytes(), &[1u8; 16], b"same").unwrap();
        assert_ne!(a[..16], b[..16]);
        assert_ne!(a[21..86], b[21..86]);
    }

    #[test]
    fn test_rejects_oversized_payload_and_bad_keys() {
        let ua_public = SecretKey::random(&mut OsRng)
            .public_key()
            .to_encoded_point(false);
        let too_big = vec![b'x'; MAX_PLAINTEXT_LEN + 1];

        assert!(matches!(
            encrypt_payload(ua_public.as_bytes(), &[0u8; 16], &too_big),
            Err(PushError::PayloadTooLarge(_))
        ));
        assert!(matches!(
            encrypt_payload(ua_public.as_bytes(), &[0u8; 8], b"hi"),
            Err(PushError::InvalidSubscription(_))
        ));
        assert!(matches!(
            encrypt_payload(&[4u8; 65], &[0u8; 16], b"hi"),
            Err(PushError::InvalidSubscription(_))
        ));
    }

    #[test]
    fn test_endpoint_origin() {
        assert_eq!(
            endpoint_origin("https://fcm.googleapis.com/fcm/send/abc:def").unwrap(),
            "https://fcm.googleapis.com"
        );
        assert_eq!(
            endpoint_origin("https://push.example.com:8443/wpush/v2/xyz").unwrap(),
            "https://push.example.com:8443"
        );
        assert!(endpoint_origin("mailto:someone@example.com").is_err());
        assert!(endpoint_origin("not a url").is_err());
    }

    #[test]
    fn test_decode_base64url_accepts_padding() {
        assert_eq!(decode_base64url("AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(decode_base64url("AQI=").unwrap(), vec![1, 2]);
        assert_eq!(decode_base64url("-_8").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn test_vapid_keys_derive_public_key() {
        let keys = VapidKeys::from_pem(&test_vapid_pem(), "mailto:ops@tazk.app").unwrap();
        let raw = decode_base64url(keys.public_key()).unwrap();
        assert_eq!(raw.len(), 65);
        assert_eq!(raw[0], 0x04);
        assert!(VapidKeys::from_pem("not a key", "mailto:ops@tazk.app").is_err());
    }

    #[test]
    fn test_vapid_token_is_cached_per_audience() {
        let keys = VapidKeys::from_pem(&test_vapid_pem(), "mailto:ops@tazk.app").unwrap();
        let sender = WebPushSender::new(keys, Duration::from_secs(60)).unwrap();

        let first = sender.vapid_token("https://push.example.com").unwrap();
        let again = sender.vapid_token("https://push.example.com").unwrap();
        let other = sender.vapid_token("https://fcm.googleapis.com").unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(first.split('.').count(), 3);
    }

    struct UserAgent {
        secret: SecretKey,
        auth_secret: [u8; 16],
    }

    impl UserAgent {
        fn new() -> Self {
            Self {
                secret: SecretKey::random(&mut OsRng),
                auth_secret: [9u8; 16],
            }
        }

        fn subscription(&self, endpoint: String) -> PushSubscription {
            PushSubscription {
                id: uuid::Uuid::new_v4(),
                user_id: uuid::Uuid::new_v4(),
                endpoint,
                p256dh: URL_SAFE_NO_PAD
                    .encode(self.secret.public_key().to_encoded_point(false).as_bytes()),
                auth: URL_SAFE_NO_PAD.encode(self.auth_secret),
                user_agent: None,
                created_at: Utc::now(),
                last_used_at: None,
            }
        }
    }

    fn test_sender() -> WebPushSender {
        let keys = VapidKeys::from_pem(&test_vapid_pem(), "mailto:ops@tazk.app").unwrap();
        WebPushSender::new(keys, Duration::from_secs(60)).unwrap()
    }

    async fn push_service_returning(status: u16, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wpush/v2/device"))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_send_carries_protocol_headers_and_decryptable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wpush/v2/device"))
            .and(header("content-encoding", "aes128gcm"))
            .and(header("content-type", "application/octet-stream"))
            .and(header("ttl", "60"))
            .and(header("urgency", "high"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let sender = test_sender();
        let ua = UserAgent::new();
        let subscription = ua.subscription(format!("{}/wpush/v2/device", server.uri()));
        let options = DeliveryOptions {
            urgency: Urgency::High,
        };

        let status = sender
            .send(&subscription, br#"{"title":"Standup"}"#, &options)
            .await
            .unwrap();
        assert_eq!(status, 201);

        let requests = server.received_requests().await.unwrap();
        let authorization = requests[0].headers["authorization"].to_str().unwrap();
        let jwt = sender.vapid_token(&server.uri()).unwrap();
        assert_eq!(
            authorization,
            format!("vapid t={jwt}, k={}", sender.public_key())
        );

        let record = decrypt(&ua.secret, &ua.auth_secret, &requests[0].body);
        assert_eq!(&record[..record.len() - 1], br#"{"title":"Standup"}"#);
    }

    #[tokio::test]
    async fn test_gone_statuses_are_not_retried() {
        let sender = test_sender();
        let ua = UserAgent::new();

        for status in [404, 410] {
            let server = push_service_returning(status, 1).await;
            let subscription = ua.subscription(format!("{}/wpush/v2/device", server.uri()));

            let result = sender
                .send(&subscription, b"hi", &DeliveryOptions::default())
                .await;

            assert!(matches!(result, Err(PushError::Gone(s)) if s == status));
            server.verify().await;
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried_twice() {
        let server = push_service_returning(503, 3).await;
        let subscription =
            UserAgent::new().subscription(format!("{}/wpush/v2/device", server.uri()));

        let result = test_sender()
            .send(&subscription, b"hi", &DeliveryOptions::default())
            .await;

        assert!(matches!(result, Err(PushError::Rejected { status: 503, .. })));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_twice() {
        let server = push_service_returning(429, 3).await;
        let subscription =
            UserAgent::new().subscription(format!("{}/wpush/v2/device", server.uri()));

        let result = test_sender()
            .send(&subscription, b"hi", &DeliveryOptions::default())
            .await;

        assert!(matches!(result, Err(PushError::RateLimited)));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_client_error_is_rejected_without_retry() {
        let server = push_service_returning(400, 1).await;
        let subscription =
            UserAgent::new().subscription(format!("{}/wpush/v2/device", server.uri()));

        let result = test_sender()
            .send(&subscription, b"hi", &DeliveryOptions::default())
            .await;

        assert!(matches!(result, Err(PushError::Rejected { status: 400, .. })));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_unreachable_push_service_is_transport_error() {
        let server = MockServer::start().await;
        let endpoint = format!("{}/wpush/v2/device", server.uri());
        drop(server);

        let result = test_sender()
            .send(
                &UserAgent::new().subscription(endpoint),
                b"hi",
                &DeliveryOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(PushError::Transport(_))));
    }
}
