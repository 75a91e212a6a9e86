//! Room access tokens for the media server.
//!
//! Tokens are HS256 JWTs carrying a `video` grant scoped to one room.
//! Publishers get admin and publish rights; viewers may only subscribe.

use crate::audit::AuditSink;
use crate::config::LiveKitConfig;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub trait TokenIssuer: Send + Sync {
    /// Returns `None` when credentials are missing or signing fails.
    fn issue(&self, room: &str, identity: &str, is_publisher: bool) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub room_admin: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

impl AccessClaims {
    pub fn new(api_key: &str, room: &str, identity: &str, is_publisher: bool, ttl_seconds: u64) -> Self {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX / 2);
        Self {
            iss: api_key.to_string(),
            sub: identity.to_string(),
            name: identity.to_string(),
            nbf: now,
            exp: now.saturating_add(ttl),
            video: VideoGrant {
                room: room.to_string(),
                room_join: true,
                room_admin: is_publisher,
                can_publish: is_publisher,
                can_subscribe: true,
            },
        }
    }
}

struct Credentials {
    api_key: String,
    api_secret: String,
}

pub struct JwtTokenIssuer {
    credentials: Option<Credentials>,
    ttl_seconds: u64,
    audit: Arc<dyn AuditSink>,
}

impl JwtTokenIssuer {
    pub fn new(config: &LiveKitConfig, audit: Arc<dyn AuditSink>) -> Self {
        let credentials = match (&config.api_key, &config.api_secret) {
            (Some(api_key), Some(api_secret)) if !api_key.is_empty() && !api_secret.is_empty() => {
                Some(Credentials {
                    api_key: api_key.clone(),
                    api_secret: api_secret.clone(),
                })
            }
            _ => {
                warn!("LiveKit API key or secret missing; token issuance is unavailable");
                None
            }
        };

        Self {
            credentials,
            ttl_seconds: config.token_ttl_seconds,
            audit,
        }
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue(&self, room: &str, identity: &str, is_publisher: bool) -> Option<String> {
        let credentials = self.credentials.as_ref()?;

        let claims = AccessClaims::new(
            &credentials.api_key,
            room,
            identity,
            is_publisher,
            self.ttl_seconds,
        );
        let encoding_key = EncodingKey::from_secret(credentials.api_secret.as_bytes());

        match encode(&Header::new(Algorithm::HS256), &claims, &encoding_key) {
            Ok(token) => {
                debug!(room = %room, identity = %identity, "Issued room token");
                self.audit.log_token_event("issued", room, identity, is_publisher);
                Some(token)
            }
            Err(err) => {
                warn!(room = %room, identity = %identity, "Failed to sign room token: {}", err);
                self.audit.log_token_event("failed", room, identity, is_publisher);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    fn livekit(key: Option<&str>, secret: Option<&str>) -> LiveKitConfig {
        LiveKitConfig {
            api_key: key.map(str::to_string),
            api_secret: secret.map(str::to_string),
            ..LiveKitConfig::default()
        }
    }

    fn decode_claims(token: &str, secret: &str) -> AccessClaims {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        decode::<AccessClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .unwrap()
            .claims
    }

    #[test]
    fn test_viewer_token_grants_subscribe_only() {
        let audit = Arc::new(MemoryAuditSink::new());
        let issuer = JwtTokenIssuer::new(&livekit(Some("key"), Some("secret")), audit.clone());

        let token = issuer.issue("lobby", "viewer-1", false).unwrap();
        let claims = decode_claims(&token, "secret");

        assert_eq!(claims.iss, "key");
        assert_eq!(claims.sub, "viewer-1");
        assert_eq!(claims.video.room, "lobby");
        assert!(claims.video.room_join);
        assert!(claims.video.can_subscribe);
        assert!(!claims.video.can_publish);
        assert!(!claims.video.room_admin);
        assert!(claims.exp > claims.nbf);
        assert_eq!(audit.events(), vec!["token.issued".to_string()]);
    }

    #[test]
    fn test_publisher_token_grants_publish_and_admin() {
        let issuer = JwtTokenIssuer::new(
            &livekit(Some("key"), Some("secret")),
            Arc::new(MemoryAuditSink::new()),
        );
        let token = issuer.issue("stage", "host", true).unwrap();
        let claims = decode_claims(&token, "secret");
        assert!(claims.video.can_publish);
        assert!(claims.video.room_admin);
    }

    #[test]
    fn test_grant_serializes_camel_case() {
        let claims = AccessClaims::new("key", "r", "u", false, 60);
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["video"]["roomJoin"], true);
        assert_eq!(value["video"]["canSubscribe"], true);
    }

    #[test]
    fn test_missing_credentials_yield_none() {
        let issuer = JwtTokenIssuer::new(&livekit(Some("key"), None), Arc::new(MemoryAuditSink::new()));
        assert!(issuer.issue("lobby", "viewer", false).is_none());

        let issuer = JwtTokenIssuer::new(&livekit(Some(""), Some("")), Arc::new(MemoryAuditSink::new()));
        assert!(issuer.issue("lobby", "viewer", false).is_none());
    }
}
