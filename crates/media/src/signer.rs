use std::time::Duration;

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
    tracing::warn,
};

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// What `verify` does with a token whose max age has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// Reject expired tokens.
    #[default]
    Strict,
    /// Log a warning and serve anyway. Deployment-level override for
    /// consumers that cache links longer than the TTL.
    ServeExpired,
}

/// Claims carried inside a signed media token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaClaims {
    /// Path relative to the media root.
    pub path: String,
    /// Source entity the message was fetched from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Message id the attachment belongs to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    /// Issuance time, unix seconds.
    pub iat: i64,
}

/// Issues and verifies time-bound signed tokens for media paths.
///
/// Token format: `base64url(claims JSON) "." base64url(HMAC-SHA256 tag)`.
/// Purely computational; no network or disk access.
#[derive(Clone)]
pub struct MediaLinkSigner {
    mac: HmacSha256,
    policy: ExpiryPolicy,
}

impl MediaLinkSigner {
    /// HMAC accepts keys of any length, so this only fails on a zero-length
    /// secret, which is refused up front.
    pub fn new(secret: &[u8], policy: ExpiryPolicy) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::invalid("empty signing secret"));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| Error::invalid("unusable signing secret"))?;
        Ok(Self { mac, policy })
    }

    #[must_use]
    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Issue a token for `relative_path` with optional re-download context.
    pub fn issue(
        &self,
        relative_path: &str,
        entity: Option<&str>,
        message_id: Option<i64>,
    ) -> Result<String> {
        self.issue_at(relative_path, entity, message_id, chrono::Utc::now().timestamp())
    }

    fn issue_at(
        &self,
        relative_path: &str,
        entity: Option<&str>,
        message_id: Option<i64>,
        iat: i64,
    ) -> Result<String> {
        let claims = MediaClaims {
            path: relative_path.to_string(),
            entity: entity.map(str::to_string),
            message_id,
            iat,
        };
        let payload = serde_json::to_vec(&claims).map_err(|e| Error::invalid(e.to_string()))?;
        let tag = self.tag(&payload);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// Verify a token against `max_age`. Tamper and decode failures are
    /// `Invalid`; an elapsed max age is `Expired` under [`ExpiryPolicy::Strict`]
    /// and a logged warning under [`ExpiryPolicy::ServeExpired`].
    pub fn verify(&self, token: &str, max_age: Duration) -> Result<MediaClaims> {
        let (payload_b64, tag_b64) = token
            .split_once('.')
            .ok_or_else(|| Error::invalid("missing signature separator"))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| Error::invalid("undecodable payload"))?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| Error::invalid("undecodable signature"))?;

        // Constant-time comparison via the Mac verifier.
        let mut mac = self.mac.clone();
        mac.update(&payload);
        mac.verify_slice(&tag)
            .map_err(|_| Error::invalid("signature mismatch"))?;

        let claims: MediaClaims =
            serde_json::from_slice(&payload).map_err(|_| Error::invalid("malformed claims"))?;
        if claims.path.is_empty() {
            return Err(Error::invalid("missing path claim"));
        }

        let age_secs = chrono::Utc::now().timestamp() - claims.iat;
        if age_secs > 0 && Duration::from_secs(age_secs.unsigned_abs()) > max_age {
            let age = Duration::from_secs(age_secs.unsigned_abs());
            match self.policy {
                ExpiryPolicy::Strict => return Err(Error::Expired { age }),
                ExpiryPolicy::ServeExpired => {
                    warn!(path = %claims.path, ?age, "signed media link expired, serving anyway");
                }
            }
        }

        Ok(claims)
    }

    fn tag(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}
