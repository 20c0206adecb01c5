use crate::error::NexusError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tokens are refreshed this long before they actually expire.
pub const EXPIRY_SAFETY_MARGIN_MS: i64 = 30_000;

/// Delegated credential persisted as an opaque JSON blob in the credential store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl TokenSet {
    /// Build from a token endpoint payload
    /// (`{access_token, refresh_token?, expires_in?, token_type?}`).
    pub fn from_payload(payload: &Value, now_ms: i64) -> Result<Self, NexusError> {
        let access_token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NexusError::Oauth2Token("token response missing access_token".into()))?
            .to_string();
        let refresh_token = payload
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string);
        let expires_in_secs = payload.get("expires_in").and_then(Value::as_i64).unwrap_or(0);
        let token_type = payload
            .get("token_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            access_token,
            refresh_token,
            expires_at: Some(now_ms + expires_in_secs * 1000),
            token_type,
        })
    }

    /// Missing expiry counts as expired.
    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms >= expires_at - EXPIRY_SAFETY_MARGIN_MS,
            None => true,
        }
    }

    /// Fold a refresh response into the current set. The token endpoint
    /// usually omits the refresh token on refresh, so the old one is kept.
    pub fn merge_refreshed(&self, refreshed: TokenSet) -> TokenSet {
        TokenSet {
            refresh_token: refreshed.refresh_token.or_else(|| self.refresh_token.clone()),
            token_type: refreshed.token_type.or_else(|| self.token_type.clone()),
            ..refreshed
        }
    }

    pub fn to_blob(&self) -> Result<String, NexusError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_blob(blob: &str) -> Result<Self, NexusError> {
        Ok(serde_json::from_str(blob)?)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
