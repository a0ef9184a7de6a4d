//! OAuth2 refresh-token grant: trades a long-lived refresh token for
//! short-lived bearer tokens and caches the current one until it expires.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;

use projsync_core::config::OAuthRefresh;
use projsync_core::SourceId;

use crate::error::AdapterError;
use crate::http::{decode_json, expect_status};

/// Tokens are dropped this long before the server says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Used when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub(crate) struct RefreshingToken {
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: Mutex<Option<CachedToken>>,
}

impl RefreshingToken {
    /// Resolve the three secrets once.
    pub(crate) fn from_config(config: &OAuthRefresh, source: &SourceId) -> Result<Self, AdapterError> {
        Ok(Self {
            token_url: config.token_url.clone(),
            client_id: config.client_id.resolve(source)?,
            client_secret: config.client_secret.resolve(source)?,
            refresh_token: config.refresh_token.resolve(source)?,
            cached: Mutex::new(None),
        })
    }

    /// The cached token while it is still fresh, otherwise a new one from
    /// the token endpoint.
    pub(crate) fn bearer(&self, agent: &ureq::Agent) -> Result<String, AdapterError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }
        let token = self.exchange(agent)?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Forget the cached token, e.g. after the API rejected it.
    pub(crate) fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn exchange(&self, agent: &ureq::Agent) -> Result<CachedToken, AdapterError> {
        let requested_at = Instant::now();
        let response = agent
            .post(&self.token_url)
            .set("accept", "application/json")
            .send_form(&[
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("refresh_token", &self.refresh_token),
            ])?;
        expect_status(&response, 200)?;
        let body: TokenResponse = decode_json(response)?;
        if body.access_token.is_empty() {
            return Err(AdapterError::Shape("token endpoint returned an empty access_token".into()));
        }

        let lifetime = body.expires_in.map_or(DEFAULT_LIFETIME, Duration::from_secs);
        tracing::debug!(lifetime_secs = lifetime.as_secs(), "refreshed OAuth access token");
        Ok(CachedToken {
            value: body.access_token,
            expires_at: requested_at + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}
