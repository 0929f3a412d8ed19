//! Captcha token table and human-verification providers
//!
//! The core only consumes a `validate_token` capability: whichever
//! provider verified the human (local slider or Cloudflare Turnstile,
//! selected by the `captcha_type` config knob) deposits a short-lived
//! token here, and login redeems it exactly once. A background sweeper
//! ages out unredeemed tokens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Sweep cadence for expired tokens
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cloudflare Turnstile verification endpoint
const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Process-wide table of validated captcha tokens
pub struct CaptchaStore {
    tokens: DashMap<String, i64>,
    ttl_millis: i64,
}

impl CaptchaStore {
    #[must_use]
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl_millis: ttl_secs * 1000,
        }
    }

    /// Mint a fresh validated token
    pub fn issue(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let expires = chrono::Utc::now().timestamp_millis() + self.ttl_millis;
        self.tokens.insert(token.clone(), expires);
        token
    }

    /// Redeem a token. Single-use: a second redemption fails.
    pub fn validate(&self, token: &str) -> bool {
        match self.tokens.remove(token) {
            Some((_, expires)) => expires > chrono::Utc::now().timestamp_millis(),
            None => false,
        }
    }

    /// Drop every token past its expiry
    pub fn sweep(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        self.tokens.retain(|_, expires| *expires > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Spawn the background sweeper for this store
    pub fn start_sweeper(store: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                store.sweep();
            }
        });
    }
}

/// A human-verification provider.
///
/// The rest of the system only consumes this judgement plus the token
/// table above; which provider runs is selected by the `captcha_type`
/// config knob.
#[async_trait]
pub trait HumanVerifier: Send + Sync {
    /// Whether the provider accepts the upstream response token
    async fn verify(&self, response_token: &str) -> Result<bool>;
}

/// Cloudflare Turnstile provider
pub struct TurnstileVerifier {
    http: reqwest::Client,
    secret_key: String,
}

impl TurnstileVerifier {
    #[must_use]
    pub fn new(http: reqwest::Client, secret_key: String) -> Self {
        Self { http, secret_key }
    }
}

#[derive(Debug, Deserialize)]
struct TurnstileVerdict {
    success: bool,
}

#[async_trait]
impl HumanVerifier for TurnstileVerifier {
    async fn verify(&self, response_token: &str) -> Result<bool> {
        let verdict: TurnstileVerdict = self
            .http
            .post(TURNSTILE_VERIFY_URL)
            .form(&[
                ("secret", self.secret_key.as_str()),
                ("response", response_token),
            ])
            .send()
            .await
            .map_err(|e| Error::Internal(format!("turnstile request: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Internal(format!("turnstile response: {e}")))?;

        Ok(verdict.success)
    }
}

/// Run a provider's judgement and mint a panel token on success
pub async fn redeem_verification(
    verifier: &dyn HumanVerifier,
    store: &CaptchaStore,
    response_token: &str,
) -> Result<Option<String>> {
    if verifier.verify(response_token).await? {
        Ok(Some(store.issue()))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate() {
        let store = CaptchaStore::new(120);
        let token = store.issue();
        assert!(store.validate(&token));
    }

    #[test]
    fn test_single_use() {
        let store = CaptchaStore::new(120);
        let token = store.issue();
        assert!(store.validate(&token));
        assert!(!store.validate(&token));
    }

    #[test]
    fn test_unknown_token_rejected() {
        let store = CaptchaStore::new(120);
        assert!(!store.validate("nope"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let store = CaptchaStore::new(-1);
        let token = store.issue();
        assert!(!store.validate(&token));
    }

    #[test]
    fn test_sweep_removes_expired() {
        let store = CaptchaStore::new(-1);
        store.issue();
        store.issue();
        assert_eq!(store.len(), 2);
        store.sweep();
        assert!(store.is_empty());
    }
}
