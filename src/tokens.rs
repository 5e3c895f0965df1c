//! Capability Tokens
//!
//! Short-lived bearer tokens handed to the satellite file-sharing surface.
//! A token stays valid for repeated checks until its TTL runs out; an expired
//! token found during verification is removed on the spot.

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Random bytes per token (rendered as hex)
const TOKEN_BYTES: usize = 32;

/// Outcome of a token check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Unknown,
    Expired,
}

impl Verification {
    pub fn is_valid(self) -> bool {
        self == Verification::Valid
    }
}

/// Issues and validates capability tokens
pub struct TokenService {
    ttl_ms: i64,
    /// Maps token value to issue time in epoch milliseconds
    tokens: Mutex<HashMap<String, i64>>,
}

impl TokenService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a new token
    pub fn issue(&self) -> String {
        self.issue_at(now_ms())
    }

    /// Issue a new token stamped with `now_ms`
    pub fn issue_at(&self, now_ms: i64) -> String {
        let mut tokens = self.tokens.lock();
        loop {
            let mut bytes = [0u8; TOKEN_BYTES];
            OsRng.fill_bytes(&mut bytes);
            let token = hex::encode(bytes);
            if !tokens.contains_key(&token) {
                tokens.insert(token.clone(), now_ms);
                log::info!("Issued capability token ({} outstanding)", tokens.len());
                return token;
            }
        }
    }

    /// Check a token against the current time
    pub fn verify(&self, token: &str) -> Verification {
        self.verify_at(token, now_ms())
    }

    /// Check a token as of `now_ms`
    pub fn verify_at(&self, token: &str, now_ms: i64) -> Verification {
        let mut tokens = self.tokens.lock();
        let Some(&issued_at) = tokens.get(token) else {
            return Verification::Unknown;
        };

        if now_ms.saturating_sub(issued_at) > self.ttl_ms {
            tokens.remove(token);
            log::info!("Capability token expired");
            return Verification::Expired;
        }
        Verification::Valid
    }

    /// Remove every expired token. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(now_ms())
    }

    pub fn sweep_expired_at(&self, now_ms: i64) -> usize {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, issued_at| now_ms.saturating_sub(*issued_at) <= self.ttl_ms);
        let removed = before - tokens.len();
        if removed > 0 {
            log::debug!("Swept {} expired tokens", removed);
        }
        removed
    }

    /// Sweep expired tokens every `interval` on a background task
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tokens = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                tokens.sweep_expired();
            }
        })
    }

    /// Number of tokens currently held, expired or not
    pub fn outstanding(&self) -> usize {
        self.tokens.lock().len()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1000;

    fn service() -> TokenService {
        TokenService::new(Duration::from_secs(1800))
    }

    #[test]
    fn test_token_shape_and_uniqueness() {
        let tokens = service();
        let a = tokens.issue();
        let b = tokens.issue();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(tokens.outstanding(), 2);
    }

    #[test]
    fn test_fresh_token_valid_repeatedly() {
        let tokens = service();
        let token = tokens.issue();
        assert!(tokens.verify(&token).is_valid());
        assert!(tokens.verify(&token).is_valid());
    }

    #[test]
    fn test_unknown_token() {
        let tokens = service();
        assert_eq!(tokens.verify("deadbeef"), Verification::Unknown);
        assert_eq!(tokens.verify(""), Verification::Unknown);
    }

    #[test]
    fn test_expiry_boundary_and_no_resurrection() {
        let tokens = service();
        let issued = 1_700_000_000_000;
        let token = tokens.issue_at(issued);

        assert_eq!(tokens.verify_at(&token, issued + 1799 * SEC), Verification::Valid);
        assert_eq!(tokens.verify_at(&token, issued + 1800 * SEC), Verification::Valid);
        assert_eq!(tokens.verify_at(&token, issued + 1801 * SEC), Verification::Expired);
        assert_eq!(tokens.verify_at(&token, issued + 1802 * SEC), Verification::Unknown);
        assert_eq!(tokens.outstanding(), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let tokens = service();
        let old = tokens.issue_at(0);
        let fresh = tokens.issue_at(1000 * SEC);

        assert_eq!(tokens.sweep_expired_at(1900 * SEC), 1);
        assert_eq!(tokens.verify_at(&old, 1900 * SEC), Verification::Unknown);
        assert_eq!(tokens.verify_at(&fresh, 1900 * SEC), Verification::Valid);
    }

    #[tokio::test]
    async fn test_sweeper_runs_in_background() {
        let tokens = Arc::new(TokenService::new(Duration::from_millis(1)));
        tokens.issue_at(0);
        let handle = tokens.spawn_sweeper(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert_eq!(tokens.outstanding(), 0);
    }
}
