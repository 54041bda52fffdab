//! Bearer tokens.
//!
//! A token has three colon-separated base64 parts:
//!
//! ```text
//! base64(random) ":" base64(random) ":" base64(json(scope))
//! ```
//!
//! The scope records the token type, lifetime, granted scopes and the Unix
//! time the token was issued. A token is accepted only while it equals the
//! token last persisted for its identity and its issue time is within the
//! expiry window; issuing a new token supersedes the old one.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trellis_core::{TrellisError, TrellisResult};

use crate::error::StoreResult;
use crate::session::BaseSession;
use crate::store::SessionStore;

/// Session item under which an identity's current token is persisted.
pub const TOKEN_ITEM: &str = "token";

/// How long a persisted token is kept after its expiry window closes.
///
/// A token presented in this period is rejected as expired; after it the
/// store has forgotten it and it is rejected as invalid.
pub const TOKEN_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

const RANDOM_BYTES: usize = 16;

/// The scope embedded in a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenScope {
    /// Token type, such as `bearer`.
    #[serde(rename = "type")]
    pub token_type: String,
    /// Advertised lifetime in seconds.
    pub expires_in: u64,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Unix time of issue, in seconds.
    pub timestamp: i64,
}

/// Creates a token issued now.
pub fn generate_token(token_type: &str, expires_in: u64, scopes: &[&str]) -> String {
    generate_token_at(token_type, expires_in, scopes, Utc::now().timestamp())
}

/// Creates a token with an explicit issue time.
pub fn generate_token_at(token_type: &str, expires_in: u64, scopes: &[&str], timestamp: i64) -> String {
    let scope = TokenScope {
        token_type: token_type.to_string(),
        expires_in,
        scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
        timestamp,
    };
    // Serializing a struct of strings and integers cannot fail.
    let scope_json = serde_json::to_vec(&scope).unwrap_or_default();

    let mut rng = rand::thread_rng();
    let mut first = [0_u8; RANDOM_BYTES];
    let mut second = [0_u8; RANDOM_BYTES];
    rng.fill_bytes(&mut first);
    rng.fill_bytes(&mut second);

    format!(
        "{}:{}:{}",
        STANDARD.encode(first),
        STANDARD.encode(second),
        STANDARD.encode(scope_json)
    )
}

/// Decodes the scope embedded in `token`.
pub fn parse_token(token: &str) -> TrellisResult<TokenScope> {
    let invalid = || TrellisError::invalid_token("Invalid token");
    let mut parts = token.split(':');
    let (Some(_), Some(_), Some(scope), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    let raw = STANDARD.decode(scope).map_err(|_| invalid())?;
    serde_json::from_slice(&raw).map_err(|_| invalid())
}

/// Checks `presented` against the persisted token, at the current time.
pub fn diff_token(presented: &str, stored: Option<&str>, expired_time: Duration) -> TrellisResult<TokenScope> {
    diff_token_at(presented, stored, expired_time, Utc::now().timestamp())
}

/// Checks `presented` against the persisted token at Unix time `now`.
///
/// Fails with `InvalidToken` when nothing is persisted, the tokens differ or
/// the token cannot be decoded, and with `ExpiredToken` when more than
/// `expired_time` has passed since issue. A token exactly `expired_time` old
/// is still valid.
pub fn diff_token_at(
    presented: &str,
    stored: Option<&str>,
    expired_time: Duration,
    now: i64,
) -> TrellisResult<TokenScope> {
    match stored {
        Some(stored) if stored == presented => {}
        _ => return Err(TrellisError::invalid_token("Invalid token")),
    }

    let scope = parse_token(presented)?;
    let window = i64::try_from(expired_time.as_secs()).unwrap_or(i64::MAX);
    if now.saturating_sub(scope.timestamp) > window {
        return Err(TrellisError::expired_token("Expired token"));
    }
    Ok(scope)
}

/// Issues tokens and persists them per identity.
#[derive(Clone)]
pub struct TokenIssuer {
    store: Arc<dyn SessionStore>,
    key_prefix: String,
    expired_time: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("key_prefix", &self.key_prefix)
            .field("expired_time", &self.expired_time)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Creates an issuer writing to `store`.
    pub fn new(store: Arc<dyn SessionStore>, key_prefix: impl Into<String>, expired_time: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            expired_time,
        }
    }

    /// Builds the identity key for the given key-field values.
    pub fn identity(&self, values: &[&str]) -> String {
        identity_key(&self.key_prefix, values)
    }

    /// Returns the session holding the token of `identity`. It lives for
    /// the expiry window plus [`TOKEN_GRACE`].
    pub fn session(&self, identity: &str) -> BaseSession {
        BaseSession::new(
            identity,
            Arc::clone(&self.store),
            TOKEN_ITEM,
            self.expired_time.saturating_add(TOKEN_GRACE),
        )
    }

    /// Issues a bearer token for the identity made of `values`, superseding
    /// any earlier token of that identity.
    pub async fn issue(&self, values: &[&str], scopes: &[&str]) -> StoreResult<String> {
        let identity = self.identity(values);
        let token = generate_token("bearer", self.expired_time.as_secs(), scopes);
        self.session(&identity).try_set(&token, None).await?;
        debug!(identity = %identity, "token issued");
        Ok(token)
    }

    /// Revokes the current token of the identity made of `values`.
    pub async fn revoke(&self, values: &[&str]) -> StoreResult<bool> {
        let identity = self.identity(values);
        self.session(&identity).try_clear(None).await
    }
}

/// Joins a prefix and key-field values into an identity key.
pub fn identity_key(prefix: &str, values: &[&str]) -> String {
    let mut key = String::from(prefix);
    for value in values {
        key.push_str(value);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_token_shape() {
        let token = generate_token("bearer", 3600, &["read"]);
        let parts: Vec<_> = token.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| STANDARD.decode(p).is_ok()));
        assert_ne!(token, generate_token("bearer", 3600, &["read"]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "a:b", "a:b:c:d", "a:b:!!!", "a:b:bm90IGpzb24="] {
            let err = parse_token(bad).unwrap_err();
            assert_eq!(err.error_code(), Some(403), "{bad}");
        }
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let issued = 1_700_000_000;
        let token = generate_token_at("bearer", 3600, &[], issued);
        let stored = Some(token.as_str());

        assert!(diff_token_at(&token, stored, HOUR, issued).is_ok());
        assert!(diff_token_at(&token, stored, HOUR, issued + 3600).is_ok());
        let err = diff_token_at(&token, stored, HOUR, issued + 3601).unwrap_err();
        assert_eq!(err.error_code(), Some(402));
    }

    #[test]
    fn test_missing_or_different_stored_token_is_invalid() {
        let token = generate_token("bearer", 3600, &[]);
        let other = generate_token("bearer", 3600, &[]);

        let err = diff_token(&token, None, HOUR).unwrap_err();
        assert_eq!(err.error_code(), Some(403));
        let err = diff_token(&token, Some(&other), HOUR).unwrap_err();
        assert_eq!(err.error_code(), Some(403));
    }

    #[test]
    fn test_mismatch_wins_over_expiry() {
        let stale = generate_token_at("bearer", 1, &[], 0);
        let fresh = generate_token("bearer", 1, &[]);
        let err = diff_token(&stale, Some(&fresh), HOUR).unwrap_err();
        assert_eq!(err.error_code(), Some(403));
    }

    #[tokio::test]
    async fn test_issue_supersedes_previous_token() {
        let issuer = TokenIssuer::new(Arc::new(MemoryStore::new()), "login:", HOUR);
        let first = issuer.issue(&["ada"], &["read"]).await.unwrap();
        let second = issuer.issue(&["ada"], &["read"]).await.unwrap();

        let session = issuer.session(&issuer.identity(&["ada"]));
        let stored: Option<String> = session.get(None).await;
        assert_eq!(stored.as_deref(), Some(second.as_str()));

        let err = diff_token(&first, stored.as_deref(), HOUR).unwrap_err();
        assert_eq!(err.error_code(), Some(403));
        assert!(diff_token(&second, stored.as_deref(), HOUR).is_ok());
    }

    #[test]
    fn test_token_outlives_its_window() {
        let issuer = TokenIssuer::new(Arc::new(MemoryStore::new()), "login:", HOUR);
        assert_eq!(issuer.session("login:ada").expired_time(), HOUR + TOKEN_GRACE);
    }

    #[tokio::test]
    async fn test_revoke() {
        let issuer = TokenIssuer::new(Arc::new(MemoryStore::new()), "login:", HOUR);
        issuer.issue(&["ada"], &[]).await.unwrap();
        assert!(issuer.revoke(&["ada"]).await.unwrap());
        let stored: Option<String> = issuer.session("login:ada").get(None).await;
        assert_eq!(stored, None);
    }

    proptest! {
        #[test]
        fn prop_scope_survives_parse(
            token_type in "[a-z]{1,12}",
            expires_in in 0_u64..1_000_000,
            scopes in proptest::collection::vec("[a-z:._]{0,10}", 0..5),
            timestamp in 0_i64..4_000_000_000,
        ) {
            let scope_refs: Vec<&str> = scopes.iter().map(String::as_str).collect();
            let token = generate_token_at(&token_type, expires_in, &scope_refs, timestamp);
            let scope = parse_token(&token).unwrap();
            prop_assert_eq!(scope, TokenScope { token_type, expires_in, scopes, timestamp });
        }
    }
}
