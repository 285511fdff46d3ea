//! Bearer-token verification and the authentication middleware.
//!
//! Verifies `AccessToken`s issued by the identity provider using
//! ed25519-dalek, and caches successful verifications to avoid re-checking
//! signatures on every request.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use keepsake_shared::{verify_access_token_with_key, AccessToken};

use crate::api::AppState;
use crate::error::ApiError;

/// The resolved caller identity, inserted as a request extension by
/// [`auth_middleware`] and consumed by every capsule handler.
#[derive(Debug, Clone)]
pub struct CallerUid(pub String);

// ---------------------------------------------------------------------------
// Cached entry
// ---------------------------------------------------------------------------

/// A cached successful verification, keyed by the raw bearer string.
#[derive(Debug, Clone)]
struct CachedCaller {
    uid: String,
    /// Token expiry; the entry is unusable past this point.
    expires_at: DateTime<Utc>,
}

impl CachedCaller {
    fn is_fresh(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Token verifier
// ---------------------------------------------------------------------------

/// Verifies bearer tokens against the identity provider's public key and
/// caches the resolved uid until the token expires.
#[derive(Clone)]
pub struct TokenVerifier {
    provider_pubkey: [u8; 32],
    cache: Arc<RwLock<HashMap<String, CachedCaller>>>,
}

impl TokenVerifier {
    pub fn new(provider_pubkey: [u8; 32]) -> Self {
        Self {
            provider_pubkey,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve a bearer string to a user id.
    ///
    /// Successful verifications are cached so that subsequent requests with
    /// the same token skip the signature check.
    pub async fn resolve(&self, bearer: &str) -> Result<String, ApiError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(bearer) {
                if entry.is_fresh() {
                    debug!(uid = %entry.uid, "Caller resolved from cache");
                    return Ok(entry.uid.clone());
                }
            }
        }

        let token = AccessToken::decode(bearer)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;
        verify_access_token_with_key(&token, &self.provider_pubkey)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;

        {
            let mut cache = self.cache.write().await;
            cache.insert(
                bearer.to_string(),
                CachedCaller {
                    uid: token.uid.clone(),
                    expires_at: token.expires_at,
                },
            );
        }

        debug!(uid = %token.uid, "Caller verified");
        Ok(token.uid)
    }

    /// Evict expired entries from the cache.
    pub async fn purge_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh());
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Purged expired token cache entries");
        }
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Authenticate the request and apply per-caller rate limiting.
///
/// On success the resolved [`CallerUid`] is inserted as a request extension.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let bearer = auth
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let uid = state.verifier.resolve(bearer).await?;

    if !state.rate_limiter.check(&uid).await {
        warn!(uid = %uid, "Rate limit exceeded");
        return Err(ApiError::RateLimited);
    }

    req.extensions_mut().insert(CallerUid(uid));
    Ok(next.run(req).await)
}
