use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::store::LocalStore;

const IDENTITY_CACHE_KEY: &str = "exploreyou.identity";
const AUTH_PROFILE_KEY: &str = "exploreyou.authProfile";

/// Authenticated user as reported by the external identity provider.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// External identity provider. Sign-in/out and credential storage live
/// entirely behind this seam.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<AuthUser>>;
}

/// Locally remembered profile used when no authenticated identity exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthProfile {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl UserIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_present(&self) -> bool {
        self.user_id.is_some() || self.email.is_some()
    }

    /// Stable key for per-user cache entries. Prefers the provider id,
    /// falls back to the email form.
    pub fn user_key(&self) -> Option<String> {
        if let Some(user_id) = &self.user_id {
            return Some(user_id.clone());
        }
        self.email.as_ref().map(|email| format!("email:{email}"))
    }
}

/// Resolves a stable user identity with a short-lived cache so progress and
/// score operations do not hit the identity provider on every call.
pub struct IdentityResolver {
    provider: Arc<dyn AuthProvider>,
    store: LocalStore,
    cache_ttl_ms: i64,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn AuthProvider>, store: LocalStore, cache_ttl_ms: i64) -> Self {
        Self {
            provider,
            store,
            cache_ttl_ms,
        }
    }

    /// Resolve the current identity. Never fails: provider and storage
    /// errors degrade to the next fallback, ending at an anonymous identity.
    pub async fn resolve(&self) -> UserIdentity {
        self.resolve_with(false).await
    }

    pub async fn resolve_with(&self, force_refresh: bool) -> UserIdentity {
        if force_refresh {
            if let Err(err) = self.store.remove(IDENTITY_CACHE_KEY).await {
                warn!("Failed to clear identity cache: {err}");
            }
        } else {
            match self.store.get_json::<UserIdentity>(IDENTITY_CACHE_KEY).await {
                Ok(Some(cached)) => return cached,
                Ok(None) => {}
                Err(err) => warn!("Identity cache read failed: {err}"),
            }
        }

        let mut identity = UserIdentity::anonymous();

        match self.provider.current_user().await {
            Ok(Some(user)) => {
                identity = UserIdentity {
                    user_id: Some(format!("user:{}", user.id)),
                    email: user.email,
                };
            }
            Ok(None) => {}
            Err(err) => {
                // Fall back to the locally remembered profile.
                warn!("Identity provider lookup failed: {err}");
            }
        }

        if identity.user_id.is_none() {
            if let Some(profile) = self.load_profile().await {
                identity = UserIdentity {
                    user_id: Some(format!("email:{}", profile.email)),
                    email: Some(profile.email),
                };
            }
        }

        if let Err(err) = self
            .store
            .put_json(IDENTITY_CACHE_KEY, &identity, Some(self.cache_ttl_ms))
            .await
        {
            warn!("Identity cache write failed: {err}");
        }

        identity
    }

    /// Drop the cached identity, e.g. after sign-in/out.
    pub async fn clear_cache(&self) -> Result<()> {
        self.store.remove(IDENTITY_CACHE_KEY).await
    }

    pub async fn save_profile(&self, profile: &AuthProfile) -> Result<()> {
        self.store.put_json(AUTH_PROFILE_KEY, profile, None).await
    }

    pub async fn load_profile(&self) -> Option<AuthProfile> {
        match self.store.get_json::<AuthProfile>(AUTH_PROFILE_KEY).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!("Auth profile read failed: {err}");
                None
            }
        }
    }

    pub async fn clear_profile(&self) -> Result<()> {
        self.store.remove(AUTH_PROFILE_KEY).await
    }
}
