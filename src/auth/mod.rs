//! Authentication collaborators. The tracker only asks "who is signed in, if anyone".
//! [supabase::SupabaseAuth] talks to the hosted backend, [StaticAuth] serves the offline mode.

pub mod supabase;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque identity, enough to scope persistence queries. It's never validated or refreshed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Arc<str>,
    pub access_token: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("request to the auth service failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("auth service rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("session file is unusable: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file is malformed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not signed in")]
    NotSignedIn,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Identity fixed at construction. Signing out forgets it for the lifetime of the process.
pub struct StaticAuth {
    identity: std::sync::RwLock<Option<Identity>>,
}

impl StaticAuth {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity: std::sync::RwLock::new(identity),
        }
    }

    /// Identity used when working against the local store.
    pub fn offline(user_id: &str) -> Self {
        Self::new(Some(Identity {
            user_id: user_id.into(),
            access_token: String::new(),
            email: None,
        }))
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    fn current_identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{AuthProvider, StaticAuth};

    #[tokio::test]
    async fn test_static_auth_sign_out() -> Result<()> {
        let auth = StaticAuth::offline("local");
        assert_eq!(auth.current_identity().map(|v| v.user_id.to_string()), Some("local".into()));

        auth.sign_out().await?;
        assert_eq!(auth.current_identity(), None);
        Ok(())
    }
}
