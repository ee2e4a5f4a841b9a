use std::{io::ErrorKind, path::PathBuf, sync::RwLock};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{AuthError, AuthProvider, Identity};

pub const SESSION_FILE: &str = "session.json";

/// Password based authentication against the hosted backend. The signed in session is kept in
/// `session.json` so every CLI invocation doesn't have to sign in again.
pub struct SupabaseAuth {
    client: Client,
    base_url: String,
    anon_key: String,
    session_path: PathBuf,
    current: RwLock<Option<Identity>>,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Body of the `create-user` edge function.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

impl From<TokenResponse> for Identity {
    fn from(TokenResponse { access_token, user }: TokenResponse) -> Self {
        Identity {
            user_id: user.id.into(),
            access_token,
            email: user.email,
        }
    }
}

/// The auth service and edge functions don't agree on an error shape, so every known field is
/// tried.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error_description: Option<String>,
        msg: Option<String>,
        message: Option<String>,
        error: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|v| v.error_description.or(v.msg).or(v.message).or(v.error))
        .unwrap_or_else(|| body.to_string())
}

async fn ensure_success(response: Response) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(AuthError::Rejected {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }
}

impl SupabaseAuth {
    /// Restores a previously saved session from `application_dir`, if there is one.
    pub fn load(base_url: &str, anon_key: &str, application_dir: PathBuf) -> Result<Self, AuthError> {
        let session_path = application_dir.join(SESSION_FILE);
        let current = match std::fs::read(&session_path) {
            Ok(content) => Some(serde_json::from_slice::<Identity>(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session_path,
            current: RwLock::new(current),
        })
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;
        let identity: Identity = ensure_success(response)
            .await?
            .json::<TokenResponse>()
            .await?
            .into();

        self.store_session(Some(identity.clone()))?;
        info!("Signed in as {}", identity.user_id);
        Ok(identity)
    }

    /// Invokes the `create-user` edge function on behalf of the signed in administrator.
    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<(), AuthError> {
        let identity = self.current_identity().ok_or(AuthError::NotSignedIn)?;
        let response = self
            .client
            .post(format!("{}/functions/v1/create-user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&identity.access_token)
            .json(request)
            .send()
            .await?;
        ensure_success(response).await?;
        info!("Created user {}", request.email);
        Ok(())
    }

    fn store_session(&self, identity: Option<Identity>) -> Result<(), AuthError> {
        match &identity {
            Some(identity) => {
                std::fs::write(&self.session_path, serde_json::to_vec_pretty(identity)?)?
            }
            None => match std::fs::remove_file(&self.session_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = identity;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    fn current_identity(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The local session is dropped even if the backend can't be told about it.
    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(identity) = self.current_identity() else {
            return Ok(());
        };

        let result = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&identity.access_token)
            .send()
            .await;
        match result {
            Ok(response) => {
                if let Err(e) = ensure_success(response).await {
                    warn!("Backend refused to end the session {e}");
                }
            }
            Err(e) => warn!("Couldn't reach the backend to end the session {e}"),
        }

        self.store_session(None)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use crate::auth::{AuthProvider, Identity};

    use super::{error_message, CreateUserRequest, SupabaseAuth, TokenResponse, SESSION_FILE};

    #[test]
    fn test_token_response_into_identity() -> Result<()> {
        let response: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "jwt",
                "token_type": "bearer",
                "expires_in": 3600,
                "user": { "id": "8f1d", "email": "sarah@company.com", "role": "authenticated" }
            }"#,
        )?;
        let identity = Identity::from(response);
        assert_eq!(&*identity.user_id, "8f1d");
        assert_eq!(identity.access_token, "jwt");
        assert_eq!(identity.email.as_deref(), Some("sarah@company.com"));
        Ok(())
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(r#"{"msg":"Token expired"}"#), "Token expired");
        assert_eq!(error_message(r#"{"message":"Forbidden"}"#), "Forbidden");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_create_user_body() -> Result<()> {
        let body = serde_json::to_value(CreateUserRequest {
            email: "john@example.com".into(),
            password: "secret".into(),
            full_name: "John Doe".into(),
        })?;
        assert_eq!(
            body,
            serde_json::json!({ "email": "john@example.com", "password": "secret", "fullName": "John Doe" })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_saved_session_is_restored_and_sign_out_clears_it() -> Result<()> {
        let dir = tempdir()?;
        let identity = Identity {
            user_id: "8f1d".into(),
            access_token: "jwt".into(),
            email: None,
        };
        std::fs::write(dir.path().join(SESSION_FILE), serde_json::to_vec(&identity)?)?;

        // Nothing listens on the discard port, the logout request fails fast.
        let auth = SupabaseAuth::load("http://127.0.0.1:9", "anon", dir.path().to_owned())?;
        assert_eq!(auth.current_identity(), Some(identity));

        auth.sign_out().await?;
        assert_eq!(auth.current_identity(), None);
        assert!(!dir.path().join(SESSION_FILE).exists());
        Ok(())
    }
}
