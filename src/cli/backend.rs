use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use tracing::info;

use crate::{
    auth::{supabase::SupabaseAuth, AuthProvider, Identity, StaticAuth},
    config::AppConfig,
    store::{jsonl::JsonlStore, rest::RestStore, LocationStore},
    tracker::TrackingError,
};

/// Directory of the local store inside the application directory.
const LOCAL_STORE_DIR: &str = "store";

/// Collaborators every command works against. Either the hosted backend, or the local store
/// with a fixed offline identity.
pub struct Backend {
    pub store: Arc<dyn LocationStore>,
    pub auth: Arc<dyn AuthProvider>,
    /// Present only when talking to the hosted backend.
    pub hosted: Option<Arc<SupabaseAuth>>,
}

impl Backend {
    pub fn connect(config: &AppConfig, application_dir: &Path, offline: bool) -> Result<Self> {
        match config.backend_credentials() {
            Some((url, anon_key)) if !offline => {
                info!("Using backend at {url}");
                let auth = Arc::new(SupabaseAuth::load(
                    url,
                    anon_key,
                    application_dir.to_owned(),
                )?);
                let store = RestStore::new(
                    url,
                    anon_key,
                    Duration::from_secs(config.backend.realtime_poll_secs),
                );
                Ok(Self {
                    store: Arc::new(store),
                    auth: auth.clone(),
                    hosted: Some(auth),
                })
            }
            _ => {
                info!("Using the local store as {}", config.offline_user);
                let store = JsonlStore::new(application_dir.join(LOCAL_STORE_DIR))?;
                Ok(Self {
                    store: Arc::new(store),
                    auth: Arc::new(StaticAuth::offline(&config.offline_user)),
                    hosted: None,
                })
            }
        }
    }

    pub fn hosted(&self) -> Result<&SupabaseAuth> {
        match &self.hosted {
            Some(v) => Ok(v),
            None => bail!(
                "No backend configured. Set backend.url and backend.anon_key in config.json or use REALCON_URL and REALCON_ANON_KEY"
            ),
        }
    }

    pub fn identity(&self) -> Result<Identity> {
        Ok(self
            .auth
            .current_identity()
            .ok_or(TrackingError::Unauthenticated)?)
    }
}
