//! Contains logic for obtaining device positions from different platforms.
//! [GenericLocationProvider] is the main artifact of this module: it hides which platform
//! actually answers behind the [LocationProvider] contract.

pub mod gpsd;
pub mod network;

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LocationConfig;

use self::{gpsd::GpsdProvider, network::NetworkProvider};

/// Raw position as reported by a platform.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters, when the platform knows it.
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub enable_high_accuracy: bool,
    /// Oldest cached position that is still acceptable.
    pub maximum_age: Duration,
    /// How long to wait for a position before reporting an error.
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            maximum_age: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Identifies a watch. Ids are unique across every provider in the process, so a provider can
/// tell that an id isn't one of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WatchId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("location service unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting for a position")]
    Timeout,
    #[error("no position fix")]
    NoFix,
    #[error("{0} is not active")]
    UnknownWatch(WatchId),
    #[error("no async runtime to run the watch on")]
    NoRuntime,
    #[error("location io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("location request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected location message: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Receives every report of a watch. Reports are delivered one at a time.
pub type PositionCallback = Arc<dyn Fn(Result<Position, LocationError>) + Send + Sync>;

/// Intended to serve as a contract every location platform must implement.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn request_permission(&self) -> Result<PermissionState, LocationError>;

    /// Starts delivering reports to `callback` until [LocationProvider::clear_watch] is called.
    /// Must be called from within a tokio runtime.
    fn watch(
        &self,
        options: WatchOptions,
        callback: PositionCallback,
    ) -> Result<WatchId, LocationError>;

    fn clear_watch(&self, id: WatchId) -> Result<(), LocationError>;
}

/// Bookkeeping of running watches shared by the platform implementations.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    watches: Mutex<HashMap<WatchId, CancellationToken>>,
}

impl WatchRegistry {
    pub(crate) fn register(&self) -> (WatchId, CancellationToken) {
        let id = WatchId::next();
        let token = CancellationToken::new();
        self.watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, token.clone());
        (id, token)
    }

    pub(crate) fn cancel(&self, id: WatchId) -> Result<(), LocationError> {
        let token = self
            .watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .ok_or(LocationError::UnknownWatch(id))?;
        token.cancel();
        Ok(())
    }
}

/// Serves as the cross-platform [LocationProvider]. Every operation goes to the preferred
/// platform first and only reaches the fallback when the preferred one fails.
pub struct GenericLocationProvider {
    preferred: Box<dyn LocationProvider>,
    fallback: Option<Box<dyn LocationProvider>>,
}

impl GenericLocationProvider {
    pub fn new(
        preferred: Box<dyn LocationProvider>,
        fallback: Option<Box<dyn LocationProvider>>,
    ) -> Self {
        Self {
            preferred,
            fallback,
        }
    }

    /// Builds the provider chain from configuration: gpsd first, network lookup as fallback.
    pub fn from_config(config: &LocationConfig) -> Result<Self> {
        let gpsd = config
            .use_gpsd
            .then(|| Box::new(GpsdProvider::new(config.gpsd_address.clone())) as Box<dyn LocationProvider>);
        let network = config.use_network.then(|| {
            Box::new(NetworkProvider::new(
                &config.network_url,
                Duration::from_secs(config.network_poll_secs),
            )) as Box<dyn LocationProvider>
        });

        match (gpsd, network) {
            (Some(gpsd), network) => Ok(Self::new(gpsd, network)),
            (None, Some(network)) => Ok(Self::new(network, None)),
            (None, None) => bail!("Every location platform is disabled"),
        }
    }
}

#[async_trait]
impl LocationProvider for GenericLocationProvider {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn request_permission(&self) -> Result<PermissionState, LocationError> {
        match self.preferred.request_permission().await {
            Ok(state) => Ok(state),
            Err(e) => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                warn!(
                    "Permission request through {} failed, trying {}: {e}",
                    self.preferred.name(),
                    fallback.name()
                );
                fallback.request_permission().await
            }
        }
    }

    fn watch(
        &self,
        options: WatchOptions,
        callback: PositionCallback,
    ) -> Result<WatchId, LocationError> {
        match self.preferred.watch(options.clone(), callback.clone()) {
            Ok(id) => {
                info!("Watching positions through {} as {id}", self.preferred.name());
                Ok(id)
            }
            Err(e) => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                warn!("Couldn't watch through {}, trying {}: {e}", self.preferred.name(), fallback.name());
                let id = fallback.watch(options, callback)?;
                info!("Watching positions through {} as {id}", fallback.name());
                Ok(id)
            }
        }
    }

    /// When the fallback doesn't know `id` either, the preferred platform's error is the one
    /// that explains the failure.
    fn clear_watch(&self, id: WatchId) -> Result<(), LocationError> {
        match self.preferred.clear_watch(id) {
            Ok(()) => Ok(()),
            Err(e) => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                warn!(
                    "Couldn't clear {id} through {}, trying {}: {e}",
                    self.preferred.name(),
                    fallback.name()
                );
                match fallback.clear_watch(id) {
                    Err(LocationError::UnknownWatch(_)) => Err(e),
                    result => result,
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;

    use crate::config::LocationConfig;

    use super::{
        testing::{ManualProvider, PermissionAnswer},
        GenericLocationProvider, LocationError, LocationProvider, PermissionState, WatchOptions,
    };

    fn generic(preferred: ManualProvider, fallback: ManualProvider) -> GenericLocationProvider {
        GenericLocationProvider::new(Box::new(preferred), Some(Box::new(fallback)))
    }

    #[test]
    fn test_default_watch_options() {
        let options = WatchOptions::default();
        assert!(options.enable_high_accuracy);
        assert_eq!(options.maximum_age, Duration::from_secs(30));
        assert_eq!(options.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_permission_falls_back_only_on_failure() -> Result<()> {
        let provider = generic(
            ManualProvider::new("native", PermissionAnswer::Fails),
            ManualProvider::new("browser", PermissionAnswer::Granted),
        );
        assert_eq!(provider.request_permission().await?, PermissionState::Granted);

        let provider = generic(
            ManualProvider::new("native", PermissionAnswer::Denied),
            ManualProvider::new("browser", PermissionAnswer::Granted),
        );
        assert_eq!(provider.request_permission().await?, PermissionState::Denied);

        let provider = GenericLocationProvider::new(
            Box::new(ManualProvider::new("native", PermissionAnswer::Fails)),
            None,
        );
        assert!(provider.request_permission().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_watch_and_clear_use_the_platform_that_accepted() -> Result<()> {
        let mut native = ManualProvider::new("native", PermissionAnswer::Fails);
        native.watch_fails = true;
        let provider = generic(native, ManualProvider::new("browser", PermissionAnswer::Granted));

        let id = provider.watch(WatchOptions::default(), Arc::new(|_| {}))?;
        provider.clear_watch(id)?;

        assert!(matches!(
            provider.clear_watch(id),
            Err(LocationError::UnknownWatch(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_keeps_the_preferred_failure() -> Result<()> {
        let mut native = ManualProvider::new("native", PermissionAnswer::Granted);
        native.clear_fails = true;
        let provider = generic(native, ManualProvider::new("browser", PermissionAnswer::Granted));

        let id = provider.watch(WatchOptions::default(), Arc::new(|_| {}))?;

        assert!(matches!(
            provider.clear_watch(id),
            Err(LocationError::Unavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_from_config_requires_a_platform() {
        let config = LocationConfig {
            use_gpsd: false,
            use_network: false,
            ..LocationConfig::default()
        };
        assert!(GenericLocationProvider::from_config(&config).is_err());

        let config = LocationConfig {
            use_gpsd: false,
            ..LocationConfig::default()
        };
        let provider = GenericLocationProvider::from_config(&config).unwrap();
        assert_eq!(provider.preferred.name(), "network");
        assert!(provider.fallback.is_none());
    }
}
