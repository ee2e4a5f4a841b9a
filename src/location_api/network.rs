use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    LocationError, LocationProvider, PermissionState, Position, PositionCallback, WatchId,
    WatchOptions, WatchRegistry,
};

/// Fallback platform: coarse positions from an HTTP geolocation lookup, polled on an interval.
/// Works anywhere with network access, the way a browser's geolocation does without a GPS.
pub struct NetworkProvider {
    client: Client,
    url: String,
    interval: Duration,
    registry: WatchRegistry,
}

/// Accepts both the `lat`/`lon` and the `latitude`/`longitude` naming used by lookup services.
#[derive(Debug, Deserialize)]
struct NetworkFix {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default, alias = "lon")]
    longitude: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
}

impl TryFrom<NetworkFix> for Position {
    type Error = LocationError;

    fn try_from(fix: NetworkFix) -> Result<Self, Self::Error> {
        if fix.status.as_deref() == Some("fail") {
            return Err(LocationError::Unavailable(
                fix.message.unwrap_or_else(|| "lookup failed".into()),
            ));
        }
        match (fix.latitude, fix.longitude) {
            (Some(latitude), Some(longitude)) => Ok(Position {
                latitude,
                longitude,
                accuracy: fix.accuracy,
                timestamp: Utc::now(),
            }),
            _ => Err(LocationError::NoFix),
        }
    }
}

async fn lookup(client: &Client, url: &str, timeout: Duration) -> Result<Position, LocationError> {
    let fix = client
        .get(url)
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?
        .json::<NetworkFix>()
        .await?;
    fix.try_into()
}

async fn run_watch(
    client: Client,
    url: String,
    interval: Duration,
    options: WatchOptions,
    callback: PositionCallback,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            report = lookup(&client, &url, options.timeout) => {
                if let Err(e) = &report {
                    debug!("Network lookup failed {e}");
                }
                callback(report)
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => (),
        }
    }
}

impl NetworkProvider {
    pub fn new(url: &str, interval: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
            interval,
            registry: WatchRegistry::default(),
        }
    }
}

#[async_trait]
impl LocationProvider for NetworkProvider {
    fn name(&self) -> &'static str {
        "network"
    }

    /// A single lookup doubles as the permission probe. Failing it means "denied", never an error.
    async fn request_permission(&self) -> Result<PermissionState, LocationError> {
        match lookup(&self.client, &self.url, WatchOptions::default().timeout).await {
            Ok(_) => Ok(PermissionState::Granted),
            Err(e) => {
                warn!("Network location lookup at {} failed {e}", self.url);
                Ok(PermissionState::Denied)
            }
        }
    }

    fn watch(
        &self,
        options: WatchOptions,
        callback: PositionCallback,
    ) -> Result<WatchId, LocationError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| LocationError::NoRuntime)?;
        let (id, shutdown) = self.registry.register();
        // A lookup service can't serve anything fresher than its own polling.
        let interval = self.interval.min(options.maximum_age);
        runtime.spawn(run_watch(
            self.client.clone(),
            self.url.clone(),
            interval,
            options,
            callback,
            shutdown,
        ));
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) -> Result<(), LocationError> {
        self.registry.cancel(id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;

    use crate::location_api::{LocationError, LocationProvider, PermissionState, Position};

    use super::{NetworkFix, NetworkProvider};

    #[test]
    fn test_lookup_service_shapes() -> Result<()> {
        let fix: NetworkFix = serde_json::from_str(
            r#"{"status":"success","country":"Denmark","lat":55.6759,"lon":12.5655,"query":"1.2.3.4"}"#,
        )?;
        let position = Position::try_from(fix)?;
        assert_eq!((position.latitude, position.longitude), (55.6759, 12.5655));
        assert_eq!(position.accuracy, None);

        let fix: NetworkFix =
            serde_json::from_str(r#"{"latitude":-33.87,"longitude":151.21,"accuracy":5000}"#)?;
        assert_eq!(Position::try_from(fix)?.accuracy, Some(5000.));
        Ok(())
    }

    #[test]
    fn test_failed_lookup() -> Result<()> {
        let fix: NetworkFix =
            serde_json::from_str(r#"{"status":"fail","message":"private range"}"#)?;
        assert!(matches!(
            Position::try_from(fix),
            Err(LocationError::Unavailable(message)) if message == "private range"
        ));

        let fix: NetworkFix = serde_json::from_str(r#"{"city":"Nowhere"}"#)?;
        assert!(matches!(Position::try_from(fix), Err(LocationError::NoFix)));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_service_is_denied_not_failed() -> Result<()> {
        let provider = NetworkProvider::new("http://127.0.0.1:9/json", Duration::from_secs(30));
        assert_eq!(provider.request_permission().await?, PermissionState::Denied);
        Ok(())
    }
}
