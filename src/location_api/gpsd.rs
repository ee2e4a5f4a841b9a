use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    LocationError, LocationProvider, PermissionState, Position, PositionCallback, WatchId,
    WatchOptions, WatchRegistry,
};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Native platform: a local gpsd daemon speaking its JSON protocol over TCP.
pub struct GpsdProvider {
    address: String,
    registry: WatchRegistry,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum GpsdMessage {
    #[serde(rename = "VERSION")]
    Version { release: String },
    #[serde(rename = "TPV")]
    Tpv(TpvReport),
    #[serde(other)]
    Other,
}

/// Time-position-velocity report. Only the fields the tracker uses are read.
#[derive(Debug, Deserialize)]
struct TpvReport {
    /// 0 and 1 mean no fix, 2 is a 2D fix, 3 a 3D fix.
    #[serde(default)]
    mode: u8,
    time: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lon: Option<f64>,
    /// Longitude and latitude error estimates in meters.
    epx: Option<f64>,
    epy: Option<f64>,
}

impl GpsdProvider {
    pub fn new(address: String) -> Self {
        Self {
            address,
            registry: WatchRegistry::default(),
        }
    }
}

/// Interprets one line from gpsd. `None` means the line carries nothing for the watcher.
fn parse_report(
    line: &str,
    maximum_age: Duration,
    now: DateTime<Utc>,
) -> Option<Result<Position, LocationError>> {
    let report = match serde_json::from_str::<GpsdMessage>(line) {
        Ok(GpsdMessage::Tpv(report)) => report,
        Ok(_) => return None,
        Err(e) => return Some(Err(e.into())),
    };

    if report.mode < 2 {
        return Some(Err(LocationError::NoFix));
    }
    let (Some(latitude), Some(longitude)) = (report.lat, report.lon) else {
        return Some(Err(LocationError::NoFix));
    };

    let timestamp = report.time.unwrap_or(now);
    if (now - timestamp).to_std().is_ok_and(|age| age > maximum_age) {
        trace!("Skipping stale report from {timestamp}");
        return None;
    }

    let accuracy = match (report.epx, report.epy) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    };

    Some(Ok(Position {
        latitude,
        longitude,
        accuracy,
        timestamp,
    }))
}

async fn connect(address: &str, options: &WatchOptions) -> Result<TcpStream, LocationError> {
    timeout(options.timeout, TcpStream::connect(address))
        .await
        .map_err(|_| LocationError::Timeout)?
        .map_err(LocationError::from)
}

/// Streams reports from one connection. Returns when the connection breaks.
async fn stream_reports(
    address: &str,
    options: &WatchOptions,
    callback: &PositionCallback,
) -> Result<(), LocationError> {
    let stream = connect(address, options).await?;
    let (read, mut write) = stream.into_split();
    write.write_all(WATCH_COMMAND).await?;
    let mut lines = BufReader::new(read).lines();

    loop {
        match timeout(options.timeout, lines.next_line()).await {
            Err(_) => callback(Err(LocationError::Timeout)),
            Ok(Ok(Some(line))) => {
                if let Some(report) = parse_report(&line, options.maximum_age, Utc::now()) {
                    callback(report);
                }
            }
            Ok(Ok(None)) => {
                return Err(LocationError::Unavailable(
                    "gpsd closed the connection".into(),
                ))
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

async fn run_watch(
    address: String,
    options: WatchOptions,
    callback: PositionCallback,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            result = stream_reports(&address, &options, &callback) => {
                if let Err(e) = result {
                    warn!("Lost gpsd at {address}: {e}");
                    callback(Err(e));
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => debug!("Reconnecting to gpsd at {address}"),
        }
    }
}

#[async_trait]
impl LocationProvider for GpsdProvider {
    fn name(&self) -> &'static str {
        "gpsd"
    }

    /// gpsd has no permission model. Access counts as granted once the daemon greets us.
    async fn request_permission(&self) -> Result<PermissionState, LocationError> {
        let options = WatchOptions::default();
        let stream = connect(&self.address, &options).await?;
        let mut lines = BufReader::new(stream).lines();
        let greeting = timeout(options.timeout, lines.next_line())
            .await
            .map_err(|_| LocationError::Timeout)??
            .ok_or_else(|| LocationError::Unavailable("gpsd sent nothing".into()))?;

        match serde_json::from_str::<GpsdMessage>(&greeting)? {
            GpsdMessage::Version { release } => {
                info!("gpsd {release} available at {}", self.address);
                Ok(PermissionState::Granted)
            }
            _ => Err(LocationError::Unavailable(format!(
                "unexpected gpsd greeting {greeting}"
            ))),
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
        runtime.spawn(run_watch(self.address.clone(), options, callback, shutdown));
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) -> Result<(), LocationError> {
        self.registry.cancel(id)
    }
}
