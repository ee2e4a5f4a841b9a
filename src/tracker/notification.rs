use crate::store::entities::LocationSample;

/// User-visible messages a session sends to whoever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    TrackingStarted,
    TrackingStopped,
    AuthenticationRequired,
    PermissionDenied,
    TrackingFailed(String),
    /// A single report from the platform failed. Tracking continues.
    LocationError(String),
    LocationUpdated(LocationSample),
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self {
            Notification::TrackingStarted => "Tracking started",
            Notification::TrackingStopped => "Tracking stopped",
            Notification::AuthenticationRequired => "Authentication required",
            Notification::PermissionDenied => "Permission denied",
            Notification::TrackingFailed(_) => "Tracking failed",
            Notification::LocationError(_) => "Location error",
            Notification::LocationUpdated(_) => "Location updated",
        }
    }

    pub fn description(&self) -> String {
        match self {
            Notification::TrackingStarted => "Your location is now being tracked.".into(),
            Notification::TrackingStopped => "Location tracking has been paused.".into(),
            Notification::AuthenticationRequired => "Please sign in to start tracking.".into(),
            Notification::PermissionDenied => "Location access is required for tracking.".into(),
            Notification::TrackingFailed(reason) => {
                format!("Could not start location tracking: {reason}")
            }
            Notification::LocationError(reason) => {
                format!("Failed to get location, please check your permissions: {reason}")
            }
            Notification::LocationUpdated(sample) => format!(
                "{:.6}, {:.6} (±{:.0} m) at {}",
                sample.latitude,
                sample.longitude,
                sample.accuracy,
                sample.timestamp.format("%H:%M:%S")
            ),
        }
    }

    /// Whether the message reports a failure.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Notification::AuthenticationRequired
                | Notification::PermissionDenied
                | Notification::TrackingFailed(_)
                | Notification::LocationError(_)
        )
    }
}
