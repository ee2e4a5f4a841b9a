use crate::{location_api::LocationError, store::StoreError};

/// Everything that can go wrong around a tracking session. Only [TrackingError::Unauthenticated],
/// [TrackingError::PermissionDenied] and [TrackingError::SubscriptionFailed] abort an operation,
/// the rest are logged and swallowed where they happen.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("authentication required, sign in to start tracking")]
    Unauthenticated,
    #[error("location access is required for tracking")]
    PermissionDenied,
    #[error("could not start location tracking: {0}")]
    SubscriptionFailed(#[source] LocationError),
    #[error("failed to get location: {0}")]
    SampleError(#[source] LocationError),
    #[error("failed to save location: {0}")]
    PersistenceWriteFailure(#[source] StoreError),
    #[error("failed to fetch location history: {0}")]
    PersistenceReadFailure(#[source] StoreError),
    #[error("failed to stop location tracking: {0}")]
    SubscriptionCancelFailure(#[source] LocationError),
}
