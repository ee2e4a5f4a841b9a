use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, TimeZone};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    analysis::{distinct_locations_on, time_spent_on},
    auth::{AuthProvider, Identity},
    location_api::{
        LocationError, LocationProvider, PermissionState, Position, PositionCallback, WatchId,
        WatchOptions,
    },
    store::{entities::LocationSample, LocationStore},
    utils::clock::Clock,
};

use super::{error::TrackingError, notification::Notification};

/// Most recent samples kept in [TrackingSession::history].
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

impl From<Position> for LocationSample {
    fn from(position: Position) -> Self {
        LocationSample {
            latitude: position.latitude,
            longitude: position.longitude,
            accuracy: position.accuracy.unwrap_or(0.),
            timestamp: position.timestamp,
            location_name: None,
            address: None,
        }
    }
}

/// State shared with the platform callbacks.
#[derive(Default)]
struct SharedState {
    /// Generation of the subscription whose reports are accepted. `None` while idle.
    active_generation: Option<u64>,
    latest_sample: Option<LocationSample>,
    history: Vec<LocationSample>,
}

struct Subscription {
    id: WatchId,
    generation: u64,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns the lifecycle of continuous position sampling for the signed in user.
///
/// The session exclusively owns its platform subscription. Dropping the session cancels the
/// subscription, so whoever mounts a session can't leak it by forgetting [TrackingSession::stop].
pub struct TrackingSession {
    provider: Arc<dyn LocationProvider>,
    store: Arc<dyn LocationStore>,
    auth: Arc<dyn AuthProvider>,
    notifications: mpsc::UnboundedSender<Notification>,
    clock: Box<dyn Clock>,
    options: WatchOptions,
    subscription: Option<Subscription>,
    next_generation: u64,
    shared: Arc<Mutex<SharedState>>,
}

impl TrackingSession {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        store: Arc<dyn LocationStore>,
        auth: Arc<dyn AuthProvider>,
        notifications: mpsc::UnboundedSender<Notification>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            store,
            auth,
            notifications,
            clock,
            options: WatchOptions::default(),
            subscription: None,
            next_generation: 0,
            shared: Arc::default(),
        }
    }

    pub fn status(&self) -> TrackingStatus {
        match self.subscription {
            Some(_) => TrackingStatus::Active,
            None => TrackingStatus::Idle,
        }
    }

    pub fn latest_sample(&self) -> Option<LocationSample> {
        lock(&self.shared).latest_sample.clone()
    }

    /// Newest first, at most [HISTORY_LIMIT] entries.
    pub fn history(&self) -> Vec<LocationSample> {
        lock(&self.shared).history.clone()
    }

    pub fn time_spent_today<Tz: TimeZone>(&self, tz: &Tz) -> Duration {
        let today = self.clock.time().with_timezone(tz).date_naive();
        time_spent_on(&lock(&self.shared).history, today, tz)
    }

    pub fn distinct_locations_today<Tz: TimeZone>(&self, tz: &Tz) -> usize {
        let today = self.clock.time().with_timezone(tz).date_naive();
        distinct_locations_on(&lock(&self.shared).history, today, tz)
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("Nobody renders notifications anymore");
        }
    }

    /// Asks the platform for location access. Platform errors count as "not granted".
    pub async fn request_permission(&self) -> bool {
        match self.provider.request_permission().await {
            Ok(PermissionState::Granted) => true,
            Ok(PermissionState::Denied) => false,
            Err(e) => {
                error!("Error requesting location permissions {e:?}");
                false
            }
        }
    }

    /// Starts sampling. Calling it while already active changes nothing.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<StartOutcome, TrackingError> {
        if self.subscription.is_some() {
            debug!("Tracking is already active");
            return Ok(StartOutcome::AlreadyActive);
        }

        let Some(identity) = self.auth.current_identity() else {
            self.notify(Notification::AuthenticationRequired);
            return Err(TrackingError::Unauthenticated);
        };

        if !self.request_permission().await {
            self.notify(Notification::PermissionDenied);
            return Err(TrackingError::PermissionDenied);
        }

        // Inserts are spawned from platform callbacks, which may run on any thread.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let e = LocationError::NoRuntime;
            error!("Failed to start location tracking {e:?}");
            self.notify(Notification::TrackingFailed(e.to_string()));
            return Err(TrackingError::SubscriptionFailed(e));
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        // Reports may arrive before `watch` even returns.
        lock(&self.shared).active_generation = Some(generation);

        let callback = self.report_handler(identity, generation, runtime);
        let id = match self.provider.watch(self.options.clone(), callback) {
            Ok(id) => id,
            Err(e) => {
                lock(&self.shared).active_generation = None;
                error!("Failed to start location tracking {e:?}");
                self.notify(Notification::TrackingFailed(e.to_string()));
                return Err(TrackingError::SubscriptionFailed(e));
            }
        };

        self.subscription = Some(Subscription { id, generation });
        info!("Tracking started with {id}");
        self.notify(Notification::TrackingStarted);

        // Failures are already logged, history simply stays as it was.
        let _ = self.fetch_history().await;

        Ok(StartOutcome::Started)
    }

    /// Builds the callback handed to the platform for one subscription.
    fn report_handler(
        &self,
        identity: Identity,
        generation: u64,
        runtime: tokio::runtime::Handle,
    ) -> PositionCallback {
        let shared = self.shared.clone();
        let store = self.store.clone();
        let notifications = self.notifications.clone();

        Arc::new(move |report| {
            let mut state = lock(&shared);
            if state.active_generation != Some(generation) {
                debug!("Ignoring report of a cancelled subscription");
                return;
            }

            match report {
                Err(e) => {
                    drop(state);
                    let message = e.to_string();
                    warn!("{}", TrackingError::SampleError(e));
                    let _ = notifications.send(Notification::LocationError(message));
                }
                Ok(position) => {
                    let sample = LocationSample::from(position);
                    state.latest_sample = Some(sample.clone());
                    drop(state);
                    let _ = notifications.send(Notification::LocationUpdated(sample.clone()));

                    // Fire and forget, a slow write never holds back the next report.
                    let store = store.clone();
                    let identity = identity.clone();
                    runtime.spawn(async move {
                        match store.insert(&sample, &identity).await {
                            Ok(()) => debug!("Saved sample from {}", sample.timestamp),
                            Err(e) => error!("{}", TrackingError::PersistenceWriteFailure(e)),
                        }
                    });
                }
            }
        })
    }

    /// Stops sampling. The session ends up idle even when the platform refuses to cancel.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        self.release(subscription);
        info!("Tracking stopped");
        self.notify(Notification::TrackingStopped);
    }

    fn release(&self, subscription: Subscription) {
        {
            let mut state = lock(&self.shared);
            if state.active_generation == Some(subscription.generation) {
                state.active_generation = None;
            }
        }
        if let Err(e) = self.provider.clear_watch(subscription.id) {
            error!("{}", TrackingError::SubscriptionCancelFailure(e));
        }
    }

    /// Replaces history with the most recent samples of the signed in user. Without a user this
    /// does nothing. On failure history is left untouched.
    #[instrument(skip(self))]
    pub async fn fetch_history(&self) -> Result<(), TrackingError> {
        let Some(identity) = self.auth.current_identity() else {
            return Ok(());
        };

        match self.store.query_recent(&identity, HISTORY_LIMIT).await {
            Ok(mut samples) => {
                samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                samples.truncate(HISTORY_LIMIT);
                debug!("Fetched {} samples", samples.len());
                lock(&self.shared).history = samples;
                Ok(())
            }
            Err(e) => {
                let e = TrackingError::PersistenceReadFailure(e);
                error!("{e}");
                Err(e)
            }
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!("Releasing {} of a dropped session", subscription.id);
            self.release(subscription);
        }
    }
}
