use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    auth::AuthProvider,
    store::{
        entities::{LocationRecord, LocationSample, Profile, LOCATIONS_TABLE},
        LocationStore,
    },
    tracker::error::TrackingError,
    utils::{
        clock::Clock,
        time::{is_on_date, start_of_day},
    },
};

use super::{distinct_locations_on, location_cell, time_spent_on};

/// A user counts as active while their latest sample is younger than this.
pub const ACTIVE_WINDOW: Duration = Duration::minutes(10);

#[derive(Debug, Clone, PartialEq)]
pub struct UserActivity {
    pub profile: Profile,
    pub latest: Option<LocationSample>,
    pub time_spent: Duration,
    pub locations: usize,
    pub is_active: bool,
}

impl UserActivity {
    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        self.latest.as_ref().map(|v| v.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats {
    pub active_users: usize,
    /// Distinct ~100 m cells visited today across every user.
    pub total_locations: usize,
    /// Average time spent among users that have samples today.
    pub average_time: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSnapshot {
    pub users: Vec<UserActivity>,
    pub stats: DashboardStats,
    pub taken_at: DateTime<Utc>,
}

/// Builds the dashboard out of every profile and today's rows. Users that have rows but no
/// profile are listed by id.
pub fn summarize<Tz: TimeZone>(
    profiles: Vec<Profile>,
    records: Vec<LocationRecord>,
    now: DateTime<Utc>,
    tz: &Tz,
) -> DashboardSnapshot {
    let today = now.with_timezone(tz).date_naive();

    let mut by_user = HashMap::<Arc<str>, Vec<LocationSample>>::new();
    for record in records {
        by_user
            .entry(record.user_id.clone())
            .or_default()
            .push(record.into());
    }

    let mut cells = by_user
        .values()
        .flatten()
        .filter(|v| is_on_date(v.timestamp, today, tz))
        .map(|v| location_cell(v.latitude, v.longitude))
        .collect::<Vec<_>>();
    cells.sort_unstable();
    cells.dedup();

    let mut profiles = profiles;
    for user_id in by_user.keys() {
        if !profiles.iter().any(|v| &v.id == user_id) {
            profiles.push(Profile {
                id: user_id.clone(),
                full_name: None,
                email: None,
            });
        }
    }

    let mut users = profiles
        .into_iter()
        .map(|profile| {
            let mut samples = by_user.remove(&profile.id).unwrap_or_default();
            samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            let time_spent = time_spent_on(&samples, today, tz);
            let locations = distinct_locations_on(&samples, today, tz);
            let latest = samples.into_iter().next();
            let is_active = latest
                .as_ref()
                .is_some_and(|v| now - v.timestamp < ACTIVE_WINDOW);
            UserActivity {
                profile,
                latest,
                time_spent,
                locations,
                is_active,
            }
        })
        .collect::<Vec<_>>();

    users.sort_by(|a, b| {
        b.is_active
            .cmp(&a.is_active)
            .then_with(|| b.last_active().cmp(&a.last_active()))
            .then_with(|| a.profile.display_name().cmp(b.profile.display_name()))
    });

    let tracked = users.iter().filter(|v| v.latest.is_some()).collect::<Vec<_>>();
    let average_time = if tracked.is_empty() {
        Duration::zero()
    } else {
        tracked.iter().map(|v| v.time_spent).sum::<Duration>() / tracked.len() as i32
    };

    DashboardSnapshot {
        stats: DashboardStats {
            active_users: users.iter().filter(|v| v.is_active).count(),
            total_locations: cells.len(),
            average_time,
        },
        users,
        taken_at: now,
    }
}

/// Admin view over every user. Each change notification triggers a full resync rather than a
/// merge, which is fine for the data volumes involved.
pub struct Dashboard<Tz> {
    store: Arc<dyn LocationStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Box<dyn Clock>,
    tz: Tz,
}

impl<Tz: TimeZone> Dashboard<Tz> {
    pub fn new(
        store: Arc<dyn LocationStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Box<dyn Clock>,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            auth,
            clock,
            tz,
        }
    }

    pub async fn snapshot(&self) -> Result<DashboardSnapshot> {
        let identity = self
            .auth
            .current_identity()
            .ok_or(TrackingError::Unauthenticated)?;
        let now = self.clock.time();
        let since = start_of_day(now, &self.tz);

        let profiles = self
            .store
            .list_profiles(&identity)
            .await
            .map_err(TrackingError::PersistenceReadFailure)?;
        let records = self
            .store
            .query_since(&identity, since)
            .await
            .map_err(TrackingError::PersistenceReadFailure)?;
        debug!("Dashboard resync with {} profiles and {} rows", profiles.len(), records.len());

        Ok(summarize(profiles, records, now, &self.tz))
    }

    /// Renders a snapshot right away and again after every inserted row, until `shutdown`.
    pub async fn watch(
        &self,
        shutdown: CancellationToken,
        mut render: impl FnMut(&DashboardSnapshot),
    ) -> Result<()> {
        let identity = self
            .auth
            .current_identity()
            .ok_or(TrackingError::Unauthenticated)?;
        let mut changes = self
            .store
            .subscribe_to_inserts(LOCATIONS_TABLE, &identity)
            .await
            .map_err(TrackingError::PersistenceReadFailure)?;

        render(&self.snapshot().await?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                change = changes.next() => {
                    let Some(change) = change else {
                        info!("Change notifications ended");
                        return Ok(());
                    };
                    debug!("Resyncing dashboard after {change:?}");
                    match self.snapshot().await {
                        Ok(snapshot) => render(&snapshot),
                        Err(e) => error!("Dashboard resync failed {e:?}"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        auth::{Identity, MockAuthProvider, StaticAuth},
        store::{
            entities::{LocationRecord, LocationSample, Profile},
            jsonl::JsonlStore,
            LocationStore,
        },
        utils::{clock::test_clock::FixedClock, logging::TEST_LOGGING},
    };

    use super::{summarize, Dashboard};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap()
    }

    fn record(user_id: &str, minutes_ago: i64, latitude: f64) -> LocationRecord {
        LocationRecord {
            user_id: user_id.into(),
            latitude,
            longitude: 10.,
            accuracy: None,
            location_name: None,
            address: None,
            timestamp: now() - Duration::minutes(minutes_ago),
        }
    }

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.into(),
            full_name: Some(name.into()),
            email: None,
        }
    }

    #[test]
    fn test_summarize() {
        let profiles = vec![
            profile("emma", "Emma Davis"),
            profile("sarah", "Sarah Johnson"),
            profile("mike", "Mike Chen"),
        ];
        let records = vec![
            record("sarah", 2, 1.),
            record("sarah", 137, 1.),
            record("emma", 60, 2.),
            record("emma", 120, 2.),
            record("alex", 5, 1.),
        ];

        let snapshot = summarize(profiles, records, now(), &Utc);

        let names = snapshot
            .users
            .iter()
            .map(|v| v.profile.display_name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Sarah Johnson", "alex", "Emma Davis", "Mike Chen"]);

        let sarah = &snapshot.users[0];
        assert!(sarah.is_active);
        assert_eq!(sarah.time_spent, Duration::minutes(135));
        assert_eq!(sarah.last_active(), Some(now() - Duration::minutes(2)));

        let emma = &snapshot.users[2];
        assert!(!emma.is_active);
        assert_eq!(emma.locations, 1);

        let mike = &snapshot.users[3];
        assert!(mike.latest.is_none());
        assert_eq!(mike.time_spent, Duration::zero());

        assert_eq!(snapshot.stats.active_users, 2);
        // Sarah and alex share a cell.
        assert_eq!(snapshot.stats.total_locations, 2);
        // (135 + 60 + 0) / 3 tracked users.
        assert_eq!(snapshot.stats.average_time, Duration::minutes(65));
    }

    #[tokio::test]
    async fn test_snapshot_requires_identity() {
        let mut auth = MockAuthProvider::new();
        auth.expect_current_identity().returning(|| None);
        let dir = tempdir().unwrap();
        let dashboard = Dashboard::new(
            Arc::new(JsonlStore::new(dir.path().to_owned()).unwrap()),
            Arc::new(auth),
            Box::new(FixedClock(now())),
            Utc,
        );
        assert!(dashboard.snapshot().await.is_err());
    }

    #[tokio::test]
    async fn test_watch_resyncs_on_insert() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let store = Arc::new(JsonlStore::new(dir.path().to_owned())?);
        let admin = StaticAuth::offline("admin");
        let dashboard = Dashboard::new(
            store.clone(),
            Arc::new(admin),
            Box::new(FixedClock(now())),
            Utc,
        );

        let shutdown = CancellationToken::new();
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();

        let writer = async {
            // First render comes from the initial sync.
            let first = receiver.recv().await.expect("initial snapshot");
            let user = Identity {
                user_id: "sarah".into(),
                access_token: String::new(),
                email: None,
            };
            store
                .insert(
                    &LocationSample::from(record("sarah", 1, 1.)),
                    &user,
                )
                .await?;
            let second = receiver.recv().await.expect("resynced snapshot");
            shutdown.cancel();
            Ok::<_, anyhow::Error>((first, second))
        };

        let (watched, written) = tokio::join!(
            dashboard.watch(shutdown.clone(), |snapshot| {
                let _ = sender.send(snapshot.clone());
            }),
            writer
        );
        watched?;
        let (first, second) = written?;

        assert!(first.users.is_empty());
        assert_eq!(second.users.len(), 1);
        assert_eq!(second.stats.active_users, 1);
        Ok(())
    }
}
