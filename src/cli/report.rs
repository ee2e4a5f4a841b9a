use std::fmt::Write;

use anyhow::Result;
use ansi_term::{Colour, Style};
use chrono::{DateTime, Local, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    analysis::{
        dashboard::{Dashboard, DashboardSnapshot},
        distinct_locations_on, time_spent_on,
    },
    auth::Identity,
    store::{entities::LocationSample, LocationStore, StoreError},
    tracker::{shutdown::detect_shutdown, TrackingError, HISTORY_LIMIT},
    utils::{
        clock::DefaultClock,
        time::{format_ago, format_span, start_of_day},
    },
};

use super::backend::Backend;

fn render_sample(sample: &LocationSample, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "{:>11.6} {:>11.6}  ±{:<5.0}",
        sample.latitude, sample.longitude, sample.accuracy
    );
    if let Some(name) = sample.location_name.as_deref().or(sample.address.as_deref()) {
        let _ = write!(line, " {name}");
    }
    let _ = write!(line, "  {}", format_ago(sample.timestamp, now));
    line
}

pub fn render_history(samples: &[LocationSample], now: DateTime<Utc>) -> String {
    if samples.is_empty() {
        return "No locations recorded yet".into();
    }
    samples
        .iter()
        .map(|v| render_sample(v, now))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_today<Tz: TimeZone>(samples: &[LocationSample], now: DateTime<Utc>, tz: &Tz) -> String {
    let today = now.with_timezone(tz).date_naive();
    format!(
        "Time spent today: {}\nLocations visited: {}",
        format_span(time_spent_on(samples, today, tz)),
        distinct_locations_on(samples, today, tz)
    )
}

pub fn render_dashboard(snapshot: &DashboardSnapshot) -> String {
    let mut output = String::new();
    let stats = &snapshot.stats;
    let _ = writeln!(
        output,
        "{}  active users: {}  locations today: {}  average time: {}",
        Style::new().bold().paint("Dashboard"),
        stats.active_users,
        stats.total_locations,
        format_span(stats.average_time)
    );

    if snapshot.users.is_empty() {
        let _ = write!(output, "No users yet");
        return output;
    }

    for user in &snapshot.users {
        let status = if user.is_active {
            Colour::Green.paint("active ")
        } else {
            Colour::Fixed(244).paint("offline")
        };
        let last_active = user
            .last_active()
            .map(|v| format_ago(v, snapshot.taken_at))
            .unwrap_or_else(|| "never".into());
        let position = user
            .latest
            .as_ref()
            .map(|v| format!("{:.4}, {:.4}", v.latitude, v.longitude))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "{status} {:<24} {:<28} {:>12}  {:>11}  {:>2} places  {position}",
            user.profile.display_name(),
            user.profile.email.as_deref().unwrap_or(""),
            last_active,
            format_span(user.time_spent),
            user.locations,
        );
    }
    output.truncate(output.trim_end().len());
    output
}

async fn recent_samples(backend: &Backend) -> Result<Vec<LocationSample>> {
    let identity = backend.identity()?;
    let mut samples = backend
        .store
        .query_recent(&identity, HISTORY_LIMIT)
        .await
        .map_err(TrackingError::PersistenceReadFailure)?;
    samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(samples)
}

pub async fn process_history_command(backend: &Backend) -> Result<()> {
    let samples = recent_samples(backend).await?;
    println!("{}", render_history(&samples, Utc::now()));
    Ok(())
}

/// Every sample `identity` took today. Unlike history this isn't capped, so the day's span stays
/// the same one the dashboard shows.
pub async fn todays_samples<Tz: TimeZone>(
    store: &dyn LocationStore,
    identity: &Identity,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<Vec<LocationSample>, StoreError> {
    let since = start_of_day(now, tz);
    Ok(store
        .query_since(identity, since)
        .await?
        .into_iter()
        .filter(|v| v.user_id == identity.user_id)
        .map(LocationSample::from)
        .collect())
}

pub async fn process_today_command(backend: &Backend) -> Result<()> {
    let identity = backend.identity()?;
    let now = Utc::now();
    let samples = todays_samples(backend.store.as_ref(), &identity, now, &Local)
        .await
        .map_err(TrackingError::PersistenceReadFailure)?;
    println!("{}", render_today(&samples, now, &Local));
    Ok(())
}

pub async fn process_dashboard_command(backend: &Backend, watch: bool) -> Result<()> {
    let dashboard = Dashboard::new(
        backend.store.clone(),
        backend.auth.clone(),
        Box::new(DefaultClock),
        Local,
    );

    if !watch {
        println!("{}", render_dashboard(&dashboard.snapshot().await?));
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let (_, watched) = tokio::join!(
        detect_shutdown(shutdown.clone()),
        async {
            let result = dashboard
                .watch(shutdown.clone(), |snapshot| {
                    println!("{}\n", render_dashboard(snapshot));
                })
                .await;
            // Let ctrl-c detection finish when watching ends on its own.
            shutdown.cancel();
            result
        }
    );
    watched
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::{
        analysis::dashboard::summarize,
        auth::Identity,
        store::{
            entities::{LocationRecord, LocationSample, Profile},
            jsonl::JsonlStore,
            LocationStore,
        },
        tracker::HISTORY_LIMIT,
    };

    use super::{render_dashboard, render_history, render_today, todays_samples};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap()
    }

    fn sample(minutes_ago: i64, latitude: f64) -> LocationSample {
        LocationSample {
            latitude,
            longitude: -74.006,
            accuracy: 12.,
            timestamp: now() - Duration::minutes(minutes_ago),
            location_name: None,
            address: None,
        }
    }

    #[test]
    fn test_render_history() {
        assert_eq!(render_history(&[], now()), "No locations recorded yet");

        let mut named = sample(120, 40.7128);
        named.location_name = Some("Office".into());
        let output = render_history(&[sample(2, 40.7128), named], now());
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("40.712800"));
        assert!(lines[0].ends_with("2 min ago"));
        assert!(lines[1].contains("Office"));
        assert!(lines[1].ends_with("2 hours ago"));
    }

    #[test]
    fn test_render_today() {
        let samples = [sample(180, 40.713), sample(140, 40.758), sample(105, 40.748)];
        assert_eq!(
            render_today(&samples, now(), &Utc),
            "Time spent today: 1h 15m\nLocations visited: 3"
        );
        assert_eq!(
            render_today(&[], now(), &Utc),
            "Time spent today: 0 minutes\nLocations visited: 0"
        );
    }

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.into(),
            access_token: String::new(),
            email: None,
        }
    }

    #[tokio::test]
    async fn test_today_covers_more_than_history() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonlStore::new(dir.path().to_owned())?;
        let me = identity("local");

        // 07:00 to 11:55 every five minutes, more samples than history keeps.
        for minutes_ago in (5..=300).step_by(5) {
            store.insert(&sample(minutes_ago, 40.7128), &me).await?;
        }
        store.insert(&sample(13 * 60, 40.7128), &me).await?;
        store.insert(&sample(1, 51.5074), &identity("other")).await?;

        let samples = todays_samples(&store, &me, now(), &Utc).await?;

        assert_eq!(samples.len(), 60);
        assert!(samples.len() > HISTORY_LIMIT);
        assert_eq!(
            render_today(&samples, now(), &Utc),
            "Time spent today: 4h 55m\nLocations visited: 1"
        );
        Ok(())
    }

    #[test]
    fn test_render_dashboard() {
        let snapshot = summarize(
            vec![
                Profile {
                    id: "sarah".into(),
                    full_name: Some("Sarah Johnson".into()),
                    email: Some("sarah@company.com".into()),
                },
                Profile {
                    id: "mike".into(),
                    full_name: Some("Mike Chen".into()),
                    email: None,
                },
            ],
            vec![LocationRecord::new("sarah".into(), &sample(2, 40.7128))],
            now(),
            &Utc,
        );

        let output = render_dashboard(&snapshot);
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("active users: 1"));
        assert!(lines[1].contains("Sarah Johnson"));
        assert!(lines[1].contains("2 min ago"));
        assert!(lines[2].contains("Mike Chen"));
        assert!(lines[2].contains("never"));
    }
}
