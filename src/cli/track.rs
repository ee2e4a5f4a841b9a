use std::sync::Arc;

use anyhow::Result;
use ansi_term::{Colour, Style};
use chrono::Local;
use clap::Parser;
use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    config::AppConfig,
    location_api::GenericLocationProvider,
    store::entities::LOCATIONS_TABLE,
    tracker::{shutdown::detect_shutdown, Notification, TrackingSession},
    utils::{clock::DefaultClock, time::format_span},
};

use super::backend::Backend;

#[derive(Debug, Parser)]
pub struct TrackCommand {
    #[arg(long, help = "Don't use a local gpsd daemon")]
    pub no_gpsd: bool,
    #[arg(long, help = "Don't fall back to network based location")]
    pub no_network: bool,
}

/// One notification as a terminal line. Failures are painted red.
pub fn render_notification(notification: &Notification) -> String {
    let title = if notification.is_destructive() {
        Colour::Red.bold().paint(notification.title())
    } else {
        Style::new().bold().paint(notification.title())
    };
    format!("{title}: {}", notification.description())
}

fn render_progress(session: &TrackingSession) -> String {
    format!(
        "Time spent today: {}, locations visited: {}",
        format_span(session.time_spent_today(&Local)),
        session.distinct_locations_today(&Local)
    )
}

/// Mounts a tracking session for as long as the user doesn't press ctrl-c.
pub async fn process_track_command(
    backend: &Backend,
    config: &AppConfig,
    TrackCommand {
        no_gpsd,
        no_network,
    }: TrackCommand,
) -> Result<()> {
    let mut location = config.location.clone();
    location.use_gpsd &= !no_gpsd;
    location.use_network &= !no_network;
    let provider = GenericLocationProvider::from_config(&location)?;

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let mut session = TrackingSession::new(
        Arc::new(provider),
        backend.store.clone(),
        backend.auth.clone(),
        sender,
        Box::new(DefaultClock),
    );

    let started = session.start().await;
    while let Ok(notification) = receiver.try_recv() {
        println!("{}", render_notification(&notification));
    }
    started?;

    // Remote writes, including our own, refresh history the way a push from the backend would.
    let mut changes = match backend.identity() {
        Ok(identity) => match backend
            .store
            .subscribe_to_inserts(LOCATIONS_TABLE, &identity)
            .await
        {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Live history updates are unavailable {e}");
                stream::pending().boxed()
            }
        },
        Err(_) => stream::pending().boxed(),
    };

    let shutdown = CancellationToken::new();
    let printer = async {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                notification = receiver.recv() => match notification {
                    Some(notification) => println!("{}", render_notification(&notification)),
                    None => return,
                },
                Some(_) = changes.next() => {
                    if session.fetch_history().await.is_ok() {
                        println!("{}", render_progress(&session));
                    }
                }
            }
        }
    };
    tokio::join!(detect_shutdown(shutdown.clone()), printer);

    session.stop();
    while let Ok(notification) = receiver.try_recv() {
        println!("{}", render_notification(&notification));
    }

    if let Err(e) = session.fetch_history().await {
        error!("Couldn't summarize the day {e}");
        return Ok(());
    }
    println!("{}", render_progress(&session));
    Ok(())
}
