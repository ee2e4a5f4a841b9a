use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs4::tokio::AsyncFileExt;
use futures::StreamExt;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::broadcast,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::auth::Identity;

use super::{
    entities::{ChangeNotification, LocationRecord, LocationSample, Profile, LOCATIONS_TABLE},
    ChangeStream, LocationStore, StoreError,
};

const RECORDS_FILE: &str = "user_locations.jsonl";
const PROFILES_FILE: &str = "profiles.json";

/// Local realization of [LocationStore]. Records are appended to a single JSON-lines file, one
/// row per line. Notifications only reach subscribers inside the same process.
pub struct JsonlStore {
    dir: PathBuf,
    changes: broadcast::Sender<ChangeNotification>,
}

impl JsonlStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        let (changes, _) = broadcast::channel(64);

        Ok(Self { dir, changes })
    }

    fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    async fn read_records(&self) -> Result<Vec<LocationRecord>, StoreError> {
        async fn extract(path: &Path) -> Result<Vec<LocationRecord>, std::io::Error> {
            debug!("Extracting {path:?}");
            let file = File::open(path).await?;
            file.lock_shared()?;
            let buffer = BufReader::new(file);
            let mut lines = buffer.lines();
            let mut records = vec![];
            while let Ok(Some(v)) = lines.next_line().await {
                if v.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LocationRecord>(&v) {
                    Ok(v) => records.push(v),
                    Err(e) => {
                        // A write cut short by a crash leaves a partial line behind.
                        warn!("During parsing in path {path:?} found illegal json string {v}: {e}")
                    }
                }
            }

            lines.into_inner().into_inner().unlock_async().await?;

            Ok(records)
        }

        match extract(&self.records_path()).await {
            Ok(records) => Ok(records),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }

    async fn append(&self, record: &LocationRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = File::options()
            .create(true)
            .append(true)
            .open(self.records_path())
            .await?;

        file.lock_exclusive()?;
        let result = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;
        file.unlock_async().await?;
        Ok(result?)
    }
}

#[async_trait]
impl LocationStore for JsonlStore {
    async fn insert(&self, sample: &LocationSample, identity: &Identity) -> Result<(), StoreError> {
        let record = LocationRecord::new(identity.user_id.clone(), sample);
        self.append(&record).await?;

        // Nobody listening is fine.
        let _ = self.changes.send(ChangeNotification {
            table: LOCATIONS_TABLE.into(),
            user_id: Some(record.user_id),
            timestamp: Some(record.timestamp),
        });
        Ok(())
    }

    async fn query_recent(
        &self,
        identity: &Identity,
        limit: usize,
    ) -> Result<Vec<LocationSample>, StoreError> {
        let mut records = self
            .read_records()
            .await?
            .into_iter()
            .filter(|v| v.user_id == identity.user_id)
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records
            .into_iter()
            .take(limit)
            .map(LocationSample::from)
            .collect())
    }

    async fn query_since(
        &self,
        _identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        let mut records = self
            .read_records()
            .await?
            .into_iter()
            .filter(|v| v.timestamp >= since)
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Profiles come from `profiles.json` when it exists. Otherwise every user with at least one
    /// record is listed by id.
    async fn list_profiles(&self, _identity: &Identity) -> Result<Vec<Profile>, StoreError> {
        match tokio::fs::read(self.dir.join(PROFILES_FILE)).await {
            Ok(content) => return Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut ids = self
            .read_records()
            .await?
            .into_iter()
            .map(|v| v.user_id)
            .collect::<Vec<Arc<str>>>();
        ids.sort();
        ids.dedup();
        Ok(ids
            .into_iter()
            .map(|id| Profile {
                id,
                full_name: None,
                email: None,
            })
            .collect())
    }

    async fn subscribe_to_inserts(
        &self,
        table: &str,
        _identity: &Identity,
    ) -> Result<ChangeStream, StoreError> {
        if table != LOCATIONS_TABLE {
            return Err(StoreError::UnknownTable(table.into()));
        }
        let stream = BroadcastStream::new(self.changes.subscribe()).filter_map(|v| async move {
            // Lagging receivers only lose notifications, the next one still triggers a resync.
            v.inspect_err(|e| warn!("Change notifications lagged {e}")).ok()
        });
        Ok(stream.boxed())
    }
}
