//!  Persistence of location samples. Everything goes through [LocationStore]:
//!   - [rest::RestStore] talks to the hosted backend over its REST interface.
//!   - [jsonl::JsonlStore] keeps records in a local JSON-lines file for offline use.
//!
//!  Both stores speak the `user_locations` row shape from [entities::LocationRecord].

pub mod entities;
pub mod jsonl;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::auth::Identity;

use self::entities::{ChangeNotification, LocationRecord, LocationSample, Profile};

pub type ChangeStream = BoxStream<'static, ChangeNotification>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request to the backend failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("local store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("table {0} can't be watched")]
    UnknownTable(String),
}

/// Contract of the store of record. Ordering and durability are entirely the store's business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn insert(&self, sample: &LocationSample, identity: &Identity) -> Result<(), StoreError>;

    /// Up to `limit` most recent samples of `identity`, newest first.
    async fn query_recent(
        &self,
        identity: &Identity,
        limit: usize,
    ) -> Result<Vec<LocationSample>, StoreError>;

    /// Rows of every user with `timestamp >= since`, newest first. Visibility of other users'
    /// rows is decided by the store.
    async fn query_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationRecord>, StoreError>;

    async fn list_profiles(&self, identity: &Identity) -> Result<Vec<Profile>, StoreError>;

    /// Stream of notifications for rows inserted into `table` after the call.
    async fn subscribe_to_inserts(
        &self,
        table: &str,
        identity: &Identity,
    ) -> Result<ChangeStream, StoreError>;
}
