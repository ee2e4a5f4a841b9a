use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::Identity;

use super::{
    entities::{ChangeNotification, LocationRecord, LocationSample, Profile, LOCATIONS_TABLE},
    ChangeStream, LocationStore, StoreError,
};

const PROFILES_TABLE: &str = "profiles";

/// [LocationStore] backed by the hosted backend's REST interface.
///
/// The backend has no change feed reachable over plain HTTP, so [LocationStore::subscribe_to_inserts]
/// polls the most recently inserted row of the table and emits a notification whenever it
/// changes. Rows are ordered by the server assigned `created_at`, device timestamps can go
/// backwards. Consumers treat every notification as "resync everything".
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: Arc<str>,
    anon_key: Arc<str>,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct NewestRow {
    /// Primary key. Its type depends on the schema, so it's only compared.
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    user_id: Option<Arc<str>>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl NewestRow {
    /// Identifies the insert, independent of the device clock.
    fn insert_key(&self) -> (serde_json::Value, Option<DateTime<Utc>>) {
        (self.id.clone(), self.created_at)
    }
}

impl RestStore {
    pub fn new(base_url: &str, anon_key: &str, poll_interval: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').into(),
            anon_key: anon_key.into(),
            poll_interval,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder, identity: &Identity) -> RequestBuilder {
        builder
            .header("apikey", &*self.anon_key)
            .bearer_auth(&identity.access_token)
    }

    async fn newest_row(&self, table: &str, identity: &Identity) -> Result<Option<NewestRow>, StoreError> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[
                ("select", "id,user_id,timestamp,created_at"),
                ("order", "created_at.desc"),
                ("limit", "1"),
            ]);
        let response = ensure_success(self.authorized(request, identity).send().await?).await?;
        let mut rows = response.json::<Vec<NewestRow>>().await?;
        Ok(rows.pop())
    }
}

/// Turns non 2xx answers into [StoreError::Rejected], keeping the body for the logs.
async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl LocationStore for RestStore {
    async fn insert(&self, sample: &LocationSample, identity: &Identity) -> Result<(), StoreError> {
        let record = LocationRecord::new(identity.user_id.clone(), sample);
        let request = self
            .client
            .post(self.table_url(LOCATIONS_TABLE))
            .header("Prefer", "return=minimal")
            .json(&record);
        ensure_success(self.authorized(request, identity).send().await?).await?;
        debug!("Inserted sample at {}", record.timestamp);
        Ok(())
    }

    async fn query_recent(
        &self,
        identity: &Identity,
        limit: usize,
    ) -> Result<Vec<LocationSample>, StoreError> {
        let request = self.client.get(self.table_url(LOCATIONS_TABLE)).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", identity.user_id)),
            ("order", "timestamp.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let response = ensure_success(self.authorized(request, identity).send().await?).await?;
        let records = response.json::<Vec<LocationRecord>>().await?;
        Ok(records.into_iter().map(LocationSample::from).collect())
    }

    async fn query_since(
        &self,
        identity: &Identity,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        let request = self.client.get(self.table_url(LOCATIONS_TABLE)).query(&[
            ("select", "*".to_string()),
            ("timestamp", format!("gte.{}", since.to_rfc3339())),
            ("order", "timestamp.desc".to_string()),
        ]);
        let response = ensure_success(self.authorized(request, identity).send().await?).await?;
        Ok(response.json::<Vec<LocationRecord>>().await?)
    }

    async fn list_profiles(&self, identity: &Identity) -> Result<Vec<Profile>, StoreError> {
        let request = self
            .client
            .get(self.table_url(PROFILES_TABLE))
            .query(&[("select", "id,full_name,email")]);
        let response = ensure_success(self.authorized(request, identity).send().await?).await?;
        Ok(response.json::<Vec<Profile>>().await?)
    }

    async fn subscribe_to_inserts(
        &self,
        table: &str,
        identity: &Identity,
    ) -> Result<ChangeStream, StoreError> {
        // First poll happens right away, a bad table or key fails the subscription.
        let baseline = self.newest_row(table, identity).await?.map(|v| v.insert_key());

        let state = (self.clone(), Arc::<str>::from(table), identity.clone(), baseline);
        let stream = stream::unfold(state, |(store, table, identity, mut last_seen)| async move {
            loop {
                tokio::time::sleep(store.poll_interval).await;
                match store.newest_row(&table, &identity).await {
                    Ok(Some(row)) if Some(row.insert_key()) != last_seen => {
                        last_seen = Some(row.insert_key());
                        let change = ChangeNotification {
                            table: table.clone(),
                            user_id: row.user_id,
                            timestamp: Some(row.timestamp),
                        };
                        return Some((change, (store, table, identity, last_seen)));
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Polling {table} for changes failed {e}"),
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use futures::StreamExt;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use crate::{
        auth::Identity,
        store::{LocationStore, StoreError},
    };

    use super::RestStore;

    fn identity() -> Identity {
        Identity {
            user_id: "user-1".into(),
            access_token: "token".into(),
            email: None,
        }
    }

    /// Answers every request with `status` and whatever `body` holds at that moment. Returns
    /// the base url and the request lines seen so far.
    async fn live_backend(
        status: &'static str,
        body: Arc<Mutex<String>>,
    ) -> Result<(String, Arc<Mutex<Vec<String>>>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(vec![]));
        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buffer = vec![0; 8192];
                let read = stream.read(&mut buffer).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buffer[..read]);
                if let Some(line) = request.lines().next() {
                    seen.lock().unwrap().push(line.to_string());
                }
                let body = body.lock().unwrap().clone();
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        Ok((format!("http://{address}/"), requests))
    }

    async fn canned_backend(status: &'static str, body: &'static str) -> Result<String> {
        let (url, _) = live_backend(status, Arc::new(Mutex::new(body.into()))).await?;
        Ok(url)
    }

    #[tokio::test]
    async fn test_query_recent_reads_rows() -> Result<()> {
        let url = canned_backend(
            "200 OK",
            r#"[{"id":"row-1","user_id":"user-1","latitude":40.7128,"longitude":-74.006,"accuracy":null,"location_name":"Office","address":null,"timestamp":"2024-12-31T09:00:00+00:00","created_at":"2024-12-31T09:00:01+00:00"}]"#,
        )
        .await?;
        let store = RestStore::new(&url, "anon", Duration::from_secs(5));

        let samples = store.query_recent(&identity(), 50).await?;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].accuracy, 0.);
        assert_eq!(samples[0].location_name.as_deref(), Some("Office"));
        assert_eq!(
            samples[0].timestamp,
            Utc.with_ymd_and_hms(2024, 12, 31, 9, 0, 0).unwrap()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_request_keeps_status_and_body() -> Result<()> {
        let url = canned_backend("401 Unauthorized", r#"{"message":"JWT expired"}"#).await?;
        let store = RestStore::new(&url, "anon", Duration::from_secs(5));

        let result = store.list_profiles(&identity()).await;
        assert!(matches!(
            result,
            Err(StoreError::Rejected { status: 401, body }) if body.contains("JWT expired")
        ));

        // Subscribing fails up front instead of handing out a silent stream.
        assert!(store
            .subscribe_to_inserts("user_locations", &identity())
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_with_older_device_time_is_noticed() -> Result<()> {
        let newest = Arc::new(Mutex::new(
            r#"[{"id":"row-a","user_id":"sarah","timestamp":"2024-12-31T12:00:10+00:00","created_at":"2024-12-31T12:00:11+00:00"}]"#
                .to_string(),
        ));
        let (url, requests) = live_backend("200 OK", newest.clone()).await?;
        let store = RestStore::new(&url, "anon", Duration::from_millis(20));

        let mut changes = store
            .subscribe_to_inserts("user_locations", &identity())
            .await?;

        // Nothing new yet, the baseline row must not be reported.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), changes.next())
                .await
                .is_err()
        );

        // A device running behind inserts a row stamped before the current newest one.
        *newest.lock().unwrap() =
            r#"[{"id":"row-b","user_id":"mike","timestamp":"2024-12-31T12:00:00+00:00","created_at":"2024-12-31T12:00:20+00:00"}]"#
                .to_string();

        let change = tokio::time::timeout(Duration::from_secs(5), changes.next())
            .await?
            .expect("change notification");
        assert_eq!(&*change.table, "user_locations");
        assert_eq!(change.user_id.as_deref(), Some("mike"));
        assert_eq!(
            change.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap())
        );

        let first = requests.lock().unwrap()[0].clone();
        assert!(first.contains("order=created_at.desc"), "{first}");
        Ok(())
    }
}
