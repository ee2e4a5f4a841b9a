use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the table samples are written into.
pub const LOCATIONS_TABLE: &str = "user_locations";

/// One reported device position, as the tracker keeps it in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters. Platforms that don't report it produce 0.
    pub accuracy: f64,
    /// Moment the platform produced the sample, not when it was persisted.
    pub timestamp: DateTime<Utc>,
    pub location_name: Option<String>,
    pub address: Option<String>,
}

/// Row shape of the `user_locations` table. Column names must match the backend schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub user_id: Arc<str>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LocationRecord {
    pub fn new(user_id: Arc<str>, sample: &LocationSample) -> Self {
        Self {
            user_id,
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: Some(sample.accuracy),
            location_name: sample.location_name.clone(),
            address: sample.address.clone(),
            timestamp: sample.timestamp,
        }
    }
}

impl From<LocationRecord> for LocationSample {
    fn from(
        LocationRecord {
            latitude,
            longitude,
            accuracy,
            location_name,
            address,
            timestamp,
            ..
        }: LocationRecord,
    ) -> Self {
        LocationSample {
            latitude,
            longitude,
            accuracy: accuracy.unwrap_or(0.),
            timestamp,
            location_name,
            address,
        }
    }
}

/// User profile as listed on the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Arc<str>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Pushed by the store whenever a row lands in a watched table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub table: Arc<str>,
    pub user_id: Option<Arc<str>>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{LocationRecord, LocationSample};

    #[test]
    fn test_record_matches_table_columns() {
        let sample = LocationSample {
            latitude: 55.676,
            longitude: 12.568,
            accuracy: 8.5,
            timestamp: Utc.with_ymd_and_hms(2024, 12, 31, 9, 0, 0).unwrap(),
            location_name: None,
            address: Some("Main Street 1".into()),
        };

        let value = serde_json::to_value(LocationRecord::new("user-1".into(), &sample)).unwrap();

        assert_eq!(
            value,
            json!({
                "user_id": "user-1",
                "latitude": 55.676,
                "longitude": 12.568,
                "accuracy": 8.5,
                "location_name": null,
                "address": "Main Street 1",
                "timestamp": "2024-12-31T09:00:00Z",
            })
        );
    }

    #[test]
    fn test_row_with_extra_columns_and_null_accuracy() {
        let record: LocationRecord = serde_json::from_value(json!({
            "id": "4b1c",
            "created_at": "2024-12-31T09:00:01.12+00:00",
            "user_id": "user-1",
            "latitude": -33.87,
            "longitude": 151.21,
            "accuracy": null,
            "location_name": "Home Office",
            "address": null,
            "timestamp": "2024-12-31T09:00:00+00:00",
        }))
        .unwrap();

        let sample = LocationSample::from(record);
        assert_eq!(sample.accuracy, 0.);
        assert_eq!(sample.location_name.as_deref(), Some("Home Office"));
        assert_eq!(
            sample.timestamp,
            Utc.with_ymd_and_hms(2024, 12, 31, 9, 0, 0).unwrap()
        );
    }
}
