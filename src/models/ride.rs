// src/models/ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::RiderError;
use crate::utils::lenient::{f64_lenient, null_as_default, opt_f64_lenient};

/// Lifecycle of a ride. COMPLETED and CANCELLED are terminal.
///
/// The live channel has historically pushed lower-case names
/// (`pending`, `accepted`, `started`), so those are accepted as aliases.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    #[serde(alias = "requested", alias = "pending")]
    Requested,
    #[serde(alias = "assigned", alias = "accepted")]
    Assigned,
    #[serde(alias = "in_progress", alias = "started")]
    InProgress,
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "cancelled", alias = "canceled", alias = "CANCELED")]
    Cancelled,
}

impl RideStatus {
    pub const ALL: [RideStatus; 5] = [
        RideStatus::Requested,
        RideStatus::Assigned,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::Assigned => "ASSIGNED",
            RideStatus::InProgress => "IN_PROGRESS",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Forward moves the server is expected to make. The view does not
    /// enforce these; it adopts whatever the server reports.
    pub fn valid_transitions(&self) -> &'static [RideStatus] {
        match self {
            RideStatus::Requested => &[RideStatus::Assigned, RideStatus::Cancelled],
            RideStatus::Assigned => &[RideStatus::InProgress],
            RideStatus::InProgress => &[RideStatus::Completed],
            RideStatus::Completed | RideStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Banner text for the tracking screen.
    pub fn status_message(&self) -> &'static str {
        match self {
            RideStatus::Requested => "Finding a driver nearby...",
            RideStatus::Assigned => "Driver is on the way",
            RideStatus::InProgress => "Ride in progress",
            RideStatus::Completed => "Ride completed!",
            RideStatus::Cancelled => "Ride cancelled",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = RiderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requested" | "pending" => Ok(RideStatus::Requested),
            "assigned" | "accepted" => Ok(RideStatus::Assigned),
            "in_progress" | "in-progress" | "started" => Ok(RideStatus::InProgress),
            "completed" => Ok(RideStatus::Completed),
            "cancelled" | "canceled" => Ok(RideStatus::Cancelled),
            other => Err(RiderError::InvalidRideStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RiderSummary {
    pub id: String,
    pub full_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phone_number: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverSummary {
    pub id: String,
    pub full_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phone_number: String,
    #[serde(default)]
    pub bike_plate: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideStatusLog {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub from_status: String,
    pub to_status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub changed_by_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

/// Server-side record of one ride, as returned by `GET /rides/{id}/`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Ride {
    pub id: String,
    #[serde(default)]
    pub rider: Option<RiderSummary>,
    #[serde(default)]
    pub driver: Option<DriverSummary>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub pickup_address: String,
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub pickup_lat: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub pickup_lng: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dropoff_address: String,
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub dropoff_lat: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub dropoff_lng: Option<f64>,

    /// Ordered [lat, lng] pairs, when the backend has routed the trip.
    #[serde(default, deserialize_with = "null_as_default")]
    pub route_geometry: Vec<[f64; 2]>,
    /// Seconds.
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub estimated_duration: Option<f64>,

    #[serde(default, deserialize_with = "f64_lenient")]
    pub price: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price_display: String,
    pub status: RideStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rider_notes: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cancellation_reason: String,

    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub status_logs: Vec<RideStatusLog>,
}

impl Ride {
    pub fn pickup(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.pickup_lat?, self.pickup_lng?))
    }

    pub fn dropoff(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.dropoff_lat?, self.dropoff_lng?))
    }

    pub fn route(&self) -> Vec<Coordinates> {
        self.route_geometry
            .iter()
            .map(|[lat, lng]| Coordinates::new(*lat, *lng))
            .collect()
    }

    /// Fare as the backend formats it, falling back to the raw amount.
    pub fn fare_display(&self) -> String {
        if self.price_display.is_empty() {
            format!("GHS {:.2}", self.price)
        } else {
            self.price_display.clone()
        }
    }

    pub fn eta_minutes(&self) -> Option<i64> {
        self.estimated_duration.map(|secs| (secs / 60.0).round() as i64)
    }
}

/// `GET /rides/{id}/` answers either with the bare ride or wrapped in
/// `{success, ride}` depending on the backend version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RideEnvelope {
    Wrapped {
        #[serde(default)]
        success: Option<bool>,
        ride: Ride,
    },
    Bare(Ride),
}

impl RideEnvelope {
    pub fn into_ride(self) -> Ride {
        match self {
            RideEnvelope::Wrapped { ride, .. } | RideEnvelope::Bare(ride) => ride,
        }
    }
}

/// Body of `request/` and `cancel/` responses.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideActionResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    pub ride: Ride,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ShareResponse {
    pub share_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SosResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelRideRequest {
    pub cancellation_reason: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RideRequest {
    pub pickup_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_lng: Option<f64>,
    pub dropoff_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropoff_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropoff_lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rider_notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Paginated<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "id": "ride-42",
        "rider": {"id": "u1", "full_name": "Ama Mensah", "phone_number": "+233200000001"},
        "driver": null,
        "pickup_address": "Accra Mall",
        "pickup_lat": "5.622300",
        "pickup_lng": "-0.173200",
        "dropoff_address": "Osu Oxford Street",
        "dropoff_lat": null,
        "dropoff_lng": null,
        "price": "25.00",
        "price_display": "GHS 25.00",
        "status": "REQUESTED",
        "rider_notes": "",
        "cancellation_reason": null,
        "assigned_at": null,
        "created_at": "2025-01-10T08:00:00Z",
        "updated_at": "2025-01-10T08:00:00.123456+00:00",
        "status_logs": [
            {"id": "l1", "from_status": "", "to_status": "REQUESTED",
             "changed_by_name": "Ama Mensah", "note": "", "timestamp": "2025-01-10T08:00:00Z"}
        ]
    }"#;

    #[test]
    fn test_snapshot_parsing() {
        let ride: Ride = serde_json::from_str(SNAPSHOT).unwrap();
        assert_eq!(ride.status, RideStatus::Requested);
        assert_eq!(ride.price, 25.0);
        assert_eq!(ride.pickup(), Some(Coordinates::new(5.6223, -0.1732)));
        assert_eq!(ride.dropoff(), None);
        assert!(ride.driver.is_none());
        assert_eq!(ride.status_logs.len(), 1);
        assert_eq!(ride.fare_display(), "GHS 25.00");
    }

    #[test]
    fn test_envelope_accepts_both_shapes() {
        let bare: RideEnvelope = serde_json::from_str(SNAPSHOT).unwrap();
        assert_eq!(bare.into_ride().id, "ride-42");

        let wrapped = format!(r#"{{"success": true, "ride": {}}}"#, SNAPSHOT);
        let wrapped: RideEnvelope = serde_json::from_str(&wrapped).unwrap();
        assert_eq!(wrapped.into_ride().id, "ride-42");
    }

    #[test]
    fn test_status_aliases() {
        let parsed: Vec<RideStatus> =
            serde_json::from_str(r#"["pending", "accepted", "started", "completed", "cancelled", "IN_PROGRESS"]"#)
                .unwrap();
        assert_eq!(
            parsed,
            vec![
                RideStatus::Requested,
                RideStatus::Assigned,
                RideStatus::InProgress,
                RideStatus::Completed,
                RideStatus::Cancelled,
                RideStatus::InProgress,
            ]
        );
        assert_eq!("Accepted".parse::<RideStatus>().unwrap(), RideStatus::Assigned);
        assert!("teleported".parse::<RideStatus>().is_err());
        assert_eq!(serde_json::to_string(&RideStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
    }

    #[test]
    fn test_transitions() {
        assert!(RideStatus::Requested.can_transition_to(RideStatus::Cancelled));
        assert!(!RideStatus::Assigned.can_transition_to(RideStatus::Cancelled));
        for status in RideStatus::ALL {
            assert_eq!(status.is_terminal(), status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_eta_rounding() {
        let mut ride: Ride = serde_json::from_str(SNAPSHOT).unwrap();
        assert_eq!(ride.eta_minutes(), None);
        ride.estimated_duration = Some(450.0);
        assert_eq!(ride.eta_minutes(), Some(8));
    }
}
