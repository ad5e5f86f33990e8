// src/models/live.rs
// Frames pushed on /ws/rides/{id}/. Every frame is a JSON object tagged by `type`.
use serde::{Deserialize, Serialize};

use crate::models::ride::{Coordinates, RideStatus};
use crate::utils::lenient::{f64_lenient, opt_f64_lenient};

/// Health of the live channel as the consumer sees it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never opened (no ride id) or not yet started.
    Disconnected,
    /// `attempt` 0 is the first connect; 1..=max are reconnects.
    Connecting { attempt: u32 },
    Connected,
    /// Reconnect budget spent. Live data is stale from here on.
    GivingUp,
    /// Closed on purpose, by a terminal status or by the consumer.
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// No further transitions will happen.
    pub fn is_final(&self) -> bool {
        matches!(self, ConnectionState::GivingUp | ConnectionState::Closed)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LiveLocation {
    #[serde(deserialize_with = "f64_lenient")]
    pub latitude: f64,
    #[serde(deserialize_with = "f64_lenient")]
    pub longitude: f64,
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub heading: Option<f64>, // degrees from north
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub speed: Option<f64>,   // km/h
}

impl LiveLocation {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, heading: None, speed: None }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideInitData {
    pub status: RideStatus,
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub driver_latitude: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64_lenient")]
    pub driver_longitude: Option<f64>,
}

impl RideInitData {
    pub fn driver_location(&self) -> Option<LiveLocation> {
        Some(LiveLocation::at(self.driver_latitude?, self.driver_longitude?))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    RideInit { data: RideInitData },
    DriverLocationUpdate(LiveLocation),
    RideStatusUpdate { status: RideStatus },
    /// Anything the client does not understand yet.
    #[serde(other)]
    Unknown,
}
