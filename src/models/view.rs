// src/models/view.rs
// View model for the ride tracking screen and the rules derived from it.
use serde::Serialize;
use std::fmt;

use crate::models::live::{ConnectionState, LiveLocation};
use crate::models::ride::{Coordinates, Ride, RideStatus};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideAction {
    Cancel,
    Share,
    Sos,
    ReturnToDashboard,
}

impl RideAction {
    pub fn label(&self) -> &'static str {
        match self {
            RideAction::Cancel => "Cancel ride",
            RideAction::Share => "Share trip",
            RideAction::Sos => "SOS",
            RideAction::ReturnToDashboard => "Back to dashboard",
        }
    }
}

/// Navigation targets the tracking screen can ask for.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Dashboard,
}

/// Everything one tracking screen knows about its ride. Owned by a single
/// controller; nothing else writes to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub ride_id: String,
    pub loading: bool,
    pub snapshot: Option<Ride>,
    /// Latest status observed from any source. Live events overwrite it.
    pub status: Option<RideStatus>,
    pub driver_location: Option<LiveLocation>,
    pub connection: ConnectionState,
    pub load_error: Option<String>,
    pub action_error: Option<String>,
    pub share_url: Option<String>,
    pub notice: Option<String>,
    pub redirect_pending: bool,
}

impl ViewModel {
    pub fn new(ride_id: impl Into<String>) -> Self {
        Self {
            ride_id: ride_id.into(),
            loading: true,
            snapshot: None,
            status: None,
            driver_location: None,
            connection: ConnectionState::Disconnected,
            load_error: None,
            action_error: None,
            share_url: None,
            notice: None,
            redirect_pending: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }

    pub fn show_map(&self) -> bool {
        matches!(
            self.status,
            Some(RideStatus::Assigned | RideStatus::InProgress | RideStatus::Completed)
        )
    }

    pub fn show_driver_marker(&self) -> bool {
        self.driver_location.is_some() && self.status != Some(RideStatus::Completed)
    }

    pub fn available_actions(&self) -> Vec<RideAction> {
        match self.status {
            Some(RideStatus::Requested) => vec![RideAction::Cancel, RideAction::Share, RideAction::Sos],
            Some(RideStatus::Assigned | RideStatus::InProgress) => vec![RideAction::Share, RideAction::Sos],
            Some(RideStatus::Completed | RideStatus::Cancelled) => vec![RideAction::ReturnToDashboard],
            None => Vec::new(),
        }
    }

    pub fn can(&self, action: RideAction) -> bool {
        self.available_actions().contains(&action)
    }

    pub fn screen(&self) -> RideScreen {
        if let Some(message) = &self.load_error {
            return RideScreen::Error { message: message.clone() };
        }
        match (&self.snapshot, self.status) {
            (Some(ride), Some(status)) if !self.loading => RideScreen::Ride(Box::new(self.ride_view(ride, status))),
            _ => RideScreen::Loading,
        }
    }

    fn ride_view(&self, ride: &Ride, status: RideStatus) -> RideView {
        let show_map = self.show_map();
        let driver_marker = if show_map && self.show_driver_marker() {
            self.driver_location.map(|loc| DriverMarker {
                position: loc.coordinates(),
                heading: loc.heading,
            })
        } else {
            None
        };
        let live_indicator = show_map.then(|| LiveIndicator {
            connected: self.connection.is_connected(),
            speed_kmh: self.driver_location.and_then(|loc| loc.speed).map(|s| s.round() as i64),
        });

        RideView {
            ride_id: ride.id.clone(),
            status,
            status_message: status.status_message(),
            show_map,
            show_searching: !show_map,
            driver_marker,
            pickup: ride.pickup(),
            dropoff: ride.dropoff(),
            route: ride.route(),
            live_indicator,
            driver_name: ride.driver.as_ref().map(|d| d.full_name.clone()),
            bike_plate: ride.driver.as_ref().and_then(|d| d.bike_plate.clone()),
            pickup_address: ride.pickup_address.clone(),
            dropoff_address: ride.dropoff_address.clone(),
            fare: ride.fare_display(),
            eta_minutes: if status == RideStatus::Assigned { ride.eta_minutes() } else { None },
            actions: self.available_actions(),
            action_error: self.action_error.clone(),
            share_url: self.share_url.clone(),
            notice: self.notice.clone(),
            redirect_pending: self.redirect_pending,
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct DriverMarker {
    pub position: Coordinates,
    pub heading: Option<f64>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct LiveIndicator {
    pub connected: bool,
    pub speed_kmh: Option<i64>,
}

impl LiveIndicator {
    pub fn label(&self) -> &'static str {
        if self.connected { "Live tracking" } else { "Reconnecting..." }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RideView {
    pub ride_id: String,
    pub status: RideStatus,
    pub status_message: &'static str,
    pub show_map: bool,
    pub show_searching: bool,
    pub driver_marker: Option<DriverMarker>,
    pub pickup: Option<Coordinates>,
    pub dropoff: Option<Coordinates>,
    pub route: Vec<Coordinates>,
    pub live_indicator: Option<LiveIndicator>,
    pub driver_name: Option<String>,
    pub bike_plate: Option<String>,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub fare: String,
    pub eta_minutes: Option<i64>,
    pub actions: Vec<RideAction>,
    pub action_error: Option<String>,
    pub share_url: Option<String>,
    pub notice: Option<String>,
    pub redirect_pending: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum RideScreen {
    Loading,
    Error { message: String },
    Ride(Box<RideView>),
}

impl fmt::Display for RideScreen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RideScreen::Loading => write!(f, "Loading ride..."),
            RideScreen::Error { message } => write!(f, "{}\n  [Back to dashboard]", message),
            RideScreen::Ride(view) => write!(f, "{}", view),
        }
    }
}

impl fmt::Display for RideView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {}", self.status, self.status_message)?;
        writeln!(f, "  from: {}", self.pickup_address)?;
        writeln!(f, "  to:   {}", self.dropoff_address)?;
        writeln!(f, "  fare: {}", self.fare)?;
        if let Some(name) = &self.driver_name {
            match &self.bike_plate {
                Some(plate) => writeln!(f, "  driver: {} ({})", name, plate)?,
                None => writeln!(f, "  driver: {}", name)?,
            }
        }
        if let Some(eta) = self.eta_minutes {
            writeln!(f, "  Driver arriving in ~{} minutes", eta)?;
        }
        if self.show_searching {
            writeln!(f, "  searching...")?;
        }
        if let Some(indicator) = &self.live_indicator {
            match indicator.speed_kmh {
                Some(speed) => writeln!(f, "  {} | {} km/h", indicator.label(), speed)?,
                None => writeln!(f, "  {}", indicator.label())?,
            }
        }
        if let Some(marker) = &self.driver_marker {
            writeln!(
                f,
                "  driver at {:.5}, {:.5}",
                marker.position.latitude, marker.position.longitude
            )?;
        }
        if let Some(url) = &self.share_url {
            writeln!(f, "  share link: {}", url)?;
        }
        if let Some(notice) = &self.notice {
            writeln!(f, "  {}", notice)?;
        }
        if let Some(err) = &self.action_error {
            writeln!(f, "  error: {}", err)?;
        }
        let actions: Vec<&str> = self.actions.iter().map(|a| a.label()).collect();
        write!(f, "  actions: [{}]", actions.join("] ["))?;
        if self.redirect_pending {
            write!(f, "\n  returning to dashboard shortly...")?;
        }
        Ok(())
    }
}
