// src/services/ride_view.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::{
    errors::{RiderError, RiderResult},
    models::{
        live::{ConnectionState, LiveLocation},
        ride::RideStatus,
        view::{RideAction, RideScreen, Route, ViewModel},
    },
    services::{
        ride_channel::{ChannelConfig, ChannelFeed, ChannelUpdate, LiveConnector, RideChannel},
        ride_service::RideApi,
        token_store::TokenStore,
    },
};

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub ws_base_url: Url,
    pub fetch_timeout: Duration,
    pub redirect_delay: Duration,
    pub channel: ChannelConfig,
}

impl TrackerSettings {
    pub fn new(ws_base_url: Url) -> Self {
        Self {
            ws_base_url,
            fetch_timeout: Duration::from_secs(15),
            redirect_delay: Duration::from_secs(3),
            channel: ChannelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The view model changed; re-render.
    Updated,
    /// Time to leave the tracking screen.
    Redirect(Route),
}

/// Drives one ride tracking screen.
///
/// Merges the REST snapshot with live channel updates into a [`ViewModel`].
/// Once a terminal status has been observed the ride data is frozen: later
/// events and action results no longer touch it.
pub struct RideViewController {
    api: Arc<dyn RideApi>,
    connector: Arc<dyn LiveConnector>,
    tokens: Option<Arc<dyn TokenStore>>,
    settings: TrackerSettings,
    view: ViewModel,
    channel: Option<RideChannel>,
    feed: Option<ChannelFeed>,
    redirect_at: Option<Instant>,
    torn_down: bool,
}

impl RideViewController {
    pub fn new(api: Arc<dyn RideApi>, connector: Arc<dyn LiveConnector>, settings: TrackerSettings) -> Self {
        Self {
            api,
            connector,
            tokens: None,
            settings,
            view: ViewModel::new(""),
            channel: None,
            feed: None,
            redirect_at: None,
            torn_down: false,
        }
    }

    /// Session the live channel authenticates with. The access token is
    /// looked up on every connect, after any refresh the snapshot fetch did.
    pub fn with_token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn screen(&self) -> RideScreen {
        self.view.screen()
    }

    pub fn channel(&self) -> Option<&RideChannel> {
        self.channel.as_ref()
    }

    pub fn redirect_deadline(&self) -> Option<Instant> {
        self.redirect_at
    }

    /// Loads the snapshot and, on success, opens the live channel.
    /// A failed load leaves an error screen and no channel.
    pub async fn initialize(&mut self, ride_id: &str) {
        self.close_channel();
        self.channel = None;
        self.redirect_at = None;
        self.torn_down = false;
        self.view = ViewModel::new(ride_id);

        let fetched = match tokio::time::timeout(self.settings.fetch_timeout, self.api.fetch_ride(ride_id)).await {
            Ok(result) => result,
            Err(_) => Err(RiderError::NetworkTimeout),
        };

        let ride = match fetched {
            Ok(ride) => ride,
            Err(err) => {
                tracing::warn!("Could not load ride {}: {}", ride_id, err);
                self.view.loading = false;
                self.view.load_error = Some(load_error_message(&err));
                return;
            }
        };

        tracing::info!("Loaded ride {} ({})", ride.id, ride.status);
        let status = ride.status;
        self.view.status = Some(status);
        self.view.snapshot = Some(ride);
        self.view.loading = false;

        if status.is_terminal() {
            tracing::debug!("Ride {} already finished, not opening live channel", ride_id);
            self.view.connection = ConnectionState::Closed;
            return;
        }

        match RideChannel::open(
            ride_id,
            &self.settings.ws_base_url,
            self.tokens.clone(),
            self.connector.clone(),
            self.settings.channel.clone(),
        ) {
            Ok(channel) => {
                self.view.connection = channel.connection();
                self.feed = Some(channel.feed());
                self.channel = Some(channel);
            }
            Err(err) => {
                tracing::warn!("Live channel for ride {} not opened: {}", ride_id, err);
            }
        }
    }

    fn is_frozen(&self) -> bool {
        self.torn_down || self.view.is_terminal()
    }

    /// Returns whether the view model changed.
    pub fn on_location_event(&mut self, location: LiveLocation) -> bool {
        if self.is_frozen() {
            return false;
        }
        self.view.driver_location = Some(location);
        true
    }

    /// Last write wins. A terminal status closes the channel; COMPLETED also
    /// schedules the trip home.
    pub fn on_status_event(&mut self, status: RideStatus) -> bool {
        if self.is_frozen() {
            return false;
        }
        if let Some(previous) = self.view.status {
            if previous != status && !previous.can_transition_to(status) {
                tracing::debug!("Adopting out-of-order status {} after {}", status, previous);
            }
        }
        self.view.status = Some(status);

        if status.is_terminal() {
            self.close_channel();
            self.view.connection = ConnectionState::Closed;
        }
        if status == RideStatus::Completed {
            self.redirect_at = Some(Instant::now() + self.settings.redirect_delay);
            self.view.redirect_pending = true;
            tracing::info!("Ride completed, returning to dashboard in {:?}", self.settings.redirect_delay);
        }
        true
    }

    fn on_connection_change(&mut self, state: ConnectionState) -> bool {
        if self.is_frozen() || self.view.connection == state {
            return false;
        }
        self.view.connection = state;
        true
    }

    /// Asks the server to cancel. The request goes out whatever the local
    /// status; the server decides. A rejection leaves the ride data as is.
    pub async fn cancel(&mut self, reason: &str) -> RiderResult<()> {
        let ride_id = self.ready_ride_id()?;
        match self.api.cancel_ride(&ride_id, reason).await {
            Ok(ride) => {
                if self.is_frozen() {
                    return Ok(());
                }
                tracing::info!("Ride {} cancelled", ride_id);
                self.view.status = Some(ride.status);
                self.view.snapshot = Some(ride);
                self.view.action_error = None;
                self.close_channel();
                self.view.connection = ConnectionState::Closed;
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Cancel failed for ride {}: {}", ride_id, err);
                self.surface_action_error(&err);
                Err(err)
            }
        }
    }

    pub async fn share(&mut self) -> RiderResult<String> {
        let ride_id = self.ready_ride_id()?;
        self.ensure_available(RideAction::Share)?;
        match self.api.share_ride(&ride_id).await {
            Ok(url) => {
                if !self.is_frozen() {
                    self.view.share_url = Some(url.clone());
                    self.view.action_error = None;
                }
                Ok(url)
            }
            Err(err) => {
                self.surface_action_error(&err);
                Err(err)
            }
        }
    }

    pub async fn sos(&mut self) -> RiderResult<String> {
        let ride_id = self.ready_ride_id()?;
        self.ensure_available(RideAction::Sos)?;
        match self.api.send_sos(&ride_id).await {
            Ok(ack) => {
                if !self.is_frozen() {
                    self.view.notice = Some(ack.clone());
                    self.view.action_error = None;
                }
                Ok(ack)
            }
            Err(err) => {
                self.surface_action_error(&err);
                Err(err)
            }
        }
    }

    /// Closes the channel and drops any pending redirect. Safe to repeat.
    pub fn teardown(&mut self) {
        if !self.torn_down {
            tracing::debug!("Tearing down ride view for {}", self.view.ride_id);
        }
        self.torn_down = true;
        self.close_channel();
        self.redirect_at = None;
        self.view.redirect_pending = false;
    }

    /// Waits for the next channel update or the redirect timer. `None`
    /// when there is nothing left to wait for.
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        loop {
            if self.torn_down {
                return None;
            }
            let redirect_at = self.redirect_at;
            let listening = self.feed.is_some() && !self.view.is_terminal();
            if redirect_at.is_none() && !listening {
                return None;
            }

            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(redirect_at.unwrap_or_else(Instant::now)), if redirect_at.is_some() => {
                    self.redirect_at = None;
                    return Some(ControllerEvent::Redirect(Route::Dashboard));
                }
                update = next_update(&mut self.feed), if listening => match update {
                    Some(update) => {
                        if self.apply(update) {
                            return Some(ControllerEvent::Updated);
                        }
                    }
                    None => {
                        tracing::debug!("Live channel for ride {} finished", self.view.ride_id);
                        self.feed = None;
                        if let Some(channel) = &self.channel {
                            if self.on_connection_change(channel.connection()) {
                                return Some(ControllerEvent::Updated);
                            }
                        }
                    }
                },
            }
        }
    }

    fn apply(&mut self, update: ChannelUpdate) -> bool {
        match update {
            ChannelUpdate::Connection(state) => self.on_connection_change(state),
            ChannelUpdate::Location(location) => self.on_location_event(location),
            ChannelUpdate::Status(status) => self.on_status_event(status),
        }
    }

    fn close_channel(&mut self) {
        if let Some(channel) = &self.channel {
            channel.close();
        }
        self.feed = None;
    }

    fn ready_ride_id(&self) -> RiderResult<String> {
        if self.torn_down {
            return Err(RiderError::ChannelClosed);
        }
        match &self.view.snapshot {
            Some(ride) => Ok(ride.id.clone()),
            None => Err(RiderError::InvalidRideId(self.view.ride_id.clone())),
        }
    }

    fn ensure_available(&self, action: RideAction) -> RiderResult<()> {
        if self.view.can(action) {
            Ok(())
        } else {
            let status = self.view.status.map(|s| s.to_string()).unwrap_or_default();
            Err(RiderError::InvalidRideStatus(format!("{} is not available while {}", action.label(), status)))
        }
    }

    fn surface_action_error(&mut self, err: &RiderError) {
        if !self.is_frozen() {
            self.view.action_error = Some(err.user_message());
        }
    }
}

impl Drop for RideViewController {
    fn drop(&mut self) {
        self.close_channel();
    }
}

async fn next_update(feed: &mut Option<ChannelFeed>) -> Option<ChannelUpdate> {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

fn load_error_message(err: &RiderError) -> String {
    if err.is_not_found() {
        "Ride not found".to_string()
    } else {
        err.user_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{FakeRideApi, ScriptedConnection, ScriptedConnector, sample_ride};
    use tokio::sync::mpsc::UnboundedSender;

    fn settings() -> TrackerSettings {
        TrackerSettings::new(Url::parse("wss://rides.example.com").unwrap())
    }

    fn controller(api: &Arc<FakeRideApi>, connector: &Arc<ScriptedConnector>) -> RideViewController {
        RideViewController::new(api.clone(), connector.clone(), settings())
    }

    /// Controller on a REQUESTED ride with a live connection fed by the sender.
    async fn tracking_requested_ride() -> (RideViewController, Arc<FakeRideApi>, UnboundedSender<String>) {
        let api = Arc::new(FakeRideApi::with_ride(sample_ride("ride-42", RideStatus::Requested)));
        let (connection, frames) = ScriptedConnection::live();
        let connector = Arc::new(ScriptedConnector::new(vec![connection]));
        let mut ctrl = controller(&api, &connector);
        ctrl.initialize("ride-42").await;
        (ctrl, api, frames)
    }

    async fn pump_until<F>(ctrl: &mut RideViewController, done: F)
    where
        F: Fn(&ViewModel) -> bool,
    {
        let run = async {
            while !done(ctrl.view()) {
                match ctrl.next_event().await {
                    Some(_) => continue,
                    None => panic!("controller idle before condition was met"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("timed out pumping controller");
    }

    /// Drains a feed until its worker exits and returns the last connection state seen.
    async fn final_connection_state(feed: &mut ChannelFeed) -> Option<ConnectionState> {
        let drain = async {
            let mut last = None;
            while let Some(update) = feed.next().await {
                if let ChannelUpdate::Connection(state) = update {
                    last = Some(state);
                }
            }
            last
        };
        tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .expect("channel worker did not stop")
    }

    fn status_frame(status: &str) -> String {
        format!(r#"{{"type": "ride_status_update", "status": "{}"}}"#, status)
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_to_completed_scenario() {
        let (mut ctrl, _api, frames) = tracking_requested_ride().await;

        let vm = ctrl.view();
        assert!(!vm.loading);
        assert_eq!(vm.status, Some(RideStatus::Requested));
        assert!(!vm.show_map());
        assert!(vm.can(RideAction::Cancel));
        assert!(ctrl.channel().is_some_and(|c| c.is_opened()));

        frames.send(status_frame("ASSIGNED")).unwrap();
        pump_until(&mut ctrl, |vm| vm.status == Some(RideStatus::Assigned)).await;
        let vm = ctrl.view();
        assert!(vm.show_map());
        assert!(!vm.can(RideAction::Cancel));
        assert!(vm.can(RideAction::Share) && vm.can(RideAction::Sos));

        frames.send(status_frame("COMPLETED")).unwrap();
        pump_until(&mut ctrl, |vm| vm.status == Some(RideStatus::Completed)).await;
        let completed_at = Instant::now();
        assert_eq!(ctrl.view().available_actions(), vec![RideAction::ReturnToDashboard]);
        assert!(ctrl.channel().unwrap().is_closed());
        assert!(ctrl.view().redirect_pending);
        assert_eq!(ctrl.redirect_deadline(), Some(completed_at + Duration::from_millis(3000)));

        // Nothing mutates the view after the terminal status.
        let frozen = ctrl.view().clone();
        assert!(!ctrl.on_location_event(LiveLocation::at(1.0, 1.0)));
        assert!(!ctrl.on_status_event(RideStatus::InProgress));
        assert_eq!(ctrl.view(), &frozen);

        assert_eq!(ctrl.next_event().await, Some(ControllerEvent::Redirect(Route::Dashboard)));
        assert_eq!(completed_at.elapsed(), Duration::from_secs(3));
        assert_eq!(ctrl.next_event().await, None);
    }

    #[tokio::test]
    async fn test_not_found_shows_error_and_opens_nothing() {
        let api = Arc::new(FakeRideApi::missing());
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let mut ctrl = controller(&api, &connector);
        ctrl.initialize("ride-404").await;

        assert_eq!(ctrl.screen(), RideScreen::Error { message: "Ride not found".to_string() });
        assert!(!ctrl.view().loading);
        assert!(ctrl.channel().is_none());
        assert_eq!(connector.attempts(), 0);
        assert_eq!(ctrl.next_event().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_a_load_failure() {
        let api = Arc::new(FakeRideApi::with_ride(sample_ride("ride-42", RideStatus::Requested)).slow(Duration::from_secs(60)));
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let mut ctrl = controller(&api, &connector);
        ctrl.initialize("ride-42").await;

        match ctrl.screen() {
            RideScreen::Error { message } => assert!(message.contains("timed out")),
            other => panic!("expected error screen, got {:?}", other),
        }
        assert!(ctrl.channel().is_none());
    }

    #[tokio::test]
    async fn test_location_events_overwrite() {
        let (mut ctrl, _api, frames) = tracking_requested_ride().await;
        frames.send(status_frame("ASSIGNED")).unwrap();
        frames
            .send(r#"{"type": "driver_location_update", "latitude": 5.60, "longitude": -0.20, "speed": 28.7}"#.to_string())
            .unwrap();
        pump_until(&mut ctrl, |vm| vm.driver_location.is_some()).await;
        assert!(ctrl.view().show_driver_marker());

        assert!(ctrl.on_location_event(LiveLocation::at(5.7, -0.3)));
        assert_eq!(ctrl.view().driver_location, Some(LiveLocation::at(5.7, -0.3)));
        assert_eq!(ctrl.view().status, Some(RideStatus::Assigned));
    }

    #[tokio::test]
    async fn test_status_skipping_ahead_is_adopted() {
        let (mut ctrl, _api, _frames) = tracking_requested_ride().await;
        assert!(ctrl.on_status_event(RideStatus::InProgress));
        assert_eq!(ctrl.view().status, Some(RideStatus::InProgress));
    }

    #[tokio::test]
    async fn test_cancel_success_replaces_snapshot_and_closes() {
        let (mut ctrl, api, _frames) = tracking_requested_ride().await;
        ctrl.cancel("Changed my mind").await.unwrap();

        let vm = ctrl.view();
        assert_eq!(vm.status, Some(RideStatus::Cancelled));
        assert_eq!(vm.snapshot.as_ref().unwrap().cancellation_reason, "Changed my mind");
        assert!(!vm.show_map());
        assert!(!vm.redirect_pending);
        assert!(ctrl.channel().unwrap().is_closed());
        assert_eq!(api.calls().last().unwrap(), "cancel ride-42 Changed my mind");
    }

    #[tokio::test]
    async fn test_cancel_rejected_leaves_ride_untouched() {
        let (mut ctrl, api, frames) = tracking_requested_ride().await;
        api.set_status(RideStatus::Assigned);
        frames.send(status_frame("ASSIGNED")).unwrap();
        pump_until(&mut ctrl, |vm| vm.status == Some(RideStatus::Assigned)).await;

        let before = ctrl.view().clone();
        let err = ctrl.cancel("too late").await.unwrap_err();
        assert!(matches!(err, RiderError::BadRequest(_)));

        let after = ctrl.view();
        assert_eq!(after.snapshot, before.snapshot);
        assert_eq!(after.status, before.status);
        assert_eq!(after.driver_location, before.driver_location);
        assert_eq!(after.action_error.as_deref(), Some("Only requested rides can be cancelled."));
        assert!(!ctrl.channel().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_share_and_sos() {
        let (mut ctrl, api, _frames) = tracking_requested_ride().await;
        let url = ctrl.share().await.unwrap();
        assert_eq!(url, "https://track.example.com/ride-42");
        assert_eq!(ctrl.view().share_url.as_deref(), Some(url.as_str()));

        api.fail_next_action(RiderError::NetworkTimeout);
        assert!(ctrl.sos().await.is_err());
        assert!(ctrl.view().action_error.as_deref().unwrap().contains("timed out"));

        assert_eq!(ctrl.sos().await.unwrap(), "Emergency contacts notified");
        assert_eq!(ctrl.view().notice.as_deref(), Some("Emergency contacts notified"));
        assert!(ctrl.view().action_error.is_none());
    }

    #[tokio::test]
    async fn test_actions_unavailable_after_terminal() {
        let (mut ctrl, api, _frames) = tracking_requested_ride().await;
        ctrl.on_status_event(RideStatus::Cancelled);
        let calls = api.calls().len();

        assert!(matches!(ctrl.share().await, Err(RiderError::InvalidRideStatus(_))));
        assert!(matches!(ctrl.sos().await, Err(RiderError::InvalidRideStatus(_))));
        assert_eq!(api.calls().len(), calls);
        assert!(ctrl.view().action_error.is_none());
        assert!(ctrl.redirect_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_twice_cancels_redirect() {
        let (mut ctrl, _api, _frames) = tracking_requested_ride().await;
        ctrl.on_status_event(RideStatus::Completed);
        assert!(ctrl.redirect_deadline().is_some());

        ctrl.teardown();
        ctrl.teardown();

        assert!(ctrl.redirect_deadline().is_none());
        assert!(!ctrl.view().redirect_pending);
        assert!(ctrl.channel().unwrap().is_closed());
        assert_eq!(ctrl.next_event().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_exhaustion_leaves_stale_view() {
        let api = Arc::new(FakeRideApi::with_ride(sample_ride("ride-42", RideStatus::Assigned)));
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let mut ctrl = controller(&api, &connector);
        ctrl.initialize("ride-42").await;

        while ctrl.next_event().await.is_some() {}

        assert_eq!(ctrl.view().connection, ConnectionState::GivingUp);
        assert!(ctrl.view().connection.is_final() && !ctrl.view().is_terminal());
        assert_eq!(ctrl.view().status, Some(RideStatus::Assigned));
        assert_eq!(connector.attempts(), 6);
        // No fallback polling: the snapshot was fetched exactly once.
        assert_eq!(api.calls(), vec!["fetch ride-42".to_string()]);
    }

    #[tokio::test]
    async fn test_switching_rides_closes_the_previous_channel() {
        let api = Arc::new(FakeRideApi::with_ride(sample_ride("ride-1", RideStatus::Requested)));
        let (first, _first_frames) = ScriptedConnection::live();
        let (second, _second_frames) = ScriptedConnection::live();
        let connector = Arc::new(ScriptedConnector::new(vec![first, second]));
        let mut ctrl = controller(&api, &connector);
        ctrl.initialize("ride-1").await;
        let mut first_feed = ctrl.channel().unwrap().feed();

        api.replace_ride(sample_ride("ride-2", RideStatus::Assigned));
        ctrl.initialize("ride-2").await;

        assert_eq!(final_connection_state(&mut first_feed).await, Some(ConnectionState::Closed));
        let channel = ctrl.channel().unwrap();
        assert_eq!(channel.ride_id(), "ride-2");
        assert!(!channel.is_closed());
        assert_eq!(ctrl.view().ride_id, "ride-2");
        assert_eq!(ctrl.view().status, Some(RideStatus::Assigned));
    }

    #[tokio::test]
    async fn test_failed_switch_leaves_no_channel_behind() {
        let api = Arc::new(FakeRideApi::with_ride(sample_ride("ride-1", RideStatus::Requested)));
        let (first, _first_frames) = ScriptedConnection::live();
        let connector = Arc::new(ScriptedConnector::new(vec![first]));
        let mut ctrl = controller(&api, &connector);
        ctrl.initialize("ride-1").await;
        let mut first_feed = ctrl.channel().unwrap().feed();

        ctrl.initialize("ride-2").await;

        assert_eq!(final_connection_state(&mut first_feed).await, Some(ConnectionState::Closed));
        assert!(ctrl.channel().is_none());
        assert_eq!(ctrl.view().load_error.as_deref(), Some("Ride not found"));
        assert!(ctrl.view().snapshot.is_none());
        assert_eq!(ctrl.next_event().await, None);
    }

    #[tokio::test]
    async fn test_finished_ride_opens_no_channel() {
        let api = Arc::new(FakeRideApi::with_ride(sample_ride("ride-42", RideStatus::Completed)));
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let mut ctrl = controller(&api, &connector);
        ctrl.initialize("ride-42").await;

        assert_eq!(ctrl.view().available_actions(), vec![RideAction::ReturnToDashboard]);
        assert!(ctrl.channel().is_none());
        assert!(ctrl.redirect_deadline().is_none());
        assert_eq!(ctrl.next_event().await, None);
    }
}
