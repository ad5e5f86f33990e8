// src/services/testing.rs
// Scripted collaborators for unit tests.
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::{
    errors::{RiderError, RiderResult},
    models::ride::{Ride, RideStatus},
    services::{
        ride_channel::{ChannelFeed, ChannelUpdate, LiveConnector, LiveStream},
        ride_service::RideApi,
    },
};

pub enum ScriptedConnection {
    Refuse,
    Frames { frames: VecDeque<String>, then_drop: bool },
    Live(mpsc::UnboundedReceiver<String>),
}

impl ScriptedConnection {
    pub fn frames_then_drop(frames: Vec<&str>) -> Self {
        ScriptedConnection::Frames {
            frames: frames.into_iter().map(str::to_string).collect(),
            then_drop: true,
        }
    }

    pub fn frames_then_hold(frames: Vec<&str>) -> Self {
        ScriptedConnection::Frames {
            frames: frames.into_iter().map(str::to_string).collect(),
            then_drop: false,
        }
    }

    /// A connection fed by the returned sender. Dropping the sender drops
    /// the connection.
    pub fn live() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ScriptedConnection::Live(rx), tx)
    }
}

/// Hands out scripted connections in order, then refuses.
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<ScriptedConnection>>,
    attempts: AtomicU32,
    last_url: Mutex<Option<Url>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<ScriptedConnection>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            attempts: AtomicU32::new(0),
            last_url: Mutex::new(None),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<Url> {
        self.last_url.lock().unwrap().clone()
    }

    /// The token passed to each connect, in order.
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(&self, url: &Url, token: Option<&str>) -> RiderResult<Box<dyn LiveStream>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().unwrap() = Some(url.clone());
        self.tokens.lock().unwrap().push(token.map(str::to_string));
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            None | Some(ScriptedConnection::Refuse) => {
                Err(RiderError::WebSocketConnection("connection refused".to_string()))
            }
            Some(connection) => Ok(Box::new(ScriptedStream { connection })),
        }
    }
}

struct ScriptedStream {
    connection: ScriptedConnection,
}

#[async_trait]
impl LiveStream for ScriptedStream {
    async fn next_frame(&mut self) -> Option<RiderResult<String>> {
        match &mut self.connection {
            ScriptedConnection::Refuse => None,
            ScriptedConnection::Frames { frames, then_drop } => match frames.pop_front() {
                Some(frame) => Some(Ok(frame)),
                None if *then_drop => None,
                None => std::future::pending().await,
            },
            ScriptedConnection::Live(rx) => rx.recv().await.map(Ok),
        }
    }

    async fn close(&mut self) {
        if let ScriptedConnection::Live(rx) = &mut self.connection {
            rx.close();
        }
    }
}

/// Pulls updates until one matches, panicking after five (virtual) seconds.
pub async fn wait_for<F>(feed: &mut ChannelFeed, matches: F) -> ChannelUpdate
where
    F: Fn(&ChannelUpdate) -> bool,
{
    let search = async {
        loop {
            match feed.next().await {
                Some(update) if matches(&update) => return update,
                Some(_) => continue,
                None => panic!("channel finished before the expected update"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), search)
        .await
        .expect("timed out waiting for channel update")
}

/// Backend stand-in. Cancel follows the server rule: only REQUESTED rides.
pub struct FakeRideApi {
    ride: Mutex<Option<Ride>>,
    fetch_delay: Option<Duration>,
    fail_actions: Mutex<Option<RiderError>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRideApi {
    pub fn with_ride(ride: Ride) -> Self {
        Self {
            ride: Mutex::new(Some(ride)),
            fetch_delay: None,
            fail_actions: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn missing() -> Self {
        Self {
            ride: Mutex::new(None),
            fetch_delay: None,
            fail_actions: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Serve `ride` from now on, in place of the current one.
    pub fn replace_ride(&self, ride: Ride) {
        *self.ride.lock().unwrap() = Some(ride);
    }

    pub fn set_status(&self, status: RideStatus) {
        if let Some(ride) = self.ride.lock().unwrap().as_mut() {
            ride.status = status;
        }
    }

    /// The next share/SOS call fails with `err`.
    pub fn fail_next_action(&self, err: RiderError) {
        *self.fail_actions.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RideApi for FakeRideApi {
    async fn fetch_ride(&self, ride_id: &str) -> RiderResult<Ride> {
        self.record(format!("fetch {}", ride_id));
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.ride
            .lock()
            .unwrap()
            .clone()
            .filter(|r| r.id == ride_id)
            .ok_or_else(|| RiderError::ride_not_found(ride_id))
    }

    async fn cancel_ride(&self, ride_id: &str, reason: &str) -> RiderResult<Ride> {
        self.record(format!("cancel {} {}", ride_id, reason));
        let mut guard = self.ride.lock().unwrap();
        let ride = guard.as_mut().ok_or_else(|| RiderError::ride_not_found(ride_id))?;
        if ride.status != RideStatus::Requested {
            return Err(RiderError::bad_request("Only requested rides can be cancelled."));
        }
        ride.status = RideStatus::Cancelled;
        ride.cancellation_reason = reason.to_string();
        Ok(ride.clone())
    }

    async fn share_ride(&self, ride_id: &str) -> RiderResult<String> {
        self.record(format!("share {}", ride_id));
        if let Some(err) = self.fail_actions.lock().unwrap().take() {
            return Err(err);
        }
        Ok(format!("https://track.example.com/{}", ride_id))
    }

    async fn send_sos(&self, ride_id: &str) -> RiderResult<String> {
        self.record(format!("sos {}", ride_id));
        if let Some(err) = self.fail_actions.lock().unwrap().take() {
            return Err(err);
        }
        Ok("Emergency contacts notified".to_string())
    }
}

pub fn sample_ride(ride_id: &str, status: RideStatus) -> Ride {
    serde_json::from_value(serde_json::json!({
        "id": ride_id,
        "rider": {"id": "u1", "full_name": "Ama Mensah", "phone_number": "+233200000001"},
        "driver": null,
        "pickup_address": "A",
        "pickup_lat": "5.622300",
        "pickup_lng": "-0.173200",
        "dropoff_address": "B",
        "dropoff_lat": "5.556000",
        "dropoff_lng": "-0.182000",
        "price": "25.00",
        "price_display": "GHS 25.00",
        "status": status,
        "status_logs": []
    }))
    .unwrap()
}
