// src/services/ride_channel.rs
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    errors::{RiderError, RiderResult},
    models::{
        live::{ConnectionState, InboundMessage, LiveLocation},
        ride::RideStatus,
    },
    services::token_store::TokenStore,
};

/// One open live connection. Yields text frames until the peer goes away.
#[async_trait]
pub trait LiveStream: Send {
    /// `None` once the connection is gone.
    async fn next_frame(&mut self) -> Option<RiderResult<String>>;
    async fn close(&mut self);
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, url: &Url, token: Option<&str>) -> RiderResult<Box<dyn LiveStream>>;
}

/// Connects with tokio-tungstenite. The access token, when present, is
/// passed as the `token` query parameter.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(&self, url: &Url, token: Option<&str>) -> RiderResult<Box<dyn LiveStream>> {
        let mut target = url.clone();
        if let Some(token) = token {
            target.query_pairs_mut().append_pair("token", token);
        }
        let (socket, _response) = connect_async(target.as_str()).await?;
        Ok(Box::new(WsStream { socket }))
    }
}

struct WsStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LiveStream for WsStream {
    async fn next_frame(&mut self) -> Option<RiderResult<String>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::debug!("Dropping non UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite itself.
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.socket.close(None).await {
            tracing::debug!("Closing websocket: {}", err);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub reconnect_delay: Duration,
    /// Reconnects after the first connect; 5 means 6 connects at most.
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// `{ws_base}/ws/rides/{id}/`
pub fn ride_channel_url(ws_base: &Url, ride_id: &str) -> RiderResult<Url> {
    let mut url = ws_base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| RiderError::InvalidUrl(ws_base.to_string()))?;
        path.pop_if_empty();
        path.extend(["ws", "rides", ride_id, ""]);
    }
    Ok(url)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelUpdate {
    Connection(ConnectionState),
    Location(LiveLocation),
    Status(RideStatus),
}

/// Live view of one ride.
///
/// Only the latest location and status are kept; a slow consumer sees the
/// newest value and never a backlog. The channel closes itself on a
/// terminal status. `close` and drop close it too, any number of times.
pub struct RideChannel {
    ride_id: String,
    cancel: CancellationToken,
    connection: watch::Receiver<ConnectionState>,
    location: watch::Receiver<Option<LiveLocation>>,
    status: watch::Receiver<Option<RideStatus>>,
    task: Option<JoinHandle<()>>,
}

impl RideChannel {
    /// Starts the connection worker. An empty ride id opens nothing and the
    /// channel stays `Disconnected`.
    ///
    /// The access token is read from `tokens` before every connect, so a
    /// token refreshed after the channel was opened is picked up on the
    /// next attempt.
    pub fn open(
        ride_id: &str,
        ws_base: &Url,
        tokens: Option<Arc<dyn TokenStore>>,
        connector: Arc<dyn LiveConnector>,
        config: ChannelConfig,
    ) -> RiderResult<Self> {
        let ride_id = ride_id.trim().to_string();
        let (connection_tx, connection) = watch::channel(ConnectionState::Disconnected);
        let (location_tx, location) = watch::channel(None);
        let (status_tx, status) = watch::channel(None);
        let cancel = CancellationToken::new();

        let task = if ride_id.is_empty() {
            tracing::debug!("No ride id, live channel not opened");
            None
        } else {
            let worker = Worker {
                ride_id: ride_id.clone(),
                url: ride_channel_url(ws_base, &ride_id)?,
                tokens,
                connector,
                config,
                cancel: cancel.clone(),
                connection_tx,
                location_tx,
                status_tx,
            };
            Some(tokio::spawn(worker.run()))
        };

        Ok(Self {
            ride_id,
            cancel,
            connection,
            location,
            status,
            task,
        })
    }

    pub fn ride_id(&self) -> &str {
        &self.ride_id
    }

    pub fn connection(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_connected()
    }

    pub fn driver_location(&self) -> Option<LiveLocation> {
        *self.location.borrow()
    }

    pub fn status(&self) -> Option<RideStatus> {
        *self.status.borrow()
    }

    pub fn is_opened(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Closing live channel for ride {}", self.ride_id);
            self.cancel.cancel();
        }
    }

    /// Change notifications for a consumer that wants to await updates.
    pub fn feed(&self) -> ChannelFeed {
        ChannelFeed {
            connection: self.connection.clone(),
            location: self.location.clone(),
            status: self.status.clone(),
            connection_open: true,
            location_open: true,
            status_open: true,
        }
    }

    /// Waits for the worker to exit. Returns at once when nothing was opened.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!("Live channel worker for ride {} panicked: {}", self.ride_id, err);
            }
        }
    }
}

impl Drop for RideChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct ChannelFeed {
    connection: watch::Receiver<ConnectionState>,
    location: watch::Receiver<Option<LiveLocation>>,
    status: watch::Receiver<Option<RideStatus>>,
    connection_open: bool,
    location_open: bool,
    status_open: bool,
}

impl ChannelFeed {
    /// Next change, connection state first. `None` once the worker is gone
    /// and every change it published has been handed out.
    pub async fn next(&mut self) -> Option<ChannelUpdate> {
        loop {
            tokio::select! {
                biased;
                changed = self.connection.changed(), if self.connection_open => match changed {
                    Ok(()) => {
                        let state = *self.connection.borrow_and_update();
                        return Some(ChannelUpdate::Connection(state));
                    }
                    Err(_) => self.connection_open = false,
                },
                changed = self.location.changed(), if self.location_open => match changed {
                    Ok(()) => {
                        if let Some(location) = *self.location.borrow_and_update() {
                            return Some(ChannelUpdate::Location(location));
                        }
                    }
                    Err(_) => self.location_open = false,
                },
                changed = self.status.changed(), if self.status_open => match changed {
                    Ok(()) => {
                        if let Some(status) = *self.status.borrow_and_update() {
                            return Some(ChannelUpdate::Status(status));
                        }
                    }
                    Err(_) => self.status_open = false,
                },
                else => return None,
            }
        }
    }
}

enum PumpOutcome {
    Cancelled,
    Terminal,
    Dropped,
}

struct Worker {
    ride_id: String,
    url: Url,
    tokens: Option<Arc<dyn TokenStore>>,
    connector: Arc<dyn LiveConnector>,
    config: ChannelConfig,
    cancel: CancellationToken,
    connection_tx: watch::Sender<ConnectionState>,
    location_tx: watch::Sender<Option<LiveLocation>>,
    status_tx: watch::Sender<Option<RideStatus>>,
}

impl Worker {
    async fn run(self) {
        let mut attempt: u32 = 0;

        loop {
            self.connection_tx.send_replace(ConnectionState::Connecting { attempt });
            let token = self.tokens.as_ref().and_then(|store| store.access_token());
            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.url, token.as_deref()) => result,
            };

            match connected {
                Ok(mut stream) => {
                    tracing::info!("Live channel connected for ride {}", self.ride_id);
                    self.connection_tx.send_replace(ConnectionState::Connected);
                    attempt = 0;

                    let outcome = self.pump(stream.as_mut()).await;
                    stream.close().await;
                    match outcome {
                        PumpOutcome::Cancelled | PumpOutcome::Terminal => break,
                        PumpOutcome::Dropped => {
                            tracing::warn!("Live channel for ride {} dropped", self.ride_id);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "Live channel connect failed for ride {} (attempt {}): {}",
                        self.ride_id,
                        attempt,
                        err
                    );
                }
            }

            if attempt >= self.config.max_reconnect_attempts {
                tracing::warn!(
                    "Giving up on live channel for ride {} after {} reconnect attempts",
                    self.ride_id,
                    attempt
                );
                self.connection_tx.send_replace(ConnectionState::GivingUp);
                return;
            }
            attempt += 1;
            self.connection_tx.send_replace(ConnectionState::Disconnected);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.connection_tx.send_replace(ConnectionState::Closed);
        tracing::debug!("Live channel worker for ride {} stopped", self.ride_id);
    }

    async fn pump(&self, stream: &mut dyn LiveStream) -> PumpOutcome {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                frame = stream.next_frame() => frame,
            };

            match frame {
                None => return PumpOutcome::Dropped,
                Some(Err(err)) => {
                    tracing::warn!("Live channel read error for ride {}: {}", self.ride_id, err);
                    return PumpOutcome::Dropped;
                }
                Some(Ok(text)) => {
                    if self.apply(&text) {
                        return PumpOutcome::Terminal;
                    }
                }
            }
        }
    }

    /// Publishes one frame. Returns true when the ride reached a terminal status.
    fn apply(&self, text: &str) -> bool {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(InboundMessage::RideInit { data }) => {
                if let Some(location) = data.driver_location() {
                    self.location_tx.send_replace(Some(location));
                }
                self.publish_status(data.status)
            }
            Ok(InboundMessage::DriverLocationUpdate(location)) => {
                tracing::trace!("Driver at {}, {}", location.latitude, location.longitude);
                self.location_tx.send_replace(Some(location));
                false
            }
            Ok(InboundMessage::RideStatusUpdate { status }) => self.publish_status(status),
            Ok(InboundMessage::Unknown) => {
                tracing::debug!("Ignoring unknown live frame for ride {}", self.ride_id);
                false
            }
            Err(err) => {
                tracing::debug!("Ignoring malformed live frame for ride {}: {}", self.ride_id, err);
                false
            }
        }
    }

    fn publish_status(&self, status: RideStatus) -> bool {
        tracing::info!("Ride {} is now {}", self.ride_id, status);
        // Close before publishing so a consumer reacting to the terminal
        // status already sees the channel as closed.
        if status.is_terminal() {
            self.cancel.cancel();
        }
        self.status_tx.send_replace(Some(status));
        status.is_terminal()
    }
}
