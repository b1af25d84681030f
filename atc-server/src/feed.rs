//! Live feed client: keeps a WebSocket open to the ATC 24 event stream.
//!
//! Lifecycle: `Idle → Connecting → Connected → (Disconnected | Faulted) →
//! Connecting → …`, forever. Transport faults are retried after a fixed
//! delay with no attempt limit. Bad messages are logged and skipped; they
//! never end the connection.
//!
//! The client writes straight into the shared [`StateStore`]; readers never
//! wait on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};

use atc_core::clearance::record_for_plan;
use atc_core::store::StateStore;
use atc_core::types::{decode_message, ConnectionStatus, FeedEvent};

/// Fixed wait between a fault and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{0}")]
    Transport(String),
}

impl From<tungstenite::Error> for FeedError {
    fn from(e: tungstenite::Error) -> Self {
        FeedError::Transport(e.to_string())
    }
}

/// Inbound text messages of one connection. Ends when the remote closes.
pub type MessageStream = BoxStream<'static, Result<String, FeedError>>;

/// Opens connections to the upstream feed.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<MessageStream, FeedError>;
}

// ---------------------------------------------------------------------------
// WebSocket connector
// ---------------------------------------------------------------------------

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: &str) -> Self {
        WsConnector {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    async fn connect(&self) -> Result<MessageStream, FeedError> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;

        let messages = ws.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                // Ping/pong are answered by tungstenite; close ends the stream.
                Ok(_) => None,
                Err(e) => Some(Err(FeedError::from(e))),
            }
        });
        Ok(messages.boxed())
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters for the feed client, shared with the query API.
#[derive(Debug, Default)]
pub struct FeedStats {
    pub messages: AtomicU64,
    pub flight_plans: AtomicU64,
    pub aircraft_updates: AtomicU64,
    pub ignored: AtomicU64,
    pub decode_errors: AtomicU64,
    pub connects: AtomicU64,
    pub faults: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatsSnapshot {
    pub messages: u64,
    pub flight_plans: u64,
    pub aircraft_updates: u64,
    pub ignored: u64,
    pub decode_errors: u64,
    pub connects: u64,
    pub faults: u64,
}

impl FeedStats {
    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            flight_plans: self.flight_plans.load(Ordering::Relaxed),
            aircraft_updates: self.aircraft_updates.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Faulted,
}

/// How one connection attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The remote closed the stream cleanly.
    Closed,
    /// Connect failed or the connection broke.
    Faulted(String),
}

pub struct FeedClient<C> {
    connector: C,
    store: Arc<StateStore>,
    stats: Arc<FeedStats>,
    state: FeedState,
}

impl<C: FeedConnector> FeedClient<C> {
    pub fn new(connector: C, store: Arc<StateStore>, stats: Arc<FeedStats>) -> Self {
        FeedClient {
            connector,
            store,
            stats,
            state: FeedState::Idle,
        }
    }

    /// Run connect/read/backoff cycles until the process exits.
    pub async fn run(mut self) {
        tracing::info!("Feed client starting");
        loop {
            self.attempt().await;
        }
    }

    /// One full cycle: connect, read until the connection ends, record the
    /// outcome, then wait [`RECONNECT_DELAY`].
    pub async fn attempt(&mut self) -> SessionEnd {
        self.state = FeedState::Connecting;
        tracing::debug!("Connecting to feed");

        let end = match self.connector.connect().await {
            Ok(stream) => {
                self.on_connected();
                self.read_loop(stream).await
            }
            Err(e) => SessionEnd::Faulted(e.to_string()),
        };

        match &end {
            SessionEnd::Faulted(reason) => {
                self.state = FeedState::Faulted;
                bump(&self.stats.faults);
                tracing::warn!("Feed connection error: {reason}");
                self.store.set_status(
                    ConnectionStatus::Error,
                    format!(
                        "Connection error: {reason}. Reconnecting in {} seconds...",
                        RECONNECT_DELAY.as_secs()
                    ),
                );
            }
            SessionEnd::Closed => {
                self.state = FeedState::Disconnected;
                tracing::info!("Feed closed the connection");
                self.store.set_status(
                    ConnectionStatus::Disconnected,
                    format!(
                        "Feed closed the connection. Reconnecting in {} seconds...",
                        RECONNECT_DELAY.as_secs()
                    ),
                );
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
        end
    }

    /// Called once per established connection, so each connection logs
    /// exactly one `Connected` transition.
    fn on_connected(&mut self) {
        self.state = FeedState::Connected;
        bump(&self.stats.connects);
        tracing::info!("Connected to ATC 24 feed");
        self.store
            .set_status(ConnectionStatus::Connected, "Connected to ATC 24 feed.");
    }

    async fn read_loop(&mut self, mut stream: MessageStream) -> SessionEnd {
        while let Some(item) = stream.next().await {
            match item {
                Ok(text) => self.handle_message(&text),
                Err(e) => return SessionEnd::Faulted(e.to_string()),
            }
        }
        SessionEnd::Closed
    }

    fn handle_message(&self, text: &str) {
        bump(&self.stats.messages);

        match decode_message(text) {
            Ok(FeedEvent::FlightPlan(plan)) => {
                match record_for_plan(&plan, None, chrono::Utc::now()) {
                    Ok((record, clearance)) => {
                        tracing::info!(
                            callsign = %record.callsign,
                            squawk = %clearance.squawk,
                            "Clearance issued: {} -> {}",
                            record.departure_airport,
                            record.arrival_airport
                        );
                        tracing::debug!("{}", clearance.text);
                        match self.store.append_flight(record) {
                            Ok(()) => bump(&self.stats.flight_plans),
                            Err(e) => self.drop_message("flight record", &e.to_string()),
                        }
                    }
                    Err(e) => self.drop_message("flight plan", &e.to_string()),
                }
            }
            Ok(FeedEvent::AircraftData(snapshot)) => {
                bump(&self.stats.aircraft_updates);
                tracing::trace!("Aircraft snapshot: {} aircraft", snapshot.len());
                self.store.snapshot_aircraft(snapshot);
            }
            Ok(FeedEvent::Ignored(kind)) => {
                bump(&self.stats.ignored);
                tracing::trace!("Ignoring feed event {kind}");
            }
            Err(e) => self.drop_message("message", &e.to_string()),
        }
    }

    fn drop_message(&self, what: &str, reason: &str) {
        bump(&self.stats.decode_errors);
        tracing::warn!("Dropped {what}: {reason}");
        self.store
            .log_diagnostic(format!("Processing {what}: {reason}"));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
