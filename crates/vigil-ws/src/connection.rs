//! [`Connection`] over a reconnecting WebSocket session.
//!
//! Each handle spawns one driver task on `connect()`. The driver owns the
//! socket and everything tied to a session: command ids, pending replies,
//! the subscription routes. Callers talk to it over an mpsc channel and get
//! answers back on oneshot channels.
//!
//! On every session start the driver first re-sends a subscribe command for
//! each declared subscription and only then emits `connected`. When the
//! session ends it fails in-flight commands, emits `disconnected` and
//! retries with exponential backoff. `disconnected` is not repeated for
//! consecutive failed attempts.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{Camera, ConnectionId, EventKind, LifecycleSignal, SyncEvent};
use vigil_mirror::{
    subscription_channel, CommandError, Connection, ConnectionFactory, EventSink, Subscription,
    SubscriptionStatus, TransportError,
};
use vigil_settings::{ReconnectSettings, ServerSettings};

use crate::backoff::Backoff;
use crate::error::WsError;
use crate::protocol::{self, ClientCommand, ClientFrame, ServerFrame, GET_CAMERAS};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Missed heartbeats tolerated before a silent session counts as lost.
const STALE_AFTER_HEARTBEATS: u32 = 3;

/// Everything a [`WsConnection`] needs to know about the server.
#[derive(Clone, Debug, PartialEq)]
pub struct WsConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Reply timeout per command.
    pub command_timeout: Duration,
    /// Ping interval; `None` disables pings and the staleness check.
    pub heartbeat_interval: Option<Duration>,
    /// Reconnect schedule.
    pub reconnect: ReconnectSettings,
    /// Server event name for camera registrations.
    pub camera_registered_event: String,
    /// Server event name (or `*` pattern) for finished recordings.
    pub recording_complete_event: String,
}

impl WsConfig {
    /// Build from the `server` and `reconnect` settings sections.
    pub fn from_settings(server: &ServerSettings, reconnect: &ReconnectSettings) -> Self {
        Self {
            url: server.url.clone(),
            connect_timeout: server.connect_timeout(),
            command_timeout: server.command_timeout(),
            heartbeat_interval: server.heartbeat_interval(),
            reconnect: reconnect.clone(),
            camera_registered_event: server.camera_registered_event.clone(),
            recording_complete_event: server.recording_complete_event.clone(),
        }
    }

    /// Server event name subscribed for `kind`.
    pub fn event_name(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::CameraRegistered => &self.camera_registered_event,
            EventKind::RecordingComplete => &self.recording_complete_event,
        }
    }

    /// The kind whose event name matches `name`.
    pub fn kind_for(&self, name: &str) -> Option<EventKind> {
        EventKind::ALL
            .into_iter()
            .find(|&kind| protocol::event_matches(self.event_name(kind), name))
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default(), &ReconnectSettings::default())
    }
}

struct SubscriptionEntry {
    kind: EventKind,
    sink: EventSink,
    status: watch::Sender<SubscriptionStatus>,
}

type Subscriptions = Arc<Mutex<Vec<SubscriptionEntry>>>;
type Reply = oneshot::Sender<Result<Value, CommandError>>;

enum DriverCommand {
    Request { command: ClientCommand, reply: Reply },
    Subscribe(usize),
}

enum Pending {
    Request { command: &'static str, reply: Reply },
    Subscribe(usize),
}

/// A connection handle backed by a WebSocket.
pub struct WsConnection {
    id: ConnectionId,
    config: Arc<WsConfig>,
    signals: broadcast::Sender<LifecycleSignal>,
    subscriptions: Subscriptions,
    live: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<DriverCommand>,
    driver_rx: Mutex<Option<mpsc::UnboundedReceiver<DriverCommand>>>,
    shutdown: CancellationToken,
}

impl WsConnection {
    /// A handle that has not connected yet.
    pub fn new(id: ConnectionId, config: Arc<WsConfig>) -> Self {
        let (signals, _) = broadcast::channel(16);
        let (commands, driver_rx) = mpsc::unbounded_channel();
        Self {
            id,
            config,
            signals,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(AtomicBool::new(false)),
            commands,
            driver_rx: Mutex::new(Some(driver_rx)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Whether a session is up right now.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    async fn request(&self, command: ClientCommand) -> Result<Value, CommandError> {
        let name = command.name();
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(DriverCommand::Request { command, reply })
            .map_err(|_| CommandError::NotConnected)?;

        match tokio::time::timeout(self.config.command_timeout, rx).await {
            Err(_) => Err(CommandError::Timeout {
                command: name.into(),
                after: self.config.command_timeout,
            }),
            Ok(Err(_)) => Err(CommandError::Disconnected {
                command: name.into(),
            }),
            Ok(Ok(result)) => result,
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.signals.subscribe()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let Some(commands) = self.driver_rx.lock().take() else {
            debug!(connection_id = %self.id, "connect called again, driver already running");
            return Ok(());
        };

        let mut driver = Driver {
            id: self.id.clone(),
            config: Arc::clone(&self.config),
            signals: self.signals.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
            live: Arc::clone(&self.live),
            commands,
            shutdown: self.shutdown.clone(),
            backoff: Backoff::new(self.config.reconnect.clone()),
            next_command_id: 1,
            last_signal: None,
        };

        let Some(first) = driver.handshake().await else {
            return Err(TransportError::Closed);
        };
        let (initial, result) = match first {
            Ok(ws) => (Some(ws), Ok(())),
            Err(err) => {
                warn!(
                    connection_id = %self.id,
                    url = %self.config.url,
                    error = %err,
                    error_kind = err.error_kind(),
                    "initial handshake failed, will retry"
                );
                driver.signal(LifecycleSignal::Disconnected);
                (None, Err(TransportError::from(err)))
            }
        };

        let _ = tokio::spawn(driver.run(initial));
        result
    }

    async fn fetch_cameras(&self) -> Result<Vec<Camera>, CommandError> {
        if !self.is_live() {
            return Err(CommandError::NotConnected);
        }
        let value = self.request(ClientCommand::GetCameras).await?;
        protocol::decode_cameras(value).map_err(|err| CommandError::Decode {
            command: GET_CAMERAS.into(),
            reason: err.to_string(),
        })
    }

    fn subscribe(&self, kind: EventKind, sink: EventSink) -> Subscription {
        let (status, subscription) = subscription_channel(kind);
        let index = {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions.push(SubscriptionEntry { kind, sink, status });
            subscriptions.len() - 1
        };
        // Picked up right away when a session is live; otherwise the next
        // session start covers it.
        let _ = self.commands.send(DriverCommand::Subscribe(index));
        debug!(connection_id = %self.id, event_kind = %kind, "subscription declared");
        subscription
    }

    fn close(&self) {
        debug!(connection_id = %self.id, "closing connection");
        self.shutdown.cancel();
    }
}

/// Creates [`WsConnection`]s sharing one config.
#[derive(Clone, Debug)]
pub struct WsFactory {
    config: Arc<WsConfig>,
}

impl WsFactory {
    /// Factory for `config`.
    pub fn new(config: WsConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl ConnectionFactory for WsFactory {
    fn create(&self, id: ConnectionId) -> Arc<dyn Connection> {
        Arc::new(WsConnection::new(id, Arc::clone(&self.config)))
    }
}

// ── Driver ──────────────────────────────────────────────────────────────

enum Exit {
    Shutdown,
    Lost(WsError),
}

struct Session {
    sink: WsSink,
    pending: HashMap<u64, Pending>,
    routes: HashMap<u64, EventKind>,
    subscribed: HashSet<usize>,
    last_seen: Instant,
}

struct Driver {
    id: ConnectionId,
    config: Arc<WsConfig>,
    signals: broadcast::Sender<LifecycleSignal>,
    subscriptions: Subscriptions,
    live: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    shutdown: CancellationToken,
    backoff: Backoff,
    next_command_id: u64,
    last_signal: Option<LifecycleSignal>,
}

impl Driver {
    #[tracing::instrument(skip_all, name = "ws_driver", fields(connection_id = %self.id, url = %self.config.url))]
    async fn run(mut self, mut initial: Option<WsStream>) {
        loop {
            let ws = match initial.take() {
                Some(ws) => ws,
                None => match self.reconnect().await {
                    Some(ws) => ws,
                    None => break,
                },
            };
            match self.session(ws).await {
                Exit::Shutdown => break,
                Exit::Lost(err) => {
                    warn!(error = %err, error_kind = err.error_kind(), "session lost");
                    self.signal(LifecycleSignal::Disconnected);
                }
            }
        }
        self.live.store(false, Ordering::Release);
        debug!("driver stopped");
    }

    /// Open the socket. `None` when shut down first.
    async fn handshake(&self) -> Option<Result<WsStream, WsError>> {
        let timeout = self.config.connect_timeout;
        let attempt = async {
            let (ws, _response) = tokio::time::timeout(timeout, connect_async(self.config.url.as_str()))
                .await
                .map_err(|_| WsError::HandshakeTimeout(timeout))??;
            Ok::<_, WsError>(ws)
        };
        tokio::select! {
            () = self.shutdown.cancelled() => None,
            result = attempt => Some(result),
        }
    }

    /// Back off and retry until a handshake succeeds. `None` on shutdown.
    async fn reconnect(&mut self) -> Option<WsStream> {
        loop {
            let delay = self.backoff.next_delay();
            debug!(
                attempt = self.backoff.attempt(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting"
            );
            if !self.idle(delay).await {
                return None;
            }
            match self.handshake().await? {
                Ok(ws) => return Some(ws),
                Err(err) => {
                    warn!(error = %err, error_kind = err.error_kind(), "reconnect failed");
                    self.signal(LifecycleSignal::Disconnected);
                }
            }
        }
    }

    /// Sleep for `delay` while turning away commands. Returns false on
    /// shutdown or when the handle is gone.
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    None => return false,
                    Some(DriverCommand::Request { reply, .. }) => {
                        let _ = reply.send(Err(CommandError::NotConnected));
                    }
                    Some(DriverCommand::Subscribe(_)) => {}
                },
            }
        }
    }

    async fn session(&mut self, ws: WsStream) -> Exit {
        let (sink, mut stream) = ws.split();
        let mut session = Session {
            sink,
            pending: HashMap::new(),
            routes: HashMap::new(),
            subscribed: HashSet::new(),
            last_seen: Instant::now(),
        };

        let declared = self.subscriptions.lock().len();
        let mut exit = None;
        for index in 0..declared {
            if let Err(err) = self.subscribe(&mut session, index).await {
                exit = Some(Exit::Lost(err));
                break;
            }
        }

        let exit = match exit {
            Some(exit) => exit,
            None => {
                self.backoff.reset();
                self.live.store(true, Ordering::Release);
                info!(subscriptions = session.subscribed.len(), "session established");
                self.signal(LifecycleSignal::Connected);
                self.pump(&mut session, &mut stream).await
            }
        };

        self.live.store(false, Ordering::Release);
        if matches!(exit, Exit::Shutdown) {
            let _ = session.sink.send(Message::Close(None)).await;
        }
        self.end_session(session);
        exit
    }

    async fn pump(
        &mut self,
        session: &mut Session,
        stream: &mut futures::stream::SplitStream<WsStream>,
    ) -> Exit {
        let heartbeat = self.config.heartbeat_interval;
        let mut ticker = heartbeat.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Exit::Shutdown,
                message = stream.next() => {
                    session.last_seen = Instant::now();
                    match message {
                        Some(Ok(Message::Text(text))) => self.route(session, text.as_str()),
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.as_str().to_string());
                            return Exit::Lost(WsError::ClosedByServer(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Exit::Lost(err.into()),
                        None => return Exit::Lost(WsError::StreamEnded),
                    }
                }
                command = self.commands.recv() => match command {
                    None => return Exit::Shutdown,
                    Some(DriverCommand::Request { command, reply }) => {
                        let _ = prune_abandoned(&mut session.pending);
                        match self.send(session, &command).await {
                            Ok(id) => {
                                let _ = session.pending.insert(id, Pending::Request { command: command.name(), reply });
                            }
                            Err(err) => {
                                let _ = reply.send(Err(CommandError::Disconnected { command: command.name().into() }));
                                return Exit::Lost(err);
                            }
                        }
                    }
                    Some(DriverCommand::Subscribe(index)) => {
                        if let Err(err) = self.subscribe(session, index).await {
                            return Exit::Lost(err);
                        }
                    }
                },
                () = tick(&mut ticker) => {
                    let _ = prune_abandoned(&mut session.pending);
                    if let Some(period) = heartbeat {
                        let limit = period * STALE_AFTER_HEARTBEATS;
                        if session.last_seen.elapsed() > limit {
                            return Exit::Lost(WsError::Stale(limit));
                        }
                    }
                    if let Err(err) = session.sink.send(Message::Ping(Vec::new().into())).await {
                        return Exit::Lost(err.into());
                    }
                }
            }
        }
    }

    async fn send(&mut self, session: &mut Session, command: &ClientCommand) -> Result<u64, WsError> {
        let command_id = self.next_command_id;
        self.next_command_id += 1;
        let text = ClientFrame { command_id, command }.to_text()?;
        session.sink.send(Message::Text(text.into())).await?;
        Ok(command_id)
    }

    /// Send the subscribe command for `index` unless this session already
    /// did.
    async fn subscribe(&mut self, session: &mut Session, index: usize) -> Result<(), WsError> {
        if session.subscribed.contains(&index) {
            return Ok(());
        }
        let kind = self.subscriptions.lock().get(index).map(|entry| entry.kind);
        let Some(kind) = kind else {
            return Ok(());
        };

        let command = ClientCommand::SubscribeEvent {
            event: self.config.event_name(kind).to_string(),
        };
        let command_id = self.send(session, &command).await?;
        let _ = session.subscribed.insert(index);
        let _ = session.pending.insert(command_id, Pending::Subscribe(index));
        let _ = session.routes.insert(command_id, kind);
        debug!(command_id, event_kind = %kind, "subscribe sent");
        Ok(())
    }

    fn route(&self, session: &mut Session, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "ignoring unparseable frame");
                return;
            }
        };

        match frame {
            ServerFrame::Result {
                command_id,
                success,
                result,
                error,
            } => match session.pending.remove(&command_id) {
                Some(Pending::Request { command, reply }) => {
                    let outcome = if success {
                        Ok(result)
                    } else {
                        let error = error.unwrap_or_default();
                        Err(CommandError::Rejected {
                            command: command.into(),
                            code: error.code,
                            message: error.message,
                        })
                    };
                    let _ = reply.send(outcome);
                }
                Some(Pending::Subscribe(index)) => {
                    let status = if success {
                        SubscriptionStatus::Active
                    } else {
                        let _ = session.routes.remove(&command_id);
                        let message = error.map_or_else(|| "rejected".to_string(), |e| e.message);
                        warn!(command_id, reason = %message, "subscription rejected");
                        SubscriptionStatus::Failed(message)
                    };
                    self.set_status(index, status);
                }
                None => debug!(command_id, "result for unknown command"),
            },
            ServerFrame::Event { command_id, event } => {
                let kind = command_id
                    .and_then(|id| session.routes.get(&id).copied())
                    .or_else(|| self.config.kind_for(&event.name));
                let Some(kind) = kind else {
                    debug!(name = %event.name, "event without subscription");
                    return;
                };
                match protocol::decode_event(kind, event.data) {
                    Ok(event) => self.deliver(&event),
                    Err(err) => {
                        warn!(event_kind = %kind, name = %event.name, error = %err, "malformed event payload, dropping");
                    }
                }
            }
            ServerFrame::Unknown => debug!("ignoring frame of unknown type"),
        }
    }

    fn deliver(&self, event: &SyncEvent) {
        let kind = event.kind();
        for entry in self.subscriptions.lock().iter().filter(|e| e.kind == kind) {
            let _ = entry.sink.send(event.clone());
        }
    }

    fn set_status(&self, index: usize, status: SubscriptionStatus) {
        if let Some(entry) = self.subscriptions.lock().get(index) {
            let _ = entry.status.send_replace(status);
        }
    }

    /// Fail whatever was still waiting on the session and mark confirmed
    /// subscriptions pending again until the next session re-sends them.
    fn end_session(&self, session: Session) {
        for (_, pending) in session.pending {
            match pending {
                Pending::Request { command, reply } => {
                    let _ = reply.send(Err(CommandError::Disconnected {
                        command: command.into(),
                    }));
                }
                Pending::Subscribe(index) => {
                    self.set_status(index, SubscriptionStatus::Failed("session ended".into()));
                }
            }
        }
        for entry in self.subscriptions.lock().iter() {
            let _ = entry.status.send_if_modified(|status| {
                let confirmed = *status == SubscriptionStatus::Active;
                if confirmed {
                    *status = SubscriptionStatus::Pending;
                }
                confirmed
            });
        }
    }

    /// Emit `signal` unless it repeats the last one.
    fn signal(&mut self, signal: LifecycleSignal) {
        if self.last_signal == Some(signal) {
            return;
        }
        self.last_signal = Some(signal);
        debug!(signal = signal.as_str(), "lifecycle signal");
        let _ = self.signals.send(signal);
    }
}

/// Forget requests whose caller stopped waiting, e.g. after a command
/// timeout. A late result for one of them is logged as unknown.
fn prune_abandoned(pending: &mut HashMap<u64, Pending>) -> usize {
    let before = pending.len();
    pending.retain(|_, entry| !matches!(entry, Pending::Request { reply, .. } if reply.is_closed()));
    let pruned = before - pending.len();
    if pruned > 0 {
        debug!(pruned, "dropped abandoned requests");
    }
    pruned
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            let _ = ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
