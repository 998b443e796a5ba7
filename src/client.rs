//! Telemetry client and runtime loops.
//!
//! The [`ClientBuilder`] configures host, port, timeouts and polling
//! behavior; [`ClientBuilder::connect`] dials the server and starts the
//! worker pair:
//!
//! ```text
//! caller ──┐
//! pollers ─┼─► mpsc ─► writer task ─► TCP ─► reader task ─► pending registry
//! caller ◄─┴──────────────── oneshot per request ◄──────────────┘
//! ```
//!
//! Request methods register a pending entry, queue the encoded frame and
//! await the response with a timeout bound. The reader task owns the frame
//! scanner; every decoded message completes a pending wait or is reported as
//! a response for an unknown request. Periodic polls (heartbeat, telemetry,
//! station state, nearest station) are interval tasks that call the same
//! request methods and publish results on the event channel.
//!
//! # Example
//!
//! ```ignore
//! use ridewire::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> ridewire::Result<()> {
//!     let client = ClientBuilder::new("localhost").connect().await?;
//!     let version = client.version().await?;
//!     println!("server version {version}");
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};

use crate::data::{CoasterAndStation, StationState, Telemetry, Version};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ErrorEvent, ErrorKind};
use crate::pending::PendingRequests;
use crate::protocol::{FrameScanner, Message, MessageType};
use crate::writer::{spawn_writer, WriterHandle};

/// Default TCP port of the telemetry server.
pub const DEFAULT_PORT: u16 = 15151;

/// Default window a request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default interval between keep-alive messages.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10_000);

/// Default window a keep-alive waits before deciding the server is gone.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Event channel depth; slow subscribers see lagged errors, not lost polls.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Socket read chunk size.
const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Builder for configuring and connecting a [`TelemetryClient`].
pub struct ClientBuilder {
    host: String,
    port: u16,
    request_timeout: Duration,
    heartbeat: bool,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    station_state_follows_nearest: bool,
}

impl ClientBuilder {
    /// Create a builder for the given host with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            station_state_follows_nearest: false,
        }
    }

    /// TCP port of the telemetry server. Default: 15151.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Time a request waits for its response. Default: 30 s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Whether to send keep-alive messages automatically. Default: enabled.
    pub fn heartbeat(mut self, enabled: bool) -> Self {
        self.heartbeat = enabled;
        self
    }

    /// Interval between keep-alive messages. Default: 10 s.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Time a keep-alive waits for its Ok. Default: 5 s.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Make station-state polling substitute the server-reported nearest
    /// coaster/station for the configured pair. Default: off.
    pub fn station_state_follows_nearest(mut self, follows: bool) -> Self {
        self.station_state_follows_nearest = follows;
        self
    }

    /// Open the TCP connection and start the worker tasks.
    pub async fn connect(self) -> Result<TelemetryClient> {
        tracing::info!(host = %self.host, port = self.port, "connecting to telemetry server");
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (shutdown_tx, _) = broadcast::channel(1);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (writer, writer_task) = spawn_writer(write_half, shutdown_tx.subscribe());

        let shared = Arc::new(Shared {
            writer,
            pending: PendingRequests::new(),
            next_request_id: AtomicU32::new(1),
            connected: AtomicBool::new(true),
            request_timeout: self.request_timeout,
            heartbeat_timeout: self.heartbeat_timeout,
            events_tx,
            shutdown_tx,
            last_error: Mutex::new(None),
            targets: Mutex::new(PollTargets::new(self.station_state_follows_nearest)),
        });

        let reader_task = tokio::spawn(reader_loop(
            shared.clone(),
            read_half,
            shared.shutdown_tx.subscribe(),
        ));

        let mut tasks = Tasks {
            reader: Some(reader_task),
            writer: Some(writer_task),
            ..Tasks::default()
        };
        if self.heartbeat {
            let loop_shared = shared.clone();
            let shutdown = shared.shutdown_tx.subscribe();
            let interval = self.heartbeat_interval;
            tasks.heartbeat = Some(PollTask::spawn(move |stop| {
                heartbeat_loop(loop_shared, interval, stop, shutdown)
            }));
        }

        Ok(TelemetryClient {
            shared,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Station-state poll target and last-observed nearest pair. `-1` means
/// unknown.
struct PollTargets {
    station_coaster: i32,
    station_station: i32,
    nearest_coaster: i32,
    nearest_station: i32,
    follows_nearest: bool,
}

impl PollTargets {
    fn new(follows_nearest: bool) -> Self {
        Self {
            station_coaster: -1,
            station_station: -1,
            nearest_coaster: -1,
            nearest_station: -1,
            follows_nearest,
        }
    }

    fn nearest_set(&self) -> bool {
        self.nearest_coaster >= 0 && self.nearest_station >= 0
    }
}

/// State shared between the public API, the worker tasks and the pollers.
struct Shared {
    writer: WriterHandle,
    pending: PendingRequests,
    next_request_id: AtomicU32,
    connected: AtomicBool,
    request_timeout: Duration,
    heartbeat_timeout: Duration,
    events_tx: broadcast::Sender<ClientEvent>,
    shutdown_tx: broadcast::Sender<()>,
    last_error: Mutex<Option<ErrorEvent>>,
    targets: Mutex<PollTargets>,
}

impl Shared {
    fn new_request(&self, message_type: MessageType) -> Message {
        // Wrapping increment; collisions past 2^32 overlapping requests are
        // out of scope.
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        Message::new(message_type, id)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Record an error, publish it as an event and hand it back.
    fn report(&self, request_id: Option<u32>, error: ClientError) -> ClientError {
        let kind = match error {
            ClientError::Server(_) => ErrorKind::Server,
            _ => ErrorKind::Client,
        };
        let record = ErrorEvent {
            request_id,
            kind,
            message: error.to_string(),
        };
        tracing::warn!(?request_id, "{}", record.message);
        *self.last_error.lock().expect("last error lock poisoned") = Some(record.clone());
        self.emit(ClientEvent::Error(record));
        error
    }

    /// Tear the connection down: no new requests, stop both worker loops,
    /// wake every pending waiter.
    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!(pending = self.pending.len(), "disconnecting");
        let _ = self.shutdown_tx.send(());
        self.pending.fail_all();
    }

    /// Send a request and wait for the correspondingly-typed response.
    ///
    /// The pending entry is registered before the frame is queued so the
    /// response can never race past it. An Error reply maps to
    /// `ClientError::Server`, any other unexpected type to
    /// `UnexpectedResponse`.
    async fn round_trip(
        &self,
        request: Message,
        expected: MessageType,
        wait: Duration,
    ) -> Result<Message> {
        self.ensure_connected()?;
        let request_id = request.request_id();
        let rx = self.pending.register(request_id)?;

        if let Err(e) = self.writer.send(request.encode()).await {
            self.pending.abandon(request_id);
            return Err(e);
        }

        let response = match timeout(wait, rx).await {
            Ok(Ok(response)) => response,
            // Sender dropped: the connection was torn down underneath us.
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.abandon(request_id);
                return Err(ClientError::Timeout);
            }
        };

        match response.message_type() {
            MessageType::Error => Err(ClientError::Server(response.as_string()?)),
            actual if actual == expected => Ok(response),
            actual => Err(ClientError::UnexpectedResponse { expected, actual }),
        }
    }

    /// Issue a command and wait for its Ok.
    async fn command(&self, request: Message, wait: Duration) -> Result<()> {
        let request_id = request.request_id();
        match self.round_trip(request, MessageType::Ok, wait).await {
            Ok(_) => {
                self.emit(ClientEvent::OkReceived { request_id });
                Ok(())
            }
            Err(e) => Err(self.report(Some(request_id), e)),
        }
    }

    async fn version(&self) -> Result<Version> {
        let request = self.new_request(MessageType::GetVersion);
        let request_id = request.request_id();
        let result = match self
            .round_trip(request, MessageType::Version, self.request_timeout)
            .await
        {
            Ok(response) => Version::from_payload(response.payload()),
            Err(e) => Err(e),
        };
        match result {
            Ok(version) => {
                self.emit(ClientEvent::VersionReceived {
                    request_id,
                    version,
                });
                Ok(version)
            }
            Err(e) => Err(self.report(Some(request_id), e)),
        }
    }

    async fn telemetry(&self) -> Result<Telemetry> {
        let request = self.new_request(MessageType::GetTelemetry);
        let request_id = request.request_id();
        let result = match self
            .round_trip(request, MessageType::Telemetry, self.request_timeout)
            .await
        {
            Ok(response) => Telemetry::from_payload(response.payload()),
            Err(e) => Err(e),
        };
        match result {
            Ok(telemetry) => {
                self.emit(ClientEvent::TelemetryReceived {
                    request_id,
                    telemetry,
                });
                Ok(telemetry)
            }
            Err(e) => Err(self.report(Some(request_id), e)),
        }
    }

    async fn coaster_count(&self) -> Result<i32> {
        let request = self.new_request(MessageType::GetCoasterCount);
        let request_id = request.request_id();
        let result = match self
            .round_trip(request, MessageType::IntValue, self.request_timeout)
            .await
        {
            Ok(response) => response.as_i32(),
            Err(e) => Err(e),
        };
        match result {
            Ok(count) => {
                self.emit(ClientEvent::CoasterCountReceived { request_id, count });
                Ok(count)
            }
            Err(e) => Err(self.report(Some(request_id), e)),
        }
    }

    async fn coaster_name(&self, index: i32) -> Result<String> {
        let request = self.new_request(MessageType::GetCoasterName).with_i32(index);
        let request_id = request.request_id();
        let result = match self
            .round_trip(request, MessageType::String, self.request_timeout)
            .await
        {
            Ok(response) => response.as_string(),
            Err(e) => Err(e),
        };
        match result {
            Ok(name) => {
                self.emit(ClientEvent::CoasterNameReceived {
                    request_id,
                    index,
                    name: name.clone(),
                });
                Ok(name)
            }
            Err(e) => Err(self.report(Some(request_id), e)),
        }
    }

    /// Request the current coaster and nearest station without publishing
    /// the received event; the nearest-station poll uses this directly.
    async fn fetch_nearest(&self) -> Result<(u32, CoasterAndStation)> {
        let request = self.new_request(MessageType::GetCurrentCoasterAndNearestStation);
        let request_id = request.request_id();
        let result = match self
            .round_trip(request, MessageType::IntValuePair, self.request_timeout)
            .await
        {
            Ok(response) => response.as_int_pair(),
            Err(e) => Err(e),
        };
        match result {
            Ok((coaster, station)) => Ok((request_id, CoasterAndStation::new(coaster, station))),
            Err(e) => Err(self.report(Some(request_id), e)),
        }
    }

    async fn current_coaster_and_nearest_station(&self) -> Result<CoasterAndStation> {
        let (request_id, pair) = self.fetch_nearest().await?;
        self.emit(ClientEvent::CurrentCoasterAndStationReceived { request_id, pair });
        Ok(pair)
    }

    async fn station_state(&self, coaster: i32, station: i32) -> Result<StationState> {
        let request = self
            .new_request(MessageType::GetStationState)
            .with_i32(coaster)
            .with_i32(station);
        let request_id = request.request_id();
        let result = match self
            .round_trip(request, MessageType::StationState, self.request_timeout)
            .await
        {
            Ok(response) => StationState::from_payload(response.payload()),
            Err(e) => Err(e),
        };
        match result {
            Ok(state) => {
                self.emit(ClientEvent::StationStateReceived {
                    request_id,
                    coaster,
                    station,
                    state,
                });
                Ok(state)
            }
            Err(e) => Err(self.report(Some(request_id), e)),
        }
    }
}

/// Reader loop: sole owner of the read half and the frame scanner.
///
/// Every decoded message completes a pending wait or is reported as a
/// response for an unknown request (non-fatal). Scanner errors are fatal:
/// the loop reports them, tears the connection down and stops.
async fn reader_loop<R>(shared: Arc<Shared>, mut reader: R, mut shutdown: broadcast::Receiver<()>)
where
    R: AsyncRead + Unpin,
{
    let mut scanner = FrameScanner::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    shared.report(None, ClientError::ConnectionClosed);
                    break;
                }
                Ok(n) => match scanner.push(&buf[..n]) {
                    Ok(messages) => {
                        for message in messages {
                            tracing::trace!(
                                message_type = ?message.message_type(),
                                request_id = message.request_id(),
                                "received message"
                            );
                            if let Err(orphan) = shared.pending.deliver(message) {
                                shared.report(
                                    Some(orphan.request_id()),
                                    ClientError::UnknownRequestId(orphan.request_id()),
                                );
                            }
                        }
                    }
                    Err(e) => {
                        shared.report(None, e);
                        break;
                    }
                },
                Err(e) => {
                    shared.report(None, ClientError::Connection(e));
                    break;
                }
            }
        }
    }

    shared.disconnect();
    tracing::debug!("reader task exiting");
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    period: Duration,
    mut stop: broadcast::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let request = shared.new_request(MessageType::Idle);
                let _ = shared.command(request, shared.heartbeat_timeout).await;
            }
        }
    }
}

async fn telemetry_loop(
    shared: Arc<Shared>,
    period: Duration,
    mut stop: broadcast::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let _ = shared.telemetry().await;
            }
        }
    }
}

async fn station_state_loop(
    shared: Arc<Shared>,
    period: Duration,
    mut stop: broadcast::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let follows = shared
                    .targets
                    .lock()
                    .expect("targets lock poisoned")
                    .follows_nearest;
                if follows {
                    // Resolve the nearest pair fresh for this tick; fall back
                    // to the last pair the nearest poll observed.
                    if let Ok((_, pair)) = shared.fetch_nearest().await {
                        let mut targets = shared.targets.lock().expect("targets lock poisoned");
                        targets.station_coaster = pair.coaster;
                        targets.station_station = pair.station;
                    } else {
                        let mut targets = shared.targets.lock().expect("targets lock poisoned");
                        if targets.nearest_set() {
                            targets.station_coaster = targets.nearest_coaster;
                            targets.station_station = targets.nearest_station;
                        }
                    }
                }
                let (coaster, station) = {
                    let targets = shared.targets.lock().expect("targets lock poisoned");
                    (targets.station_coaster, targets.station_station)
                };
                if coaster >= 0 && station >= 0 {
                    let _ = shared.station_state(coaster, station).await;
                }
            }
        }
    }
}

async fn nearest_station_loop(
    shared: Arc<Shared>,
    period: Duration,
    mut stop: broadcast::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let Ok((_, pair)) = shared.fetch_nearest().await else {
                    continue;
                };
                let changed = {
                    let mut targets = shared.targets.lock().expect("targets lock poisoned");
                    let changed = targets.nearest_coaster != pair.coaster
                        || targets.nearest_station != pair.station;
                    targets.nearest_coaster = pair.coaster;
                    targets.nearest_station = pair.station;
                    changed
                };
                if changed {
                    let coaster_name = shared.coaster_name(pair.coaster).await.ok();
                    let telemetry = shared.telemetry().await.ok();
                    shared.emit(ClientEvent::CurrentCoasterOrStationChanged {
                        pair,
                        coaster_name,
                        telemetry,
                    });
                }
            }
        }
    }
}

/// A running periodic poll.
struct PollTask {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn spawn<F, Fut>(make: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(make(stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the loop to stop. No further ticks fire; an in-flight tick
    /// body completes on its own.
    fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<Result<()>>>,
    heartbeat: Option<PollTask>,
    telemetry: Option<PollTask>,
    station_state: Option<PollTask>,
    nearest: Option<PollTask>,
}

/// Client for the telemetry server.
///
/// Lifecycle: built and connected through [`ClientBuilder`]; terminal after
/// [`TelemetryClient::shutdown`] — a new client is required to reconnect.
pub struct TelemetryClient {
    shared: Arc<Shared>,
    tasks: Mutex<Tasks>,
}

impl TelemetryClient {
    /// Connect to `host` on the default port with default settings.
    pub async fn connect(host: impl Into<String>) -> Result<Self> {
        ClientBuilder::new(host).connect().await
    }

    /// Subscribe to the client's event channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Whether the connection is still usable.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// The most recent recorded error, if any.
    pub fn last_error(&self) -> Option<ErrorEvent> {
        self.shared
            .last_error
            .lock()
            .expect("last error lock poisoned")
            .clone()
    }

    /// Get the server application version.
    pub async fn version(&self) -> Result<Version> {
        self.shared.version().await
    }

    /// Get one common telemetry snapshot.
    pub async fn telemetry(&self) -> Result<Telemetry> {
        self.shared.telemetry().await
    }

    /// Get the number of coasters.
    pub async fn coaster_count(&self) -> Result<i32> {
        self.shared.coaster_count().await
    }

    /// Get the name of the coaster at `index` (0-based; see
    /// [`TelemetryClient::coaster_count`]).
    pub async fn coaster_name(&self, index: i32) -> Result<String> {
        self.shared.coaster_name(index).await
    }

    /// Get the current coaster index and nearest station index.
    pub async fn current_coaster_and_nearest_station(&self) -> Result<CoasterAndStation> {
        self.shared.current_coaster_and_nearest_station().await
    }

    /// Get the state of a specific station.
    pub async fn station_state(&self, coaster: i32, station: i32) -> Result<StationState> {
        self.shared.station_state(coaster, station).await
    }

    /// Send a keep-alive message and wait for its Ok, bounded by the
    /// request timeout.
    pub async fn heartbeat(&self) -> Result<()> {
        let request = self.shared.new_request(MessageType::Idle);
        self.shared
            .command(request, self.shared.request_timeout)
            .await
    }

    /// Send a keep-alive message with an explicit wait window.
    pub async fn heartbeat_with_timeout(&self, wait: Duration) -> Result<()> {
        let request = self.shared.new_request(MessageType::Idle);
        self.shared.command(request, wait).await
    }

    /// Set the emergency stop.
    pub async fn set_emergency_stop(&self, stop: bool) -> Result<()> {
        let request = self
            .shared
            .new_request(MessageType::SetEmergencyStop)
            .with_bool(stop);
        self.shared
            .command(request, self.shared.request_timeout)
            .await
    }

    /// Switch a station between manual and automatic dispatch mode.
    pub async fn set_manual_mode(&self, coaster: i32, station: i32, manual: bool) -> Result<()> {
        self.station_command(MessageType::SetManualMode, coaster, station, manual)
            .await
    }

    /// Dispatch a train in manual mode.
    pub async fn dispatch(&self, coaster: i32, station: i32) -> Result<()> {
        let request = self
            .shared
            .new_request(MessageType::Dispatch)
            .with_i32(coaster)
            .with_i32(station);
        self.shared
            .command(request, self.shared.request_timeout)
            .await
    }

    /// Open or close the gates in manual mode.
    pub async fn set_gates(&self, coaster: i32, station: i32, open: bool) -> Result<()> {
        self.station_command(MessageType::SetGates, coaster, station, open)
            .await
    }

    /// Open or close the harness in manual mode.
    pub async fn set_harness(&self, coaster: i32, station: i32, open: bool) -> Result<()> {
        self.station_command(MessageType::SetHarness, coaster, station, open)
            .await
    }

    /// Lower (ready to dispatch) or raise (loading) the platform in manual
    /// mode.
    pub async fn set_platform(&self, coaster: i32, station: i32, lowered: bool) -> Result<()> {
        self.station_command(MessageType::SetPlatform, coaster, station, lowered)
            .await
    }

    /// Lock or unlock the flyer car in manual mode.
    pub async fn set_flyer_car(&self, coaster: i32, station: i32, locked: bool) -> Result<()> {
        self.station_command(MessageType::SetFlyerCar, coaster, station, locked)
            .await
    }

    async fn station_command(
        &self,
        message_type: MessageType,
        coaster: i32,
        station: i32,
        flag: bool,
    ) -> Result<()> {
        let request = self
            .shared
            .new_request(message_type)
            .with_i32(coaster)
            .with_i32(station)
            .with_bool(flag);
        self.shared
            .command(request, self.shared.request_timeout)
            .await
    }

    /// Start requesting telemetry on an interval, publishing each snapshot
    /// as a [`ClientEvent::TelemetryReceived`]. Replaces a running poll.
    pub fn start_telemetry(&self, interval: Duration) {
        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown_tx.subscribe();
        let task = PollTask::spawn(move |stop| telemetry_loop(shared, interval, stop, shutdown));
        let replaced = self
            .tasks
            .lock()
            .expect("tasks lock poisoned")
            .telemetry
            .replace(task);
        if let Some(old) = replaced {
            old.stop();
        }
    }

    /// Stop the telemetry poll.
    pub fn stop_telemetry(&self) {
        let task = self
            .tasks
            .lock()
            .expect("tasks lock poisoned")
            .telemetry
            .take();
        if let Some(task) = task {
            task.stop();
        }
    }

    /// Start polling a station's state on an interval. With follow-nearest
    /// enabled the configured pair is replaced by the last observed nearest
    /// pair on each tick.
    pub fn start_station_state(&self, interval: Duration, coaster: i32, station: i32) {
        {
            let mut targets = self.shared.targets.lock().expect("targets lock poisoned");
            targets.station_coaster = coaster;
            targets.station_station = station;
        }
        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown_tx.subscribe();
        let task =
            PollTask::spawn(move |stop| station_state_loop(shared, interval, stop, shutdown));
        let replaced = self
            .tasks
            .lock()
            .expect("tasks lock poisoned")
            .station_state
            .replace(task);
        if let Some(old) = replaced {
            old.stop();
        }
    }

    /// Stop the station-state poll.
    pub fn stop_station_state(&self) {
        let task = self
            .tasks
            .lock()
            .expect("tasks lock poisoned")
            .station_state
            .take();
        if let Some(task) = task {
            task.stop();
        }
    }

    /// Whether station-state polling follows the nearest coaster/station.
    pub fn set_station_state_follows_nearest(&self, follows: bool) {
        self.shared
            .targets
            .lock()
            .expect("targets lock poisoned")
            .follows_nearest = follows;
    }

    /// Start polling the current coaster and nearest station on an
    /// interval. A changed pair publishes
    /// [`ClientEvent::CurrentCoasterOrStationChanged`] with the coaster name
    /// and a fresh telemetry snapshot.
    pub fn start_nearest_station(&self, interval: Duration) {
        {
            let mut targets = self.shared.targets.lock().expect("targets lock poisoned");
            targets.nearest_coaster = -1;
            targets.nearest_station = -1;
        }
        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown_tx.subscribe();
        let task =
            PollTask::spawn(move |stop| nearest_station_loop(shared, interval, stop, shutdown));
        let replaced = self
            .tasks
            .lock()
            .expect("tasks lock poisoned")
            .nearest
            .replace(task);
        if let Some(old) = replaced {
            old.stop();
        }
    }

    /// Stop the nearest-station poll and forget the observed pair.
    pub fn stop_nearest_station(&self) {
        let task = self
            .tasks
            .lock()
            .expect("tasks lock poisoned")
            .nearest
            .take();
        if let Some(task) = task {
            task.stop();
        }
        let mut targets = self.shared.targets.lock().expect("targets lock poisoned");
        targets.nearest_coaster = -1;
        targets.nearest_station = -1;
    }

    /// Shut the client down: stop every poll, stop both worker tasks, close
    /// the socket and wake pending waiters. Terminal; subsequent requests
    /// fail with `NotConnected`.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down telemetry client");
        let Tasks {
            reader,
            writer,
            heartbeat,
            telemetry,
            station_state,
            nearest,
        } = std::mem::take(&mut *self.tasks.lock().expect("tasks lock poisoned"));

        let pollers = [heartbeat, telemetry, station_state, nearest];
        for poll in pollers.iter().flatten() {
            poll.stop();
        }
        self.shared.disconnect();

        for poll in pollers.into_iter().flatten() {
            let _ = poll.handle.await;
        }
        if let Some(handle) = reader {
            let _ = handle.await;
        }
        if let Some(handle) = writer {
            let _ = handle.await;
        }
    }
}

impl Drop for TelemetryClient {
    fn drop(&mut self) {
        // Best effort: make sure no worker outlives a client that was
        // dropped without an explicit shutdown.
        self.shared.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::new("localhost");
        assert_eq!(builder.port, DEFAULT_PORT);
        assert_eq!(builder.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(builder.heartbeat);
        assert_eq!(builder.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(builder.heartbeat_timeout, DEFAULT_HEARTBEAT_TIMEOUT);
        assert!(!builder.station_state_follows_nearest);
    }

    #[test]
    fn test_builder_configuration() {
        let builder = ClientBuilder::new("example.invalid")
            .port(6000)
            .request_timeout(Duration::from_secs(5))
            .heartbeat(false)
            .heartbeat_interval(Duration::from_secs(2))
            .heartbeat_timeout(Duration::from_secs(1))
            .station_state_follows_nearest(true);

        assert_eq!(builder.port, 6000);
        assert_eq!(builder.request_timeout, Duration::from_secs(5));
        assert!(!builder.heartbeat);
        assert_eq!(builder.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(builder.heartbeat_timeout, Duration::from_secs(1));
        assert!(builder.station_state_follows_nearest);
    }

    #[test]
    fn test_poll_targets_nearest_tracking() {
        let mut targets = PollTargets::new(true);
        assert!(!targets.nearest_set());

        targets.nearest_coaster = 2;
        assert!(!targets.nearest_set());

        targets.nearest_station = 0;
        assert!(targets.nearest_set());
    }
}
