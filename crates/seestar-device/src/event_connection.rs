//! Persistent connection to the telescope's event port.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      EventConnection                       │
//! │                                                            │
//! │  ┌──────────────────┐        ┌──────────────────────────┐  │
//! │  │   Public API     │        │   Background Task        │  │
//! │  │                  │        │                          │  │
//! │  │ send_command() ──┼──cmd──▶│ read lines → StateTree   │  │
//! │  │ snapshot()     ◀─┼─watch──│ heartbeat every interval │  │
//! │  │ state()        ◀─┼─watch──│ silence → reconnect      │  │
//! │  │ event_receiver ◀─┼──evt───│ N failures → Failed      │  │
//! │  └──────────────────┘        └──────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The background task is the only writer of the state tree. Every applied
//! event publishes a fresh [`StateSnapshot`]; a lost connection publishes an
//! empty one, and each new session starts from an empty tree.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

use seestar_core::config::EventSettings;
use seestar_core::events::DeviceMessage;
use seestar_core::prelude::*;
use seestar_core::state_tree::{StateSnapshot, StateTree};

use crate::protocol::{parse_device_message, DeviceCommand};
use crate::reader::LineReader;

/// Capacity of the lifecycle notification channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the outbound command channel
const CMD_CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// State and notifications
// ---------------------------------------------------------------------------

/// Connection status as seen by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Session ended, reconnection not yet started
    Disconnected,
    Reconnecting { attempt: u32 },
    /// Reconnection gave up; the connection will not recover on its own
    Failed { attempts: u32 },
    /// Closed by the caller
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// No further transitions will happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Failed { .. } | ConnectionState::Closed
        )
    }
}

/// Lifecycle notification delivered through [`EventConnection::event_receiver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, max_attempts: u32 },
    Failed { attempts: u32 },
    Closed,
}

/// Why one session's io loop returned
enum SessionEnd {
    Shutdown,
    Lost(Error),
}

/// Sending halves shared by the background task
struct Publishers {
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: watch::Sender<Arc<StateSnapshot>>,
    event_tx: mpsc::Sender<ConnectionEvent>,
}

impl Publishers {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn notify(&self, event: ConnectionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!("Dropping connection event: {}", e);
        }
    }

    fn publish(&self, tree: &StateTree) {
        self.snapshot_tx.send_replace(Arc::new(tree.snapshot()));
    }
}

// ---------------------------------------------------------------------------
// EventConnection
// ---------------------------------------------------------------------------

/// Handle to the event port.
///
/// Dropping the handle stops the background task.
pub struct EventConnection {
    addr: String,
    cmd_tx: mpsc::Sender<DeviceCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    snapshot_rx: watch::Receiver<Arc<StateSnapshot>>,
    event_rx: mpsc::Receiver<ConnectionEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for EventConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConnection")
            .field("addr", &self.addr)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl EventConnection {
    /// Connect to `addr` (`host:port`) and start the background task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailure`] if the first connection cannot be
    /// established within the configured timeout. Later losses are handled
    /// by reconnecting.
    pub async fn connect(addr: impl Into<String>, settings: EventSettings) -> Result<Self> {
        let addr = addr.into();

        info!("Connecting to event port at {}", addr);
        let stream = connect_stream(&addr, settings.connect_timeout()).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(StateSnapshot::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let publishers = Publishers {
            state_tx,
            snapshot_tx,
            event_tx,
        };
        publishers.notify(ConnectionEvent::Connected);

        let task = tokio::spawn(run_connection_task(
            addr.clone(),
            stream,
            settings,
            cmd_rx,
            publishers,
            shutdown_rx,
        ));

        Ok(Self {
            addr,
            cmd_tx,
            state_rx,
            snapshot_rx,
            event_rx,
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    /// Current reconstructed state. Empty while disconnected.
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot
    pub fn snapshot_receiver(&self) -> watch::Receiver<Arc<StateSnapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Lifecycle notifications, oldest first
    pub fn event_receiver(&mut self) -> &mut mpsc::Receiver<ConnectionEvent> {
        &mut self.event_rx
    }

    /// Queue a request for the event socket. Replies are not correlated;
    /// they arrive as ordinary lines and are logged.
    pub async fn send_command(&self, command: DeviceCommand) -> Result<()> {
        if self.state_rx.borrow().is_terminal() {
            return Err(Error::Closed);
        }
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Stop the background task and wait for it to finish.
    pub async fn close(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Event connection task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for EventConnection {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

async fn run_connection_task(
    addr: String,
    stream: TcpStream,
    settings: EventSettings,
    mut cmd_rx: mpsc::Receiver<DeviceCommand>,
    publishers: Publishers,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut stream = stream;
    let mut request_id: u64 = 0;

    loop {
        let end = run_io_loop(
            stream,
            &settings,
            &mut cmd_rx,
            &publishers,
            &mut shutdown_rx,
            &mut request_id,
        )
        .await;

        // the session's tree is gone either way
        publishers.publish(&StateTree::new());

        let reason = match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost(reason) => reason,
        };

        if reason.is_connection_loss() {
            warn!("Event connection to {} lost: {}", addr, reason);
        } else {
            error!("Event connection to {} ended unexpectedly: {}", addr, reason);
        }
        publishers.set_state(ConnectionState::Disconnected);
        publishers.notify(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });

        match reconnect(&addr, &settings, &publishers, &mut shutdown_rx).await {
            Ok(Some(next)) => {
                info!("Event connection to {} re-established", addr);
                publishers.set_state(ConnectionState::Connected);
                publishers.notify(ConnectionEvent::Connected);
                stream = next;
            }
            Ok(None) => break,
            Err(e) => {
                error!("Event connection to {} failed: {}", addr, e);
                let attempts = settings.max_reconnect_attempts;
                publishers.notify(ConnectionEvent::Failed { attempts });
                publishers.set_state(ConnectionState::Failed { attempts });
                return;
            }
        }
    }

    publishers.notify(ConnectionEvent::Closed);
    publishers.set_state(ConnectionState::Closed);
    debug!("Event connection task for {} exiting", addr);
}

/// Bounded reconnection with exponential backoff.
///
/// `Ok(None)` means shutdown was requested while waiting.
async fn reconnect(
    addr: &str,
    settings: &EventSettings,
    publishers: &Publishers,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<Option<TcpStream>> {
    let max_attempts = settings.max_reconnect_attempts;

    for attempt in 1..=max_attempts {
        publishers.set_state(ConnectionState::Reconnecting { attempt });
        publishers.notify(ConnectionEvent::Reconnecting {
            attempt,
            max_attempts,
        });

        let backoff = compute_backoff(attempt, settings.initial_backoff(), settings.max_backoff());
        debug!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            addr, backoff, attempt, max_attempts
        );

        tokio::select! {
            _ = shutdown_requested(shutdown_rx) => return Ok(None),
            _ = sleep(backoff) => {}
        }

        tokio::select! {
            _ = shutdown_requested(shutdown_rx) => return Ok(None),
            result = connect_stream(addr, settings.connect_timeout()) => match result {
                Ok(stream) => return Ok(Some(stream)),
                Err(e) => warn!("Reconnection attempt {} failed: {}", attempt, e),
            },
        }
    }

    Err(Error::RetriesExhausted {
        attempts: max_attempts,
    })
}

/// Run one session's read/write select loop.
async fn run_io_loop(
    stream: TcpStream,
    settings: &EventSettings,
    cmd_rx: &mut mpsc::Receiver<DeviceCommand>,
    publishers: &Publishers,
    shutdown_rx: &mut watch::Receiver<bool>,
    request_id: &mut u64,
) -> SessionEnd {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = LineReader::new(read_half);
    let mut tree = StateTree::new();

    let heartbeat_timeout = settings.heartbeat_timeout();
    let heartbeat = DeviceCommand::new(settings.heartbeat_method.clone());
    let mut heartbeat_interval = tokio::time::interval(settings.heartbeat_interval());
    let mut deadline = Instant::now() + heartbeat_timeout;

    loop {
        tokio::select! {
            _ = shutdown_requested(shutdown_rx) => {
                let _ = write_half.shutdown().await;
                return SessionEnd::Shutdown;
            }

            // ── Incoming line ───────────────────────────────────────────
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        deadline = Instant::now() + heartbeat_timeout;
                        handle_line(&line, &mut tree, publishers);
                    }
                    Ok(None) => return SessionEnd::Lost(Error::ConnectionClosed),
                    Err(e) => return SessionEnd::Lost(e.into()),
                }
            }

            // ── Outgoing command from the public API ────────────────────
            cmd = cmd_rx.recv() => {
                let Some(command) = cmd else {
                    return SessionEnd::Shutdown;
                };
                if let Err(e) = send_request(&mut write_half, &command, request_id).await {
                    return SessionEnd::Lost(e);
                }
            }

            // ── Keepalive ───────────────────────────────────────────────
            _ = heartbeat_interval.tick() => {
                trace!("Sending event heartbeat {}", heartbeat.method);
                if let Err(e) = send_request(&mut write_half, &heartbeat, request_id).await {
                    return SessionEnd::Lost(e);
                }
            }

            _ = sleep_until(deadline) => {
                return SessionEnd::Lost(Error::HeartbeatTimeout { waited: heartbeat_timeout });
            }
        }
    }
}

/// Parse one line and fold it into the tree. Bad lines never leave here.
fn handle_line(line: &[u8], tree: &mut StateTree, publishers: &Publishers) {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            warn!(
                "Skipping event line: {}",
                Error::malformed(format!("line is not UTF-8: {e}"))
            );
            return;
        }
    };
    if line.trim().is_empty() {
        return;
    }

    match parse_device_message(line) {
        Ok(DeviceMessage::Event(envelope)) => {
            if envelope.is_failure() {
                debug!("Device event: {}", envelope.summary());
            } else {
                trace!("Device event: {}", envelope.summary());
            }
            tree.apply(&envelope);
            publishers.publish(tree);
        }
        Ok(DeviceMessage::Response(response)) => {
            trace!(
                "Reply to {}: ok={}",
                response.method.as_deref().unwrap_or("?"),
                response.is_ok()
            );
        }
        Err(e) => warn!("Skipping event line: {}", e),
    }
}

async fn send_request(
    write_half: &mut OwnedWriteHalf,
    command: &DeviceCommand,
    request_id: &mut u64,
) -> Result<()> {
    *request_id += 1;
    let line = command.build(*request_id);
    write_half.write_all(line.as_bytes()).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Open a TCP connection within `timeout`
pub(crate) async fn connect_stream(addr: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::connect_failure(addr, e)),
        Err(_) => Err(Error::connect_failure(
            addr,
            format!("timed out after {timeout:?}"),
        )),
    }
}

/// Resolves once shutdown has been requested or the handle is gone
pub(crate) async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Backoff for reconnection attempt `n`: `initial * 2^(n-1)`, capped at `max`.
fn compute_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier: u64 = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let millis = (initial.as_millis() as u64).saturating_mul(multiplier);
    Duration::from_millis(millis).min(max)
}
