//! Image stream sessions on the telephoto and wide-angle image ports
//!
//! A session owns one socket. A background task reads it through
//! [`FrameReader`], drops ack frames and replies, and hands every decoded
//! image frame to the registered subscribers in arrival order. A keepalive
//! goes out every heartbeat interval; if nothing at all arrives for a full
//! heartbeat timeout the session is declared dead and the caller decides
//! whether to open a new one.

use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use seestar_core::config::{
    DeviceSettings, StreamSettings, DEFAULT_IMAGE_PORT, DEFAULT_RTSP_PORT,
    DEFAULT_WIDE_IMAGE_PORT, DEFAULT_WIDE_RTSP_PORT,
};
use seestar_core::frame::Frame;
use seestar_core::prelude::*;

use crate::event_connection::{connect_stream, shutdown_requested};
use crate::protocol::ImageCommand;
use crate::reader::{FrameReader, StreamItem};

const CMD_CHANNEL_CAPACITY: usize = 8;

// ─────────────────────────────────────────────────────────
// Cameras and modes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Camera {
    Telephoto,
    Wide,
}

impl Camera {
    /// Image socket port from `device`
    pub fn image_port(self, device: &DeviceSettings) -> u16 {
        match self {
            Camera::Telephoto => device.image_port,
            Camera::Wide => device.wide_image_port,
        }
    }

    pub fn default_image_port(self) -> u16 {
        match self {
            Camera::Telephoto => DEFAULT_IMAGE_PORT,
            Camera::Wide => DEFAULT_WIDE_IMAGE_PORT,
        }
    }

    pub fn default_rtsp_port(self) -> u16 {
        match self {
            Camera::Telephoto => DEFAULT_RTSP_PORT,
            Camera::Wide => DEFAULT_WIDE_RTSP_PORT,
        }
    }
}

/// Live view URL served by the device's RTSP server
pub fn rtsp_url(host: &str, camera: Camera) -> String {
    format!("rtsp://{}:{}/stream", host, camera.default_rtsp_port())
}

/// Which single frame to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShot {
    /// Current stacked result
    Stacked,
    /// Latest raw sub-frame
    Preview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Continuous,
    OneShot(OneShot),
}

impl StreamMode {
    fn command(self) -> ImageCommand {
        match self {
            StreamMode::Continuous => ImageCommand::BeginStreaming,
            StreamMode::OneShot(OneShot::Stacked) => ImageCommand::GetStackedImage,
            StreamMode::OneShot(OneShot::Preview) => ImageCommand::GetCurrentImage,
        }
    }
}

/// Session status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not streaming
    Open,
    Streaming,
    /// Socket failed or went silent; open a new session to continue
    Dead { reason: String },
    Closed,
}

impl SessionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Dead { .. } | SessionState::Closed)
    }
}

// ─────────────────────────────────────────────────────────
// Subscribers
// ─────────────────────────────────────────────────────────

type FrameCallback = Box<dyn FnMut(Frame) + Send>;

enum Subscriber {
    Callback(FrameCallback),
    Channel(mpsc::Sender<Frame>),
}

impl Subscriber {
    /// Deliver one frame; `false` once the subscriber is gone for good.
    fn deliver(&mut self, frame: Frame) -> bool {
        match self {
            Subscriber::Callback(callback) => {
                callback(frame);
                true
            }
            Subscriber::Channel(tx) => match tx.try_send(frame) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    warn!(
                        "Frame subscriber is lagging, dropping image #{}",
                        frame.header.image_id
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        }
    }
}

type Subscribers = Arc<Mutex<Vec<Subscriber>>>;

/// Hand `frame` to every subscriber in registration order. The last one
/// receives the original, earlier ones a clone.
///
/// The list is taken out of the lock while callbacks run, so a callback may
/// subscribe; subscribers added meanwhile start with the next frame.
fn dispatch(shared: &Subscribers, frame: Frame) {
    let mut subscribers = std::mem::take(&mut *shared.lock().unwrap_or_else(|e| e.into_inner()));
    let Some(last) = subscribers.len().checked_sub(1) else {
        trace!("No subscribers for image #{}", frame.header.image_id);
        return;
    };

    let mut frame = Some(frame);
    let mut alive = Vec::with_capacity(subscribers.len());
    for (i, subscriber) in subscribers.iter_mut().enumerate() {
        let delivery = if i == last {
            frame.take()
        } else {
            frame.clone()
        };
        alive.push(delivery.map_or(true, |f| subscriber.deliver(f)));
    }

    let mut keep = alive.into_iter();
    subscribers.retain(|_| keep.next().unwrap_or(true));

    let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
    let added = std::mem::replace(&mut *guard, subscribers);
    guard.extend(added);
}

// ─────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────

/// Handle to one image socket.
///
/// Callbacks run on the session's background task; a slow callback delays
/// reading.
pub struct ImageStreamSession {
    addr: String,
    cmd_tx: mpsc::Sender<ImageCommand>,
    subscribers: Subscribers,
    state_rx: watch::Receiver<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ImageStreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStreamSession")
            .field("addr", &self.addr)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl ImageStreamSession {
    /// Connect to an image port at `addr` (`host:port`).
    pub async fn open(addr: impl Into<String>, settings: StreamSettings) -> Result<Self> {
        let addr = addr.into();
        info!("Opening image stream at {}", addr);
        let stream = connect_stream(&addr, settings.connect_timeout()).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Open);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(run_session_task(
            addr.clone(),
            stream,
            settings,
            cmd_rx,
            Arc::clone(&subscribers),
            state_tx,
            shutdown_rx,
        ));

        Ok(Self {
            addr,
            cmd_tx,
            subscribers,
            state_rx,
            shutdown_tx,
            task: Some(task),
        })
    }

    /// Connect to `camera`'s image port on the configured device
    pub async fn open_camera(
        device: &DeviceSettings,
        camera: Camera,
        settings: StreamSettings,
    ) -> Result<Self> {
        let addr = format!("{}:{}", device.host, camera.image_port(device));
        Self::open(addr, settings).await
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Begin continuous streaming or request a single frame.
    pub async fn start(&self, mode: StreamMode) -> Result<()> {
        self.send(mode.command()).await
    }

    /// Ask the device to stop continuous streaming.
    pub async fn stop(&self) -> Result<()> {
        self.send(ImageCommand::StopStreaming).await
    }

    async fn send(&self, command: ImageCommand) -> Result<()> {
        if self.state_rx.borrow().is_finished() {
            return Err(Error::Closed);
        }
        debug!("Image stream {}: {}", self.addr, command.method());
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Register a callback for every decoded image frame. Ignored once the
    /// session has finished.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: FnMut(Frame) + Send + 'static,
    {
        if self.state_rx.borrow().is_finished() {
            debug!("Image stream {} finished, not subscribing", self.addr);
            return;
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber::Callback(Box::new(callback)));
    }

    /// Register a bounded channel subscriber. Frames are dropped, with a
    /// warning, while the channel is full.
    pub fn subscribe_channel(&self, capacity: usize) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        // a finished session never delivers; the dropped sender ends `rx`
        if !self.state_rx.borrow().is_finished() {
            self.subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(Subscriber::Channel(tx));
        }
        rx
    }

    /// Stop the background task and close the socket.
    pub async fn close(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Image stream task ended abnormally: {}", e);
            }
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Drop for ImageStreamSession {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn run_session_task(
    addr: String,
    stream: TcpStream,
    settings: StreamSettings,
    mut cmd_rx: mpsc::Receiver<ImageCommand>,
    subscribers: Subscribers,
    state_tx: watch::Sender<SessionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, settings.max_payload_bytes);
    let heartbeat_timeout = settings.heartbeat_timeout();
    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval());

    let end = loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown_rx) => {
                // best effort; the device may already be gone
                let _ = write_command(&mut write_half, ImageCommand::StopStreaming).await;
                let _ = write_half.shutdown().await;
                break SessionState::Closed;
            }

            item = reader.next_item() => {
                match item {
                    Ok(StreamItem::Frame(frame)) if frame.is_ack() => {
                        trace!("Image stream {}: ack", addr);
                    }
                    Ok(StreamItem::Frame(frame)) => {
                        debug!(
                            "Image stream {}: {} frame #{} {}x{}",
                            addr,
                            frame.header.frame_type,
                            frame.header.image_id,
                            frame.header.width,
                            frame.header.height
                        );
                        dispatch(&subscribers, frame);
                    }
                    Ok(StreamItem::Reply(reply)) => {
                        trace!("Image stream {}: reply {}", addr, reply);
                    }
                    Err(e) => break SessionState::Dead { reason: e.to_string() },
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(command) = cmd else {
                    break SessionState::Closed;
                };
                if let Err(e) = write_command(&mut write_half, command).await {
                    break SessionState::Dead { reason: e.to_string() };
                }
                match command {
                    ImageCommand::BeginStreaming => {
                        state_tx.send_replace(SessionState::Streaming);
                    }
                    ImageCommand::StopStreaming => {
                        state_tx.send_replace(SessionState::Open);
                    }
                    _ => {}
                }
            }

            _ = heartbeat.tick() => {
                let idle = reader.last_activity().elapsed();
                if idle >= heartbeat_timeout {
                    break SessionState::Dead {
                        reason: Error::HeartbeatTimeout { waited: idle }.to_string(),
                    };
                }
                if let Err(e) = write_command(&mut write_half, ImageCommand::TestConnection).await {
                    break SessionState::Dead { reason: e.to_string() };
                }
            }
        }
    };

    match &end {
        SessionState::Dead { reason } => warn!("Image stream {} died: {}", addr, reason),
        _ => debug!("Image stream {} closed", addr),
    }
    if reader.resync_count() > 0 {
        debug!(
            "Image stream {} resynchronised {} times",
            addr,
            reader.resync_count()
        );
    }
    // release channel subscribers so their receivers see the end
    subscribers
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
    state_tx.send_replace(end);
}

async fn write_command(write_half: &mut OwnedWriteHalf, command: ImageCommand) -> Result<()> {
    write_half.write_all(command.build().as_bytes()).await?;
    Ok(())
}

/// Resolves with the first finished state
async fn wait_finished(state_rx: &mut watch::Receiver<SessionState>) -> SessionState {
    loop {
        let state = state_rx.borrow_and_update().clone();
        if state.is_finished() {
            return state;
        }
        if state_rx.changed().await.is_err() {
            return SessionState::Closed;
        }
    }
}

/// Open a session, request one frame, and return the first image frame.
pub async fn grab_frame(addr: &str, request: OneShot, settings: StreamSettings) -> Result<Frame> {
    let mut session = ImageStreamSession::open(addr, settings).await?;
    let mut frames = session.subscribe_channel(1);
    let mut state_rx = session.state_receiver();

    let result = match session.start(StreamMode::OneShot(request)).await {
        Ok(()) => tokio::select! {
            biased;
            frame = frames.recv() => frame.ok_or(Error::ConnectionClosed),
            state = wait_finished(&mut state_rx) => match state {
                SessionState::Dead { reason } => {
                    Err(Error::connect_failure(addr, reason))
                }
                _ => Err(Error::Closed),
            },
        },
        Err(e) => Err(e),
    };

    session.close().await;
    result
}
