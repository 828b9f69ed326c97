//! One telescope, one settings file
//!
//! Owns the event connection and opens image sessions on demand against
//! the same host.

use std::sync::Arc;

use seestar_core::prelude::*;
use seestar_core::{DeviceSettings, Frame, Settings, StateSnapshot};
use seestar_device::{
    grab_frame, Camera, ConnectionState, DeviceCommand, EventConnection,
    ImageStreamSession, OneShot,
};
use tokio::sync::watch;

/// Connected telescope
#[derive(Debug)]
pub struct Telescope {
    settings: Settings,
    events: EventConnection,
}

impl Telescope {
    /// Connect the event channel of the device named in `settings`.
    pub async fn connect(settings: Settings) -> Result<Self> {
        let events =
            EventConnection::connect(settings.device.event_addr(), settings.events.clone())
                .await
                .with_context(|| format!("connecting to telescope at {}", settings.device.host))?;
        info!("Connected to telescope at {}", settings.device.host);
        Ok(Self { settings, events })
    }

    /// Load settings from the default config path, then connect.
    pub async fn connect_default() -> Result<Self> {
        let path = seestar_core::default_config_path();
        debug!("Loading settings from {}", path.display());
        Self::connect(seestar_core::load_settings(&path)).await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.events.snapshot()
    }

    pub fn snapshot_receiver(&self) -> watch::Receiver<Arc<StateSnapshot>> {
        self.events.snapshot_receiver()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.events.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.events.state_receiver()
    }

    /// Underlying event connection, for lifecycle notifications
    pub fn events(&mut self) -> &mut EventConnection {
        &mut self.events
    }

    pub async fn send_command(&self, command: DeviceCommand) -> Result<()> {
        self.events.send_command(command).await
    }

    /// Open a streaming session on `camera`'s image port.
    pub async fn open_stream(&self, camera: Camera) -> Result<ImageStreamSession> {
        ImageStreamSession::open_camera(&self.settings.device, camera, self.settings.stream.clone())
            .await
    }

    /// Fetch a single frame from `camera` on a short-lived session.
    pub async fn grab(&self, camera: Camera, request: OneShot) -> Result<Frame> {
        let addr = format!(
            "{}:{}",
            self.settings.device.host,
            camera.image_port(&self.settings.device)
        );
        grab_frame(&addr, request, self.settings.stream.clone()).await
    }

    /// Live view URL for `camera`, using the configured RTSP ports.
    pub fn rtsp_url(&self, camera: Camera) -> String {
        configured_rtsp_url(&self.settings.device, camera)
    }

    pub async fn close(&mut self) {
        self.events.close().await;
    }
}

fn configured_rtsp_url(device: &DeviceSettings, camera: Camera) -> String {
    let port = match camera {
        Camera::Telephoto => device.rtsp_port,
        Camera::Wide => device.wide_rtsp_port,
    };
    format!("rtsp://{}:{}/stream", device.host, port)
}
