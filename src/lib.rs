//! Seestar Client Library
//!
//! Talks to a Seestar smart telescope over its raw TCP ports: keeps the
//! event channel alive and folds its events into a state tree, and decodes
//! the binary frames from the image ports.
//!
//! The heavy lifting lives in two workspace crates, re-exported here:
//! - [`core`] (`seestar-core`) - errors, settings, logging, events, state tree, frame types
//! - [`device`] (`seestar-device`) - sockets, codecs and the long-lived connections
//!
//! [`Telescope`] ties them together for the common case of one device
//! described by [`Settings`].
//!
//! ```no_run
//! use seestar::{Settings, Telescope};
//!
//! # async fn run() -> seestar::Result<()> {
//! let mut telescope = Telescope::connect(Settings::default()).await?;
//! let snapshot = telescope.snapshot();
//! if let Some(view) = snapshot.get(&["View"]) {
//!     println!("view stage: {:?}", view.stage);
//! }
//! telescope.close().await;
//! # Ok(())
//! # }
//! ```

pub mod telescope;

pub use seestar_core as core;
pub use seestar_device as device;

pub use seestar_core::{
    DeviceSettings, Error, EventEnvelope, EventKind, EventSettings, Frame, FramePayload, Lifecycle,
    Raster, Result, Settings, StateNode, StateSnapshot, StreamSettings,
};
pub use seestar_device::{
    Camera, ConnectionEvent, ConnectionState, EventConnection, ImageStreamSession, OneShot,
    SessionState, StreamMode,
};
pub use telescope::Telescope;

/// Common imports for applications built on the client
pub mod prelude {
    pub use seestar_core::prelude::*;

    pub use crate::telescope::Telescope;
    pub use seestar_core::{Settings, StateSnapshot};
    pub use seestar_device::{Camera, OneShot, StreamMode};
}
