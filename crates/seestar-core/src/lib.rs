//! # seestar-core - Core Domain Types
//!
//! Foundation crate for the Seestar client. Provides error handling, logging
//! and configuration, typed event envelopes, the state tree that events fold
//! into, and the image frame types.
//!
//! This crate performs no network I/O; sockets live in `seestar-device`.
//!
//! ## Public API
//!
//! ### Events (`events`)
//! - [`EventKind`] - Event kind tag with an `Unknown` passthrough
//! - [`Lifecycle`] - Value of an event's `state` field
//! - [`EventEnvelope`] - One parsed event line
//! - [`DeviceMessage`] - Event or command reply
//!
//! ### State (`state_tree`)
//! - [`StateTree`] - Single-writer tree rebuilt from the event stream
//! - [`StateSnapshot`] - Owned copy handed to readers
//! - [`StateNode`] - One kind at one position in the tree
//!
//! ### Frames (`frame`)
//! - [`FrameHeader`], [`FrameType`] - The 34-byte binary header
//! - [`Frame`], [`FramePayload`], [`Raster`] - Decoded image data
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `recoverable` vs `fatal` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use seestar_core::prelude::*;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod logging;
pub mod prelude;
pub mod state_tree;

pub use config::{
    default_config_path, load_settings, DeviceSettings, EventSettings, Settings, StreamSettings,
    DEFAULT_EVENT_PORT, DEFAULT_IMAGE_PORT, DEFAULT_RTSP_PORT, DEFAULT_WIDE_IMAGE_PORT,
    DEFAULT_WIDE_RTSP_PORT,
};
pub use error::{Error, Result, ResultExt};
pub use events::{CommandResponse, DeviceMessage, EventEnvelope, EventKind, Lifecycle};
pub use frame::{
    Frame, FrameHeader, FramePayload, FrameType, Raster, BYTES_PER_SAMPLE, FRAME_MAGIC,
    HEADER_SIZE, STACKED_CHANNELS,
};
pub use state_tree::{StateNode, StateSnapshot, StateTree};
