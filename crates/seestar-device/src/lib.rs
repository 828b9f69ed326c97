//! # seestar-device - Wire Protocols
//!
//! Everything that touches the telescope's sockets: the event line parser,
//! request serialisation, the binary frame codec, and the two long-lived
//! connections built on them.
//!
//! Depends on [`seestar_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Event Port
//! - [`EventConnection`] - Heartbeat, bounded reconnect, state snapshots
//! - [`parse_envelope()`] - Parse one event line
//! - [`parse_device_message()`] - Classify a line as event or reply
//! - [`DeviceCommand`] - Request for the event socket
//! - [`LineReader`] - Bounded line splitter for the event socket
//!
//! ### Image Ports
//! - [`ImageStreamSession`] - Streaming session with frame subscribers
//! - [`grab_frame()`] - One-shot frame request
//! - [`FrameReader`] - Demultiplexes JSON replies and binary frames
//! - [`decode_header()`], [`encode_header()`], [`decode_payload()`] - Frame codec
//! - [`rtsp_url()`] - Live view URL for a camera

pub mod codec;
pub mod event_connection;
pub mod image_stream;
pub mod protocol;
pub mod reader;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use codec::{decode_header, decode_payload, encode_header, extract_archive};
pub use event_connection::{ConnectionEvent, ConnectionState, EventConnection};
pub use image_stream::{
    grab_frame, rtsp_url, Camera, ImageStreamSession, OneShot, SessionState, StreamMode,
};
pub use protocol::{parse_device_message, parse_envelope, DeviceCommand, ImageCommand};
pub use reader::{FrameReader, LineReader, StreamItem, MAX_LINE_BYTES};
