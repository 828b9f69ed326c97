//! Test utilities for the device protocols
//!
//! Builds wire bytes the way the telescope emits them, and a loopback
//! listener to stand in for the device.

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use tokio::net::TcpListener;

use seestar_core::frame::{FrameHeader, FrameType};

use crate::codec::encode_header;

/// Name the device gives the single archive entry
const ARCHIVE_ENTRY_NAME: &[u8] = b"stack.raw";

/// Leading bytes the device writes before the archive signature
const ARCHIVE_PADDING: usize = 16;

/// Header with the given shape and a recognisable image id
pub fn sample_header(frame_type: FrameType, width: u16, height: u16, length: u32) -> FrameHeader {
    FrameHeader {
        version: 1,
        data_type: match frame_type {
            FrameType::Preview => 2,
            FrameType::Stacked => 3,
            _ => 0,
        },
        image_id: 42,
        ..FrameHeader::new(frame_type, width, height, length)
    }
}

/// Little-endian sample bytes, as carried by preview and stacked rasters
pub fn pixel_bytes(pixels: &[u16]) -> Vec<u8> {
    pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
}

/// Wrap `pixels` the way the device wraps a stacked image: padding, one zip
/// local-file entry in streaming mode, raw deflate data, data descriptor.
pub fn build_stacked_payload(pixels: &[u16]) -> Vec<u8> {
    let raw = pixel_bytes(pixels);

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).expect("deflate into Vec");
    let compressed = encoder.finish().expect("finish deflate");

    let mut out = vec![0u8; ARCHIVE_PADDING];
    out.extend_from_slice(b"PK\x03\x04");
    out.extend_from_slice(&20u16.to_le_bytes()); // version needed
    out.extend_from_slice(&0x0008u16.to_le_bytes()); // data descriptor follows
    out.extend_from_slice(&8u16.to_le_bytes()); // deflate
    out.extend_from_slice(&[0u8; 4]); // mod time/date
    out.extend_from_slice(&[0u8; 12]); // crc, sizes deferred
    out.extend_from_slice(&(ARCHIVE_ENTRY_NAME.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(ARCHIVE_ENTRY_NAME);
    out.extend_from_slice(&compressed);
    out.extend_from_slice(b"PK\x07\x08");
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    out
}

/// Header followed by payload
pub fn frame_bytes(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = encode_header(header).to_vec();
    out.extend_from_slice(payload);
    out
}

/// Complete preview frame for a single-channel raster
pub fn preview_frame_bytes(width: u16, height: u16, pixels: &[u16]) -> Vec<u8> {
    let payload = pixel_bytes(pixels);
    let header = sample_header(FrameType::Preview, width, height, payload.len() as u32);
    frame_bytes(&header, &payload)
}

/// Complete stacked frame for a three-channel raster
pub fn stacked_frame_bytes(width: u16, height: u16, pixels: &[u16]) -> Vec<u8> {
    let payload = build_stacked_payload(pixels);
    let header = sample_header(FrameType::Stacked, width, height, payload.len() as u32);
    frame_bytes(&header, &payload)
}

/// Ack frame as sent in reply to streaming commands
pub fn ack_frame_bytes() -> Vec<u8> {
    frame_bytes(&sample_header(FrameType::Ack, 0, 0, 0), &[])
}

/// Loopback listener standing in for the telescope; returns it with its
/// `host:port` address.
pub async fn mock_device() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener
        .local_addr()
        .expect("listener address")
        .to_string();
    (listener, addr)
}

/// Event line as the device writes it
pub fn event_line(json: &str) -> String {
    format!("{json}\r\n")
}
