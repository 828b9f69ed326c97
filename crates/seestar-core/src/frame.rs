//! Image socket frame types
//!
//! Decoding lives in `seestar_device::codec`; this module only describes
//! what a decoded frame looks like.

use std::fmt;

/// Fixed size of every binary frame header
pub const HEADER_SIZE: usize = 34;

/// First two bytes of every header (big-endian)
pub const FRAME_MAGIC: u16 = 0x03C3;

/// Rasters carry 16-bit samples
pub const BYTES_PER_SAMPLE: usize = 2;

/// Channel count of a stacked (debayered RGB) frame
pub const STACKED_CHANNELS: usize = 3;

/// Byte 13 of the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Command acknowledgement, no image data
    Ack,
    /// Raw single-channel sensor frame
    Preview,
    /// Three-channel stacked result wrapped in a zip archive
    Stacked,
    Other(u8),
}

impl FrameType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => FrameType::Ack,
            1 => FrameType::Preview,
            5 => FrameType::Stacked,
            other => FrameType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Ack => 0,
            FrameType::Preview => 1,
            FrameType::Stacked => 5,
            FrameType::Other(other) => other,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Ack => write!(f, "ack"),
            FrameType::Preview => write!(f, "preview"),
            FrameType::Stacked => write!(f, "stacked"),
            FrameType::Other(n) => write!(f, "type {n}"),
        }
    }
}

/// Decoded 34-byte header.
///
/// The unused and reserved spans are kept so that re-encoding a decoded
/// header reproduces the original bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u16,
    pub version: u16,
    pub unused_a: u16,
    /// Payload bytes following the header
    pub length: u32,
    pub unused_b: u16,
    pub endianness: u8,
    pub frame_type: FrameType,
    pub data_type: u8,
    pub frame_id: u8,
    pub width: u16,
    pub height: u16,
    pub focus_x: u16,
    pub focus_y: u16,
    pub focus_value: u16,
    pub bayer_capable: u16,
    pub image_id: u16,
    pub reserved: u32,
}

impl FrameHeader {
    /// Header with the magic set and everything else zeroed
    pub fn new(frame_type: FrameType, width: u16, height: u16, length: u32) -> Self {
        Self {
            magic: FRAME_MAGIC,
            version: 0,
            unused_a: 0,
            length,
            unused_b: 0,
            endianness: 0,
            frame_type,
            data_type: 0,
            frame_id: 0,
            width,
            height,
            focus_x: 0,
            focus_y: 0,
            focus_value: 0,
            bayer_capable: 0,
            image_id: 0,
            reserved: 0,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.length as usize
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Interleaved 16-bit raster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u16,
    pub height: u16,
    pub channels: usize,
    /// Little-endian samples, row-major, channels interleaved
    pub data: Vec<u8>,
}

impl Raster {
    pub fn expected_len(width: u16, height: u16, channels: usize) -> usize {
        width as usize * height as usize * channels * BYTES_PER_SAMPLE
    }

    pub fn samples(&self) -> Vec<u16> {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Sample at column `x`, row `y`, channel `c`
    pub fn sample(&self, x: usize, y: usize, c: usize) -> Option<u16> {
        if x >= self.width as usize || y >= self.height as usize || c >= self.channels {
            return None;
        }
        let index = ((y * self.width as usize + x) * self.channels + c) * BYTES_PER_SAMPLE;
        let bytes = self.data.get(index..index + BYTES_PER_SAMPLE)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Ack,
    Preview(Raster),
    Stacked(Raster),
}

/// Header plus decoded payload, handed to subscribers by value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: FramePayload,
}

impl Frame {
    pub fn is_ack(&self) -> bool {
        matches!(self.payload, FramePayload::Ack)
    }

    pub fn raster(&self) -> Option<&Raster> {
        match &self.payload {
            FramePayload::Preview(raster) | FramePayload::Stacked(raster) => Some(raster),
            FramePayload::Ack => None,
        }
    }

    pub fn into_raster(self) -> Option<Raster> {
        match self.payload {
            FramePayload::Preview(raster) | FramePayload::Stacked(raster) => Some(raster),
            FramePayload::Ack => None,
        }
    }
}
