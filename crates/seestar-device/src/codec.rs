//! Binary frame codec for the image sockets
//!
//! Pure functions over byte slices. Header fields are big-endian; the
//! embedded zip local-file header of stacked frames is little-endian, as
//! the zip format requires.

use std::io::Read;

use flate2::read::DeflateDecoder;

use seestar_core::frame::{
    Frame, FrameHeader, FramePayload, FrameType, Raster, FRAME_MAGIC, HEADER_SIZE,
    STACKED_CHANNELS,
};
use seestar_core::prelude::*;

const ZIP_LOCAL_SIGNATURE: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const ZIP_LOCAL_HEADER_LEN: usize = 30;
const ZIP_FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const ZIP_METHOD_STORED: u16 = 0;
const ZIP_METHOD_DEFLATE: u16 = 8;

// ─────────────────────────────────────────────────────────
// Header
// ─────────────────────────────────────────────────────────

fn be16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn be32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn le16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode the first [`HEADER_SIZE`] bytes of `bytes`.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::HeaderTooShort {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let magic = be16(bytes, 0);
    if magic != FRAME_MAGIC {
        return Err(Error::BadMagic { found: magic });
    }

    Ok(FrameHeader {
        magic,
        version: be16(bytes, 2),
        unused_a: be16(bytes, 4),
        length: be32(bytes, 6),
        unused_b: be16(bytes, 10),
        endianness: bytes[12],
        frame_type: FrameType::from_u8(bytes[13]),
        data_type: bytes[14],
        frame_id: bytes[15],
        width: be16(bytes, 16),
        height: be16(bytes, 18),
        focus_x: be16(bytes, 20),
        focus_y: be16(bytes, 22),
        focus_value: be16(bytes, 24),
        bayer_capable: be16(bytes, 26),
        image_id: be16(bytes, 28),
        reserved: be32(bytes, 30),
    })
}

/// Inverse of [`decode_header`]
pub fn encode_header(header: &FrameHeader) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0..2].copy_from_slice(&header.magic.to_be_bytes());
    out[2..4].copy_from_slice(&header.version.to_be_bytes());
    out[4..6].copy_from_slice(&header.unused_a.to_be_bytes());
    out[6..10].copy_from_slice(&header.length.to_be_bytes());
    out[10..12].copy_from_slice(&header.unused_b.to_be_bytes());
    out[12] = header.endianness;
    out[13] = header.frame_type.as_u8();
    out[14] = header.data_type;
    out[15] = header.frame_id;
    out[16..18].copy_from_slice(&header.width.to_be_bytes());
    out[18..20].copy_from_slice(&header.height.to_be_bytes());
    out[20..22].copy_from_slice(&header.focus_x.to_be_bytes());
    out[22..24].copy_from_slice(&header.focus_y.to_be_bytes());
    out[24..26].copy_from_slice(&header.focus_value.to_be_bytes());
    out[26..28].copy_from_slice(&header.bayer_capable.to_be_bytes());
    out[28..30].copy_from_slice(&header.image_id.to_be_bytes());
    out[30..34].copy_from_slice(&header.reserved.to_be_bytes());
    out
}

// ─────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────

/// Decode the payload that followed `header`.
///
/// `payload` must hold at least `header.length` bytes; extra bytes are ignored.
pub fn decode_payload(header: &FrameHeader, payload: &[u8]) -> Result<Frame> {
    if header.frame_type == FrameType::Ack {
        return Ok(Frame {
            header: *header,
            payload: FramePayload::Ack,
        });
    }

    let payload = payload
        .get(..header.payload_len())
        .ok_or(Error::TruncatedPayload {
            expected: header.payload_len(),
            actual: payload.len(),
        })?;

    let decoded = match header.frame_type {
        FrameType::Preview => {
            check_dimensions(header)?;
            let expected = Raster::expected_len(header.width, header.height, 1);
            if payload.len() != expected {
                return Err(Error::TruncatedPayload {
                    expected,
                    actual: payload.len(),
                });
            }
            FramePayload::Preview(Raster {
                width: header.width,
                height: header.height,
                channels: 1,
                data: payload.to_vec(),
            })
        }
        FrameType::Stacked => {
            check_dimensions(header)?;
            let expected = Raster::expected_len(header.width, header.height, STACKED_CHANNELS);
            FramePayload::Stacked(Raster {
                width: header.width,
                height: header.height,
                channels: STACKED_CHANNELS,
                data: extract_archive(payload, expected)?,
            })
        }
        FrameType::Ack => FramePayload::Ack,
        FrameType::Other(code) => return Err(Error::UnsupportedFrameType(code)),
    };

    Ok(Frame {
        header: *header,
        payload: decoded,
    })
}

fn check_dimensions(header: &FrameHeader) -> Result<()> {
    if header.width == 0 || header.height == 0 {
        return Err(Error::ZeroDimension {
            width: header.width,
            height: header.height,
        });
    }
    Ok(())
}

/// Pull the single entry out of a zip stream and return exactly `expected`
/// bytes of it.
///
/// The device writes the archive in streaming mode (data descriptor flag
/// set), so the local header carries no sizes and the deflate stream's own
/// end marker delimits the data.
pub fn extract_archive(payload: &[u8], expected: usize) -> Result<Vec<u8>> {
    let start = payload
        .windows(ZIP_LOCAL_SIGNATURE.len())
        .position(|window| window == ZIP_LOCAL_SIGNATURE)
        .ok_or(Error::ArchiveNotFound)?;

    let local = payload
        .get(start..start + ZIP_LOCAL_HEADER_LEN)
        .ok_or(Error::TruncatedPayload {
            expected: start + ZIP_LOCAL_HEADER_LEN,
            actual: payload.len(),
        })?;

    let flags = le16(local, 6);
    let method = le16(local, 8);
    let declared_size = le32(local, 18) as usize;
    let name_len = le16(local, 26) as usize;
    let extra_len = le16(local, 28) as usize;

    let data_start = start + ZIP_LOCAL_HEADER_LEN + name_len + extra_len;
    let data = payload.get(data_start..).ok_or(Error::TruncatedPayload {
        expected: data_start,
        actual: payload.len(),
    })?;

    match method {
        ZIP_METHOD_DEFLATE => inflate_raw(data, expected),
        ZIP_METHOD_STORED => {
            let stored_len = if flags & ZIP_FLAG_DATA_DESCRIPTOR != 0 {
                expected
            } else {
                declared_size
            };
            let stored = &data[..stored_len.min(data.len())];
            if stored.len() != expected {
                return Err(Error::DecompressionSizeMismatch {
                    expected,
                    actual: stored.len(),
                });
            }
            Ok(stored.to_vec())
        }
        other => Err(Error::UnsupportedCompression { method: other }),
    }
}

fn inflate_raw(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    // one extra byte is enough to tell "too long" from "exact"
    DeflateDecoder::new(data)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::inflate(e.to_string()))?;

    if out.len() != expected {
        return Err(Error::DecompressionSizeMismatch {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}
