//! Socket readers
//!
//! [`FrameReader`] demultiplexes the image ports. They interleave
//! `\r\n`-terminated JSON replies with binary frames and give no outer
//! framing to tell them apart. The reader looks at the first pending byte:
//! `{` may start a JSON line, anything else must be a frame header. A header
//! whose magic does not match, or a `{` that does not lead a complete reply
//! line, means the stream is out of step, and the reader scans forward for
//! the next magic (or `{`) before trying again.
//!
//! [`LineReader`] splits the event port into lines, bounded by
//! [`MAX_LINE_BYTES`].

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use seestar_core::frame::{Frame, FRAME_MAGIC, HEADER_SIZE};
use seestar_core::prelude::*;

use crate::codec::{decode_header, decode_payload};

/// Longest JSON line accepted before the line is treated as noise
pub const MAX_LINE_BYTES: usize = 4096;

/// Outcome of looking for a reply line at the head of the buffer
enum LineScan {
    /// Complete `\r\n`-terminated line of this many bytes
    Line(usize),
    /// Control byte or bare `\n`: binary data, not a reply
    NotText,
    TooLong,
}

const MAGIC_BYTES: [u8; 2] = FRAME_MAGIC.to_be_bytes();

/// One item read from an image socket
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// JSON reply to a command or heartbeat
    Reply(Value),
    Frame(Frame),
}

/// Buffered reader over the receive half of an image socket
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_payload: usize,
    last_activity: Instant,
    resyncs: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_payload: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(64 * 1024),
            max_payload,
            last_activity: Instant::now(),
            resyncs: 0,
        }
    }

    /// When bytes last arrived from the socket
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Times the reader has had to scan for a frame boundary
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// Read the next reply or decoded frame.
    ///
    /// Malformed replies, frames that fail to decode and stray bytes are
    /// logged and skipped. Only socket errors and end-of-stream are returned.
    ///
    /// Cancel safe: partially received data stays buffered for the next call.
    pub async fn next_item(&mut self) -> Result<StreamItem> {
        loop {
            self.fill(1).await?;

            if self.buf[0] == b'{' {
                match self.scan_line().await? {
                    LineScan::Line(end) => match serde_json::from_slice::<Value>(&self.buf[..end]) {
                        Ok(value) => {
                            self.buf.drain(..end);
                            return Ok(StreamItem::Reply(value));
                        }
                        Err(e) => debug!("Unparsable reply on image socket: {}", e),
                    },
                    LineScan::NotText => trace!("Stray brace in binary data"),
                    LineScan::TooLong => {
                        debug!("No line end within {} bytes", MAX_LINE_BYTES)
                    }
                }
                // only the brace is dropped; a frame may start inside the line
                self.resync();
                continue;
            }

            self.fill(HEADER_SIZE).await?;
            let header = match decode_header(&self.buf[..HEADER_SIZE]) {
                Ok(header) => header,
                Err(e) => {
                    debug!("Image stream out of sync: {}", e);
                    self.resync();
                    continue;
                }
            };

            if header.payload_len() > self.max_payload {
                warn!(
                    "{}",
                    Error::PayloadTooLarge {
                        length: header.payload_len(),
                        limit: self.max_payload,
                    }
                );
                self.resync();
                continue;
            }

            let total = HEADER_SIZE + header.payload_len();
            self.fill(total).await?;
            let decoded = decode_payload(&header, &self.buf[HEADER_SIZE..total]);
            self.buf.drain(..total);

            match decoded {
                Ok(frame) => return Ok(StreamItem::Frame(frame)),
                Err(e) => {
                    warn!(
                        "Dropping {} frame #{}: {}",
                        header.frame_type, header.image_id, e
                    );
                }
            }
        }
    }

    /// Make sure at least `n` bytes are buffered
    async fn fill(&mut self, n: usize) -> Result<()> {
        while self.buf.len() < n {
            self.buf.reserve(n - self.buf.len());
            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.last_activity = Instant::now();
        }
        Ok(())
    }

    /// Measure the reply line at the head of the buffer without consuming
    /// it. JSON text carries no control bytes besides tab and CR/LF, so
    /// any other one ends the scan early.
    async fn scan_line(&mut self) -> Result<LineScan> {
        let mut scanned = 1;
        loop {
            let limit = self.buf.len().min(MAX_LINE_BYTES);
            for i in scanned..limit {
                match self.buf[i] {
                    b'\n' if self.buf[i - 1] == b'\r' => return Ok(LineScan::Line(i + 1)),
                    b'\t' | b'\r' => {}
                    byte if byte < 0x20 => return Ok(LineScan::NotText),
                    _ => {}
                }
            }
            if limit >= MAX_LINE_BYTES {
                return Ok(LineScan::TooLong);
            }
            scanned = limit;
            self.fill(scanned + 1).await?;
        }
    }

    /// Drop the byte at the head of the buffer, then everything up to the
    /// next candidate boundary: the frame magic or the start of a JSON line.
    /// A trailing first magic byte is kept since its partner may still be
    /// in flight.
    fn resync(&mut self) {
        self.resyncs += 1;
        if self.buf.is_empty() {
            return;
        }

        let rest = &self.buf[1..];
        let skip = rest
            .iter()
            .enumerate()
            .position(|(i, b)| {
                *b == b'{'
                    || (*b == MAGIC_BYTES[0]
                        && rest.get(i + 1).map_or(true, |next| *next == MAGIC_BYTES[1]))
            })
            .unwrap_or(rest.len());

        self.buf.drain(..1 + skip);
    }
}

// ─────────────────────────────────────────────────────────
// Event port lines
// ─────────────────────────────────────────────────────────

/// Bounded line splitter for the event socket
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    /// Inside an oversized line; drop bytes up to its end
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(MAX_LINE_BYTES),
            discarding: false,
        }
    }

    /// Next `\n`-terminated line, terminator included, or `None` at end of
    /// stream. Lines longer than [`MAX_LINE_BYTES`] are dropped with a
    /// warning. Bytes are not checked for UTF-8 here.
    ///
    /// Cancel safe: partially received lines stay buffered.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let window = self.buf.len().min(MAX_LINE_BYTES);
            if let Some(pos) = self.buf[..window].iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.buf.len() >= MAX_LINE_BYTES {
                if !self.discarding {
                    warn!("Dropping event line longer than {} bytes", MAX_LINE_BYTES);
                }
                self.discarding = true;
                self.buf.drain(..MAX_LINE_BYTES);
                continue;
            }

            self.buf.reserve(MAX_LINE_BYTES);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Ok(None);
            }
        }
    }
}
