//! Newline-delimited frame codec for `tokio_util::codec`.
//!
//! A single transport read may hold zero, one, many, or part of a record, so
//! the decoder buffers until a full `\n`-terminated record is available.
//! Malformed records are yielded as `Err` items rather than decoder errors:
//! the stream keeps going after a bad record, and the caller decides what to
//! do with it.

use crate::frame::{Frame, FrameError};
use crate::types::{DEFAULT_MAX_LINE, RECORD_TERMINATOR};
use bytes::{Buf, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Transport-level codec failure. Ends the framed stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Outbound frame could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Line codec producing [`Frame`] values.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_line: usize,
    /// Index up to which the buffer has already been scanned for a terminator.
    next_index: usize,
    /// Set while skipping the remainder of an over-long record.
    discarding: bool,
}

impl FrameCodec {
    /// Creates a codec with the default maximum record length.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Creates a codec that rejects records longer than `max_line` bytes.
    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            max_line,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of `record` with one trailing `\r` removed.
fn body_len(record: &[u8]) -> usize {
    match record.last() {
        Some(b'\r') => record.len() - 1,
        _ => record.len(),
    }
}

fn parse_record(record: &[u8]) -> Result<Frame, FrameError> {
    std::str::from_utf8(record)
        .map_err(|_| FrameError::InvalidUtf8)
        .and_then(Frame::parse)
}

impl FrameCodec {
    fn finish_record(&self, record: &[u8]) -> Result<Frame, FrameError> {
        if body_len(record) > self.max_line {
            return Err(FrameError::TooLong { max: self.max_line });
        }
        parse_record(record)
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, FrameError>;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // room for a body of max_line bytes plus "\r\n"
        let scan_limit = self.max_line.saturating_add(2);
        loop {
            let read_to = scan_limit.min(buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == RECORD_TERMINATOR);

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let record = buf.split_to(end + 1);
                    return Ok(Some(self.finish_record(&record[..end])));
                }
                (false, None) if buf.len() >= scan_limit => {
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Err(FrameError::TooLong { max: self.max_line })));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        self.next_index = 0;
        if buf.is_empty() || self.discarding {
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }
        // unterminated trailing record
        let record = buf.split_to(buf.len());
        Ok(Some(self.finish_record(&record)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = frame.serialize()?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
