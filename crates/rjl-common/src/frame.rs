//! Reject-list relay frame serialization and parsing.
//!
//! Each frame is one newline-terminated record of tab-separated text fields.
//! The first field names the frame kind; remaining fields carry the payload.
//! [`Frame::parse`] works on a single record with the terminator already
//! removed; stream reassembly lives in [`crate::codec`].

use crate::types::{keyword, FIELD_SEPARATOR, RECORD_TERMINATOR};
use thiserror::Error;

/// Discriminant of a [`Frame`], used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `ADD\t<host>`
    Add,
    /// `REMOVE\t<host>`
    Remove,
    /// `REPORT\t<from>\t<to>\t<bool>`
    Report,
    /// `ACK\t<text>`
    Ack,
}

impl FrameKind {
    /// The wire keyword for this kind.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Add => keyword::ADD,
            Self::Remove => keyword::REMOVE,
            Self::Report => keyword::REPORT,
            Self::Ack => keyword::ACK,
        }
    }

    /// Number of tab-separated fields, keyword included.
    #[must_use]
    pub const fn field_count(self) -> usize {
        match self {
            Self::Add | Self::Remove | Self::Ack => 2,
            Self::Report => 4,
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            keyword::ADD => Some(Self::Add),
            keyword::REMOVE => Some(Self::Remove),
            keyword::REPORT => Some(Self::Report),
            keyword::ACK => Some(Self::Ack),
            _ => None,
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A parsed relay protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Host added to the reject list (relay → client).
    Add {
        /// Hostname to reject.
        host: String,
    },
    /// Host removed from the reject list (relay → client).
    Remove {
        /// Hostname no longer rejected.
        host: String,
    },
    /// Decision report (client → relay).
    Report {
        /// Source of the request the client decided on.
        from: String,
        /// Destination of the request.
        to: String,
        /// `true` when the client rejected the request.
        rejected: bool,
    },
    /// Acknowledgement of a processed report (relay → client).
    Ack {
        /// Free-form acknowledgement text.
        text: String,
    },
}

/// Errors that can occur while parsing or encoding a single record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The record was empty.
    #[error("frame is empty")]
    Empty,
    /// The first field is not a known keyword.
    #[error("unknown frame kind: {0:?}")]
    UnknownKind(String),
    /// The record has the wrong number of fields for its kind.
    #[error("{kind} frame expects {expected} fields, got {actual}")]
    FieldCount {
        /// Kind named by the record.
        kind: FrameKind,
        /// Expected field count, keyword included.
        expected: usize,
        /// Actual field count.
        actual: usize,
    },
    /// A host field was empty.
    #[error("{0} frame has an empty host")]
    EmptyHost(FrameKind),
    /// The verdict field of a REPORT is not a boolean.
    #[error("unparseable boolean: {0:?}")]
    InvalidBool(String),
    /// The record is not valid UTF-8.
    #[error("frame is not valid utf-8")]
    InvalidUtf8,
    /// The record exceeds the configured maximum length.
    #[error("frame too long: max {max} bytes")]
    TooLong {
        /// Maximum allowed record length.
        max: usize,
    },
    /// A field contains a separator or terminator and cannot be encoded.
    #[error("field contains a reserved character: {0:?}")]
    ReservedChar(String),
}

/// Parses a verdict the way permissive boolean parsers do:
/// `1 t T TRUE true True` and `0 f F FALSE false False`.
fn parse_bool(s: &str) -> Result<bool, FrameError> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(FrameError::InvalidBool(other.to_string())),
    }
}

fn check_field(field: &str) -> Result<(), FrameError> {
    if field.contains([FIELD_SEPARATOR, '\r', '\n']) {
        return Err(FrameError::ReservedChar(field.to_string()));
    }
    Ok(())
}

impl Frame {
    /// Creates an `Add` frame.
    #[must_use]
    pub fn add(host: impl Into<String>) -> Self {
        Self::Add { host: host.into() }
    }

    /// Creates a `Remove` frame.
    #[must_use]
    pub fn remove(host: impl Into<String>) -> Self {
        Self::Remove { host: host.into() }
    }

    /// Creates a `Report` frame.
    #[must_use]
    pub fn report(from: impl Into<String>, to: impl Into<String>, rejected: bool) -> Self {
        Self::Report {
            from: from.into(),
            to: to.into(),
            rejected,
        }
    }

    /// Creates an `Ack` frame.
    #[must_use]
    pub fn ack(text: impl Into<String>) -> Self {
        Self::Ack { text: text.into() }
    }

    /// Returns the kind of this frame.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Add { .. } => FrameKind::Add,
            Self::Remove { .. } => FrameKind::Remove,
            Self::Report { .. } => FrameKind::Report,
            Self::Ack { .. } => FrameKind::Ack,
        }
    }

    /// Appends the wire form of this frame, terminator included, to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::ReservedChar`] if a field contains a tab,
    /// carriage return or newline.
    pub fn encode_into(&self, dst: &mut Vec<u8>) -> Result<(), FrameError> {
        let payload: Vec<&str> = match self {
            Self::Add { host } | Self::Remove { host } => vec![host.as_str()],
            Self::Report { from, to, rejected } => vec![
                from.as_str(),
                to.as_str(),
                if *rejected { "true" } else { "false" },
            ],
            Self::Ack { text } => vec![text.as_str()],
        };
        for field in &payload {
            check_field(field)?;
        }
        dst.extend_from_slice(self.kind().keyword().as_bytes());
        for field in &payload {
            dst.push(FIELD_SEPARATOR as u8);
            dst.extend_from_slice(field.as_bytes());
        }
        dst.push(RECORD_TERMINATOR);
        Ok(())
    }

    /// Serializes this frame into its newline-terminated wire form.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::ReservedChar`] if a field cannot be encoded.
    ///
    /// # Examples
    ///
    /// ```
    /// use rjl_common::frame::Frame;
    /// let bytes = Frame::add("evil.com").serialize().unwrap();
    /// assert_eq!(bytes, b"ADD\tevil.com\n");
    /// ```
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        let mut v = Vec::with_capacity(32);
        self.encode_into(&mut v)?;
        Ok(v)
    }

    /// Parses one record (terminator removed) into a typed `Frame`.
    ///
    /// A single trailing `\r` is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the record is empty, names an unknown kind,
    /// has the wrong field count, or carries an unparseable verdict.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Err(FrameError::Empty);
        }
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        let kind = FrameKind::from_keyword(fields[0])
            .ok_or_else(|| FrameError::UnknownKind(fields[0].to_string()))?;
        if fields.len() != kind.field_count() {
            return Err(FrameError::FieldCount {
                kind,
                expected: kind.field_count(),
                actual: fields.len(),
            });
        }
        match kind {
            FrameKind::Add | FrameKind::Remove => {
                let host = fields[1];
                if host.is_empty() {
                    return Err(FrameError::EmptyHost(kind));
                }
                Ok(if kind == FrameKind::Add {
                    Self::add(host)
                } else {
                    Self::remove(host)
                })
            }
            FrameKind::Report => Ok(Self::report(fields[1], fields[2], parse_bool(fields[3])?)),
            FrameKind::Ack => Ok(Self::ack(fields[1])),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_field() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9.:/_-]{1,64}"
    }

    proptest! {
        #[test]
        fn report_serialize_parse_roundtrip(from in arb_field(), to in arb_field(), rejected in any::<bool>()) {
            let frame = Frame::report(from, to, rejected);
            let bytes = frame.serialize().unwrap();
            let line = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
            prop_assert_eq!(Frame::parse(line).unwrap(), frame);
        }

        #[test]
        fn parse_never_panics(line in "\\PC{0,128}") {
            let _ = Frame::parse(&line);
        }

        #[test]
        fn serialized_frame_has_single_terminator(host in arb_field()) {
            let bytes = Frame::add(host).serialize().unwrap();
            prop_assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
            prop_assert_eq!(bytes.last().copied(), Some(b'\n'));
        }
    }
}
