//! Common types and utilities shared by the reject-list relay and its clients.
//!
//! This crate provides:
//! - Text frame serialization and parsing ([`frame`])
//! - A buffering line codec for byte streams ([`codec`])
//! - Protocol constants and host validation ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod frame;
pub mod types;

pub use codec::{CodecError, FrameCodec};
pub use frame::{Frame, FrameError, FrameKind};
