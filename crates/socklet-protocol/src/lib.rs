//! Wire protocol for Socklet.
//!
//! This crate defines the "language" that browsers and the server speak
//! once a physical connection has been set up:
//!
//! - **Frames** ([`Frame`], [`CloseReason`]): the four envelopes that can
//!   travel on the wire (open, heartbeat, message batch, close).
//! - **Codec** ([`Frame::encode`], [`decode_messages`], [`quote_json`]):
//!   how those frames are turned into text, including the escaping rules
//!   browsers need.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sessions or HTTP. Every transport
//! (polling, streaming, WebSocket) wraps the same encoded frames in its own
//! envelope, so this crate sits below all of them.
//!
//! ```text
//! Session (state machine) → Protocol (Frame → text) → Transport (bytes)
//! ```

mod codec;
mod error;
mod frame;

pub use codec::{decode_messages, escape_into, quote_json};
pub use error::ProtocolError;
pub use frame::{CloseReason, Frame};
