//! Wire-level building blocks for the Beacon signaling server
//!
//! Defines the `{event, data}` envelope that wraps every frame in both
//! directions, the event vocabulary, the payload builders for everything
//! the server emits, and the identifier/clock utilities the session fabric
//! depends on. Signaling payloads (SDP, ICE candidates) are opaque values
//! here; nothing in this crate interprets them.

#![forbid(unsafe_code)]

pub mod clock;
pub mod envelope;
pub mod events;
pub mod ident;

pub use envelope::{Envelope, EnvelopeError};
pub use events::{ClientEvent, SignalKind};
