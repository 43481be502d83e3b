//! Session fabric for the Beacon signaling server
//!
//! Everything between the WebSocket transport and the wire format lives
//! here: the slotted client and room registries, the bounded ingress
//! queue, the protocol handlers that relay offer/answer/ICE envelopes
//! inside rooms, and the single-threaded dispatcher that serializes every
//! registry mutation.
//!
//! The transport feeds the core through [`ingress::IngressQueue`] and
//! receives sends through the [`conn::OutboundSink`] trait; those two
//! seams are the only places the core and the I/O layer touch.

#![forbid(unsafe_code)]

pub mod clients;
pub mod config;
pub mod conn;
pub mod dispatcher;
pub mod handlers;
pub mod ingress;
pub mod rooms;
pub mod stats;

pub use config::ServerConfig;
pub use conn::{ConnHandle, OutboundSink};
pub use dispatcher::{Dispatcher, ShutdownFlag};
pub use handlers::SignalServer;
pub use ingress::{IngressEvent, IngressQueue};
pub use stats::ServerStats;
