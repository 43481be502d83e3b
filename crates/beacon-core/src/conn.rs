//! Connection seam between the I/O layer and the core
//!
//! The core never touches a socket. The transport hands it a
//! [`ConnHandle`]: an equality token plus a non-blocking outbound sink.
//! A send either enters the connection's outbound buffer immediately or
//! reports failure; it must not block the dispatcher thread.

use std::fmt;
use std::sync::Arc;

/// Outbound side of one connection, implemented by the I/O layer
pub trait OutboundSink: Send + Sync {
    /// Buffer one text frame for delivery. Returns false when the frame
    /// could not be accepted (buffer full or connection gone).
    fn send_text(&self, frame: &str) -> bool;

    /// Ask the I/O layer to close the connection.
    fn close(&self);
}

/// Opaque handle to one live connection
///
/// The core uses it for equality (routing ingress events back to the
/// owning session) and for send dispatch, nothing else.
#[derive(Clone)]
pub struct ConnHandle {
    token: u64,
    sink: Arc<dyn OutboundSink>,
}

impl ConnHandle {
    /// Wrap a transport-assigned token and sink
    pub fn new(token: u64, sink: Arc<dyn OutboundSink>) -> Self {
        Self { token, sink }
    }

    /// Transport-unique token identifying this connection
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Buffer one outbound frame; false on failure
    pub fn send_text(&self, frame: &str) -> bool {
        self.sink.send_text(frame)
    }

    /// Request connection close
    pub fn close(&self) {
        self.sink.close()
    }
}

impl PartialEq for ConnHandle {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for ConnHandle {}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnHandle").field(&self.token).finish()
    }
}
