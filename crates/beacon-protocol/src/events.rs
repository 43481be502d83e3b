//! Event vocabulary
//!
//! The envelope's `event` field is an open string on the wire; only the
//! names listed here mean anything to the server. Unknown names are
//! counted and dropped by the dispatcher, so the envelope stays untagged
//! and parsing never rejects a frame over its event name.

/// Identity assignment, sent once after accept (server to client)
pub const CLIENT_ID: &str = "client-id";
/// Join or create a room (client to server)
pub const JOIN_ROOM: &str = "join-room";
/// Room creation confirmation, sent to the creator only (server to client)
pub const ROOM_CREATED: &str = "room-created";
/// Participant list broadcast (server to client)
pub const PARTICIPANTS: &str = "participants";
/// Leave the current room (client to server)
pub const LEAVE_ROOM: &str = "leave-room";
/// WebRTC offer relay
pub const OFFER: &str = "offer";
/// WebRTC answer relay
pub const ANSWER: &str = "answer";
/// ICE candidate relay
pub const ICE_CANDIDATE: &str = "ice-candidate";
/// Error report with a human-readable reason (server to client)
pub const ERROR: &str = "error";

/// The three relayed handshake events. Routing is identical for all of
/// them; only the payload key they carry differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Session description offer
    Offer,
    /// Session description answer
    Answer,
    /// ICE candidate
    IceCandidate,
}

impl SignalKind {
    /// Wire event name
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Offer => OFFER,
            Self::Answer => ANSWER,
            Self::IceCandidate => ICE_CANDIDATE,
        }
    }

    /// Key under which the opaque payload travels in `data`
    pub fn payload_key(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "candidate",
        }
    }
}

/// Client-originated events the server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// `join-room`
    JoinRoom,
    /// `leave-room`
    LeaveRoom,
    /// `offer`, `answer`, or `ice-candidate`
    Signal(SignalKind),
}

impl ClientEvent {
    /// Map a wire event name to a known client event
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            JOIN_ROOM => Some(Self::JoinRoom),
            LEAVE_ROOM => Some(Self::LeaveRoom),
            OFFER => Some(Self::Signal(SignalKind::Offer)),
            ANSWER => Some(Self::Signal(SignalKind::Answer)),
            ICE_CANDIDATE => Some(Self::Signal(SignalKind::IceCandidate)),
            _ => None,
        }
    }
}
