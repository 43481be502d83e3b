//! Protocol handlers
//!
//! All registry mutation happens here, on the dispatcher thread. Every
//! handler recovers locally: protocol violations become `error` envelopes
//! to the originator, capacity failures become refusals, and nothing
//! propagates upward. The dispatcher loop is total.
//!
//! Broadcasts are issued inside the handler that mutated the room, so
//! observers always see post-mutation state and `room-created` reaches
//! the creator strictly before the first `participants` for that room.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use beacon_protocol::envelope::{self, JoinRoomData};
use beacon_protocol::{ClientEvent, Envelope, SignalKind};

use crate::clients::{ClientKey, ClientRegistry, ClientState};
use crate::config::ServerConfig;
use crate::conn::ConnHandle;
use crate::rooms::{RoomKey, RoomRegistry};
use crate::stats::ServerStats;

/// Name given to rooms created without one
pub const DEFAULT_ROOM_NAME: &str = "Unnamed Room";

/// The session fabric: both registries plus the handler logic that
/// mutates them
pub struct SignalServer {
    clients: ClientRegistry,
    rooms: RoomRegistry,
    stats: Arc<ServerStats>,
    idle_timeout_secs: u64,
}

impl SignalServer {
    /// Build the fabric with registries sized from configuration
    pub fn new(config: &ServerConfig, stats: Arc<ServerStats>) -> Self {
        Self {
            clients: ClientRegistry::new(config.max_clients),
            rooms: RoomRegistry::new(config.max_rooms),
            stats,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }

    /// Transport accepted a connection: allocate a session and assign
    /// identity. A full registry refuses the accept: the client never
    /// receives a `client-id` and the socket is closed.
    pub fn on_accepted(&mut self, handle: ConnHandle, now: u64) {
        match self.clients.add(handle.clone(), now) {
            Ok(key) => {
                let id = self.clients.get(key).map(|c| c.id.clone()).unwrap_or_default();
                info!(client = %id, "client connected");
                let env = envelope::client_id(&id);
                self.send_to(key, &env);
            }
            Err(_) => {
                warn!(
                    active = self.clients.active_count(),
                    "client registry full, refusing connection"
                );
                handle.close();
            }
        }
    }

    /// One parsed frame from a connection
    pub fn on_frame(&mut self, handle: &ConnHandle, frame: Envelope, now: u64) {
        let Some(key) = self.clients.find_by_handle(handle) else {
            debug!(token = handle.token(), "frame from unknown connection");
            return;
        };

        // Any received frame counts as activity, known event or not
        if let Some(client) = self.clients.get_mut(key) {
            client.last_activity = now;
            client.messages_received += 1;
        }

        match ClientEvent::from_name(&frame.event) {
            Some(ClientEvent::JoinRoom) => self.handle_join(key, &frame.data, now),
            Some(ClientEvent::LeaveRoom) => self.handle_leave(key, now),
            Some(ClientEvent::Signal(kind)) => self.handle_signal(key, kind, &frame.data, now),
            None => {
                self.stats.record_error();
                debug!(event = %frame.event, "unknown event");
            }
        }
    }

    /// Transport observed the connection close. Reaper timeouts take
    /// the same path.
    pub fn on_closed(&mut self, handle: &ConnHandle, now: u64) {
        let Some(key) = self.clients.find_by_handle(handle) else {
            return;
        };
        self.remove_client(key, now);
    }

    /// Periodic pass: evict idle clients, then free empty rooms
    pub fn reap(&mut self, now: u64) {
        let timeout = self.idle_timeout_secs;
        let expired: Vec<ClientKey> = self
            .clients
            .iter()
            .filter(|(_, client)| now.saturating_sub(client.last_activity) > timeout)
            .map(|(key, _)| key)
            .collect();
        for key in expired {
            if let Some(client) = self.clients.get(key) {
                info!(client = %client.id, "idle client timed out");
                client.handle.close();
            }
            self.remove_client(key, now);
        }

        let reaped = self.rooms.reap_empty();
        if reaped > 0 {
            debug!(rooms = reaped, "reaped empty rooms");
        }
    }

    fn handle_join(&mut self, key: ClientKey, data: &Value, now: u64) {
        let params = JoinRoomData::from_value(data);

        // Joining while seated behaves as leave followed by join
        self.leave_current_room(key, now);

        if let Some(client) = self.clients.get_mut(key) {
            client.state = ClientState::Joining;
        }

        let existing = params
            .room_id
            .as_deref()
            .and_then(|room_id| self.rooms.find_by_id(room_id));
        let (room_key, created) = match existing {
            Some(found) => (found, false),
            None => {
                let name = params.room_name.as_deref().unwrap_or(DEFAULT_ROOM_NAME);
                match self.rooms.create(name, Some(key), now) {
                    Ok(created_key) => (created_key, true),
                    Err(_) => {
                        warn!(rooms = self.rooms.active_count(), "room registry full");
                        self.reset_to_connected(key);
                        self.send_error(key, "Cannot create room");
                        return;
                    }
                }
            }
        };

        if !created {
            let seated_elsewhere = self
                .clients
                .get(key)
                .is_some_and(|c| c.current_room.is_some_and(|r| r != room_key));
            let seated = match self.rooms.get_mut(room_key) {
                Some(room) => room.add_participant(key, seated_elsewhere, now),
                // find_by_id just resolved this key; nothing else runs
                // on this thread in between
                None => return,
            };
            if let Err(err) = seated {
                debug!(error = %err, "join refused");
                self.reset_to_connected(key);
                self.send_error(key, "Room is full (max 6 participants)");
                return;
            }
        }

        let (room_id, room_name) = match self.rooms.get(room_key) {
            Some(room) => (room.id.clone(), room.name.clone()),
            None => return,
        };
        if let Some(client) = self.clients.get_mut(key) {
            client.current_room = Some(room_key);
            client.state = ClientState::InRoom;
        }

        if created {
            info!(room = %room_id, name = %room_name, "room created");
            let env = envelope::room_created(&room_id, &room_name);
            self.send_to(key, &env);
        }
        self.broadcast_participants(room_key);
    }

    /// Explicit leave. Outside a room this is a silent no-op; the leaver
    /// is never messaged either way.
    fn handle_leave(&mut self, key: ClientKey, now: u64) {
        self.leave_current_room(key, now);
    }

    fn handle_signal(&mut self, key: ClientKey, kind: SignalKind, data: &Value, now: u64) {
        let Some(room_key) = self.clients.get(key).and_then(|c| c.current_room) else {
            self.send_error(key, "Not in a room");
            return;
        };

        let target_id = match envelope::target_client_id(data) {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => {
                self.send_error(key, "Missing target client ID");
                return;
            }
        };

        // Cross-room relay is forbidden: the target must hold a seat in
        // the sender's own room
        let Some(target_key) = self.find_participant(room_key, &target_id) else {
            self.send_error(key, "Target client not found in room");
            return;
        };

        let from_id = match self.clients.get(key) {
            Some(client) => client.id.clone(),
            None => return,
        };
        let payload = data.get(kind.payload_key()).cloned().unwrap_or(Value::Null);
        let env = envelope::relay(kind, &from_id, payload);
        if self.send_to(target_key, &env) {
            self.stats.record_relay();
            if let Some(room) = self.rooms.get_mut(room_key) {
                room.last_activity = now;
            }
        }
    }

    /// Remove a client by any path: implicit leave first, then free the
    /// registry slot
    fn remove_client(&mut self, key: ClientKey, now: u64) {
        self.leave_current_room(key, now);
        if let Some(client) = self.clients.remove(key) {
            info!(
                client = %client.id,
                sent = client.messages_sent,
                received = client.messages_received,
                "client removed"
            );
        }
    }

    /// Unseat the client from its current room, if any. Remaining
    /// members get the updated participant list unless the room emptied;
    /// then there is nobody to hear it and the reaper collects the room.
    fn leave_current_room(&mut self, key: ClientKey, now: u64) {
        let Some(room_key) = self.clients.get(key).and_then(|c| c.current_room) else {
            return;
        };

        let removed = self
            .rooms
            .get_mut(room_key)
            .map(|room| room.remove_participant(key, now));

        if let Some(client) = self.clients.get_mut(key) {
            client.current_room = None;
            client.state = ClientState::Connected;
        }

        match removed {
            Some(Ok(outcome)) => {
                if let Some(new_owner) = outcome.new_owner {
                    debug!(?new_owner, "ownership transferred");
                }
                if !outcome.now_empty {
                    self.broadcast_participants(room_key);
                }
            }
            Some(Err(_)) | None => {
                warn!("client back-reference did not match a held seat");
            }
        }
    }

    /// Locate a participant of one room by client identifier
    pub fn find_participant(&self, room_key: RoomKey, client_id: &str) -> Option<ClientKey> {
        let room = self.rooms.get(room_key)?;
        room.participants()
            .find(|&member| self.clients.get(member).is_some_and(|c| c.id == client_id))
    }

    /// Send one envelope to every seated member except `exclude`;
    /// returns successful sends
    pub fn broadcast_room(
        &mut self,
        room_key: RoomKey,
        exclude: Option<ClientKey>,
        env: &Envelope,
    ) -> usize {
        let members: Vec<ClientKey> = match self.rooms.get(room_key) {
            Some(room) => room.participants().collect(),
            None => return 0,
        };
        let frame = env.to_json();
        members
            .into_iter()
            .filter(|&member| Some(member) != exclude)
            .filter(|&member| self.send_frame(member, &frame))
            .count()
    }

    fn broadcast_participants(&mut self, room_key: RoomKey) {
        let Some(room) = self.rooms.get(room_key) else {
            return;
        };
        let room_id = room.id.clone();
        let ids: Vec<String> = room
            .participants()
            .filter_map(|member| self.clients.get(member).map(|c| c.id.clone()))
            .collect();
        let env = envelope::participants(&room_id, ids);
        self.broadcast_room(room_key, None, &env);
    }

    fn reset_to_connected(&mut self, key: ClientKey) {
        if let Some(client) = self.clients.get_mut(key) {
            client.state = ClientState::Connected;
        }
    }

    fn send_to(&mut self, key: ClientKey, env: &Envelope) -> bool {
        let frame = env.to_json();
        self.send_frame(key, &frame)
    }

    fn send_frame(&mut self, key: ClientKey, frame: &str) -> bool {
        let Some(client) = self.clients.get_mut(key) else {
            return false;
        };
        if client.handle.send_text(frame) {
            client.messages_sent += 1;
            true
        } else {
            client.send_failures += 1;
            false
        }
    }

    fn send_error(&mut self, key: ClientKey, reason: &str) {
        let env = envelope::error(reason);
        self.send_to(key, &env);
    }

    /// Client registry view, for the transport and for invariant checks
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Room registry view
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Shared counters
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
