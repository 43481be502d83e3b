//! Client registry
//!
//! Fixed-capacity slot table of live sessions. Slots are reused after
//! removal; a generational key keeps a stale reference from resolving to
//! the slot's next occupant. Allocation scans linearly from a cursor
//! hint and lookup by handle scans live slots, which is fine at the
//! registry sizes this server runs at.

use beacon_protocol::ident;

use crate::conn::ConnHandle;
use crate::rooms::RoomKey;

/// Lifecycle state of one client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Accepted, not in any room
    Connected,
    /// Join in progress on the dispatcher thread
    Joining,
    /// Seated in a room
    InRoom,
    /// Being torn down; the slot is about to be freed
    Disconnecting,
}

/// Generational reference to a client slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    slot: u32,
    generation: u32,
}

/// One live client session
#[derive(Debug)]
pub struct Client {
    /// Stable 36-char identifier, assigned at accept and never mutated
    pub id: String,
    /// Connection handle owned by the I/O layer
    pub handle: ConnHandle,
    /// Current lifecycle state
    pub state: ClientState,
    /// Accept time, monotonic seconds
    pub connected_at: u64,
    /// Last frame receipt, monotonic seconds
    pub last_activity: u64,
    /// Back-reference to the room this client occupies, if any.
    /// Some iff `state == InRoom`.
    pub current_room: Option<RoomKey>,
    /// Frames successfully handed to the outbound sink
    pub messages_sent: u64,
    /// Frames received from this client
    pub messages_received: u64,
    /// Sends the sink refused
    pub send_failures: u64,
}

/// Registry at capacity
#[derive(Debug, thiserror::Error)]
#[error("client registry full")]
pub struct RegistryFull;

struct Slot {
    generation: u32,
    client: Option<Client>,
}

/// Slotted table of client sessions
pub struct ClientRegistry {
    slots: Vec<Slot>,
    active: usize,
    cursor: usize,
}

impl ClientRegistry {
    /// Pre-allocate `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            client: None,
        });
        Self {
            slots,
            active: 0,
            cursor: 0,
        }
    }

    /// Allocate a slot for a newly accepted connection
    pub fn add(&mut self, handle: ConnHandle, now: u64) -> Result<ClientKey, RegistryFull> {
        let capacity = self.slots.len();
        for step in 0..capacity {
            let index = (self.cursor + step) % capacity;
            if self.slots[index].client.is_some() {
                continue;
            }
            self.slots[index].client = Some(Client {
                id: ident::new_id(),
                handle,
                state: ClientState::Connected,
                connected_at: now,
                last_activity: now,
                current_room: None,
                messages_sent: 0,
                messages_received: 0,
                send_failures: 0,
            });
            self.cursor = (index + 1) % capacity;
            self.active += 1;
            return Ok(ClientKey {
                slot: index as u32,
                generation: self.slots[index].generation,
            });
        }
        Err(RegistryFull)
    }

    /// Resolve a key, failing on stale generations
    pub fn get(&self, key: ClientKey) -> Option<&Client> {
        let slot = self.slots.get(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.client.as_ref()
    }

    /// Mutable resolve
    pub fn get_mut(&mut self, key: ClientKey) -> Option<&mut Client> {
        let slot = self.slots.get_mut(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.client.as_mut()
    }

    /// Find the session owning a connection handle
    pub fn find_by_handle(&self, handle: &ConnHandle) -> Option<ClientKey> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let client = slot.client.as_ref()?;
            (client.handle == *handle).then_some(ClientKey {
                slot: index as u32,
                generation: slot.generation,
            })
        })
    }

    /// Free a slot, returning the removed session. The generation bump
    /// invalidates every outstanding key to this slot.
    pub fn remove(&mut self, key: ClientKey) -> Option<Client> {
        let slot = self.slots.get_mut(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let mut client = slot.client.take()?;
        client.state = ClientState::Disconnecting;
        slot.generation = slot.generation.wrapping_add(1);
        self.active -= 1;
        Some(client)
    }

    /// Live session count
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Configured slot count
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate live sessions in slot order
    pub fn iter(&self) -> impl Iterator<Item = (ClientKey, &Client)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.client.as_ref().map(|client| {
                (
                    ClientKey {
                        slot: index as u32,
                        generation: slot.generation,
                    },
                    client,
                )
            })
        })
    }
}
