//! Room registry
//!
//! Fixed-capacity slot table of rooms, each holding a fixed six-slot
//! participant array. Participant references are generational client
//! keys; the registries never own each other's records. Rooms are
//! created on first reference from a join and reaped once empty.

use beacon_protocol::ident;

use crate::clients::ClientKey;

/// Hard participant cap per room. Protocol constant, not configuration.
pub const ROOM_CAPACITY: usize = 6;

/// Longest stored room name, in bytes
pub const MAX_ROOM_NAME_BYTES: usize = 63;

/// Lifecycle state of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Joinable; has at least one participant
    Active,
    /// Last participant left; awaiting the reaper
    Empty,
    /// Being torn down; the slot is about to be freed
    Closing,
}

/// Generational reference to a room slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomKey {
    slot: u32,
    generation: u32,
}

/// One seat in a room. Empty iff `client` is none.
#[derive(Debug, Clone, Copy)]
pub struct ParticipantSlot {
    /// Occupant, if any
    pub client: Option<ClientKey>,
    /// Seat time, monotonic seconds
    pub joined_at: u64,
    /// Ownership marker; at most one per room
    pub is_owner: bool,
}

const EMPTY_SLOT: ParticipantSlot = ParticipantSlot {
    client: None,
    joined_at: 0,
    is_owner: false,
};

/// Seating failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddParticipantError {
    /// All six seats taken
    #[error("room is full")]
    Full,
    /// Client already seated in this room
    #[error("client already in this room")]
    AlreadyInThis,
    /// Client seated in a different room
    #[error("client already in another room")]
    AlreadyInOther,
}

/// The client holds no seat in this room
#[derive(Debug, thiserror::Error)]
#[error("client not found in room")]
pub struct ParticipantNotFound;

/// Outcome of a successful seat removal
#[derive(Debug)]
pub struct RemovedParticipant {
    /// The departing client held ownership
    pub was_owner: bool,
    /// Promoted successor, when ownership moved
    pub new_owner: Option<ClientKey>,
    /// The room has no participants left
    pub now_empty: bool,
}

/// A bounded signaling room
#[derive(Debug)]
pub struct Room {
    /// Stable 36-char identifier
    pub id: String,
    /// Display name, at most 63 bytes
    pub name: String,
    slots: [ParticipantSlot; ROOM_CAPACITY],
    count: usize,
    /// Lifecycle state
    pub state: RoomState,
    /// Creation time, monotonic seconds
    pub created_at: u64,
    /// Last join/leave/relay touching this room, monotonic seconds
    pub last_activity: u64,
    /// Owning participant; present whenever the room is non-empty
    pub owner: Option<ClientKey>,
}

impl Room {
    fn new(name: &str, owner: Option<ClientKey>, now: u64) -> Self {
        let mut slots = [EMPTY_SLOT; ROOM_CAPACITY];
        let mut count = 0;
        if let Some(owner_key) = owner {
            slots[0] = ParticipantSlot {
                client: Some(owner_key),
                joined_at: now,
                is_owner: true,
            };
            count = 1;
        }
        Self {
            id: ident::new_id(),
            name: truncate_name(name).to_owned(),
            slots,
            count,
            state: RoomState::Active,
            created_at: now,
            last_activity: now,
            owner,
        }
    }

    /// Occupied seat count
    pub fn participant_count(&self) -> usize {
        self.count
    }

    /// The participant array, slot order
    pub fn slots(&self) -> &[ParticipantSlot] {
        &self.slots
    }

    /// Occupants in slot order
    pub fn participants(&self) -> impl Iterator<Item = ClientKey> + '_ {
        self.slots.iter().filter_map(|slot| slot.client)
    }

    /// True when the client holds a seat here
    pub fn contains(&self, client: ClientKey) -> bool {
        self.slots.iter().any(|slot| slot.client == Some(client))
    }

    /// Seat a client in the lowest-index empty slot.
    ///
    /// `seated_elsewhere` is the caller's knowledge of the client's
    /// back-reference; the duplicate check against this room's own seats
    /// happens here.
    pub fn add_participant(
        &mut self,
        client: ClientKey,
        seated_elsewhere: bool,
        now: u64,
    ) -> Result<(), AddParticipantError> {
        if self.contains(client) {
            return Err(AddParticipantError::AlreadyInThis);
        }
        if seated_elsewhere {
            return Err(AddParticipantError::AlreadyInOther);
        }
        if self.count >= ROOM_CAPACITY {
            return Err(AddParticipantError::Full);
        }
        // First empty seat; count < capacity guarantees one exists
        for slot in self.slots.iter_mut() {
            if slot.client.is_none() {
                *slot = ParticipantSlot {
                    client: Some(client),
                    joined_at: now,
                    is_owner: false,
                };
                break;
            }
        }
        self.count += 1;
        self.last_activity = now;
        Ok(())
    }

    /// Clear a client's seat, promoting a successor when the owner left
    pub fn remove_participant(
        &mut self,
        client: ClientKey,
        now: u64,
    ) -> Result<RemovedParticipant, ParticipantNotFound> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.client == Some(client))
            .ok_or(ParticipantNotFound)?;

        let was_owner = self.slots[index].is_owner;
        self.slots[index] = EMPTY_SLOT;
        self.count -= 1;
        self.last_activity = now;

        let mut new_owner = None;
        if self.count == 0 {
            self.owner = None;
            self.state = RoomState::Empty;
        } else if was_owner {
            // Lowest-index remaining participant inherits ownership
            for slot in self.slots.iter_mut() {
                if let Some(successor) = slot.client {
                    slot.is_owner = true;
                    new_owner = Some(successor);
                    break;
                }
            }
            self.owner = new_owner;
        }

        Ok(RemovedParticipant {
            was_owner,
            new_owner,
            now_empty: self.count == 0,
        })
    }
}

/// Truncate to the stored name limit without splitting a UTF-8 sequence
fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_ROOM_NAME_BYTES {
        return name;
    }
    let mut end = MAX_ROOM_NAME_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Registry at capacity
#[derive(Debug, thiserror::Error)]
#[error("room registry full")]
pub struct RegistryFull;

struct Slot {
    generation: u32,
    room: Option<Room>,
}

/// Slotted table of rooms
pub struct RoomRegistry {
    slots: Vec<Slot>,
    active: usize,
    cursor: usize,
}

impl RoomRegistry {
    /// Pre-allocate `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            room: None,
        });
        Self {
            slots,
            active: 0,
            cursor: 0,
        }
    }

    /// Allocate a room in the first slot not holding an ACTIVE room.
    /// An Empty room still awaiting the reaper may be displaced; its
    /// former participants hold no references to it.
    pub fn create(
        &mut self,
        name: &str,
        owner: Option<ClientKey>,
        now: u64,
    ) -> Result<RoomKey, RegistryFull> {
        let capacity = self.slots.len();
        for step in 0..capacity {
            let index = (self.cursor + step) % capacity;
            let occupied_active = self.slots[index]
                .room
                .as_ref()
                .is_some_and(|room| room.state == RoomState::Active);
            if occupied_active {
                continue;
            }
            let slot = &mut self.slots[index];
            // Displace a non-active occupant still awaiting the reaper
            if slot.room.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.active -= 1;
            }
            slot.room = Some(Room::new(name, owner, now));
            self.cursor = (index + 1) % capacity;
            self.active += 1;
            return Ok(RoomKey {
                slot: index as u32,
                generation: slot.generation,
            });
        }
        Err(RegistryFull)
    }

    /// Resolve a key, failing on stale generations
    pub fn get(&self, key: RoomKey) -> Option<&Room> {
        let slot = self.slots.get(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.room.as_ref()
    }

    /// Mutable resolve
    pub fn get_mut(&mut self, key: RoomKey) -> Option<&mut Room> {
        let slot = self.slots.get_mut(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.room.as_mut()
    }

    /// Find an ACTIVE room by identifier
    pub fn find_by_id(&self, room_id: &str) -> Option<RoomKey> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let room = slot.room.as_ref()?;
            (room.state == RoomState::Active && room.id == room_id).then_some(RoomKey {
                slot: index as u32,
                generation: slot.generation,
            })
        })
    }

    /// Find the room seating a client. Normally bypassed in favour of
    /// the client's back-reference.
    pub fn find_by_client(&self, client: ClientKey) -> Option<RoomKey> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let room = slot.room.as_ref()?;
            room.contains(client).then_some(RoomKey {
                slot: index as u32,
                generation: slot.generation,
            })
        })
    }

    /// Free every room with no participants left; returns how many
    pub fn reap_empty(&mut self) -> usize {
        let mut reaped = 0;
        for slot in self.slots.iter_mut() {
            let empty = slot
                .room
                .as_ref()
                .is_some_and(|room| room.participant_count() == 0);
            if !empty {
                continue;
            }
            if let Some(room) = slot.room.as_mut() {
                room.state = RoomState::Closing;
            }
            slot.room = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.active -= 1;
            reaped += 1;
        }
        reaped
    }

    /// Allocated room count
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Configured slot count
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate allocated rooms in slot order
    pub fn iter(&self) -> impl Iterator<Item = (RoomKey, &Room)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.room.as_ref().map(|room| {
                (
                    RoomKey {
                        slot: index as u32,
                        generation: slot.generation,
                    },
                    room,
                )
            })
        })
    }
}
