//! End-to-end signaling scenarios driven through the handler layer with
//! an in-memory outbound sink standing in for the WebSocket transport.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use beacon_core::clients::ClientState;
use beacon_core::conn::{ConnHandle, OutboundSink};
use beacon_core::{ServerConfig, ServerStats, SignalServer};
use beacon_protocol::Envelope;

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl OutboundSink for RecordingSink {
    fn send_text(&self, frame: &str) -> bool {
        self.frames.lock().unwrap().push(frame.to_owned());
        true
    }
    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

struct Peer {
    handle: ConnHandle,
    sink: Arc<RecordingSink>,
}

impl Peer {
    fn envelopes(&self) -> Vec<Envelope> {
        self.sink
            .frames
            .lock()
            .unwrap()
            .iter()
            .map(|frame| Envelope::parse(frame).unwrap())
            .collect()
    }

    fn last(&self) -> Envelope {
        self.envelopes().pop().expect("peer received nothing")
    }

    fn frame_count(&self) -> usize {
        self.sink.frames.lock().unwrap().len()
    }

    fn id(&self) -> String {
        let first = &self.envelopes()[0];
        assert_eq!(first.event, "client-id");
        first.data["clientId"].as_str().unwrap().to_owned()
    }
}

fn server_with(config: ServerConfig) -> SignalServer {
    SignalServer::new(&config, Arc::new(ServerStats::default()))
}

fn server() -> SignalServer {
    server_with(ServerConfig::default())
}

fn connect(server: &mut SignalServer, token: u64) -> Peer {
    let sink = Arc::new(RecordingSink::default());
    let handle = ConnHandle::new(token, Arc::clone(&sink) as Arc<dyn OutboundSink>);
    server.on_accepted(handle.clone(), 0);
    Peer { handle, sink }
}

fn send(server: &mut SignalServer, peer: &Peer, event: &str, data: Value) {
    send_at(server, peer, event, data, 0);
}

fn send_at(server: &mut SignalServer, peer: &Peer, event: &str, data: Value, now: u64) {
    server.on_frame(&peer.handle, Envelope::new(event, data), now);
}

/// The invariants that must hold after every dispatched event
fn check_invariants(server: &SignalServer) {
    let mut room_ids = std::collections::HashSet::new();
    for (room_key, room) in server.rooms().iter() {
        let seated: Vec<_> = room.participants().collect();
        assert_eq!(room.participant_count(), seated.len());
        assert!(room.participant_count() <= 6);
        assert!(room_ids.insert(room.id.clone()), "duplicate room id");
        if let Some(owner) = room.owner {
            assert!(room.contains(owner), "owner not seated");
            let owner_flags = room.slots().iter().filter(|s| s.is_owner).count();
            assert_eq!(owner_flags, 1);
        }
        for member in seated {
            let client = server.clients().get(member).expect("seated ghost");
            assert_eq!(client.current_room, Some(room_key));
        }
    }

    let mut client_ids = std::collections::HashSet::new();
    for (key, client) in server.clients().iter() {
        assert!(client_ids.insert(client.id.clone()), "duplicate client id");
        match client.current_room {
            Some(room_key) => {
                assert_eq!(client.state, ClientState::InRoom);
                let room = server.rooms().get(room_key).expect("dangling room ref");
                let seats = room
                    .participants()
                    .filter(|&member| member == key)
                    .count();
                assert_eq!(seats, 1);
            }
            None => assert_ne!(client.state, ClientState::InRoom),
        }
    }
}

#[test]
fn s1_two_client_room_formation() {
    let mut server = server();

    let alice = connect(&mut server, 1);
    let first = &alice.envelopes()[0];
    assert_eq!(first.event, "client-id");
    assert_eq!(first.data["clientId"].as_str().unwrap().len(), 36);

    send(&mut server, &alice, "join-room", json!({ "roomName": "demo" }));
    let envelopes = alice.envelopes();
    assert_eq!(envelopes[1].event, "room-created");
    assert_eq!(envelopes[1].data["roomName"], "demo");
    let room_id = envelopes[1].data["roomId"].as_str().unwrap().to_owned();
    assert_eq!(envelopes[2].event, "participants");
    assert_eq!(envelopes[2].data["roomId"], room_id.as_str());
    assert_eq!(envelopes[2].data["participants"], json!([alice.id()]));

    let bob = connect(&mut server, 2);
    send(&mut server, &bob, "join-room", json!({ "roomId": room_id }));

    let expected = json!([alice.id(), bob.id()]);
    assert_eq!(alice.last().data["participants"], expected);
    let bob_last = bob.last();
    assert_eq!(bob_last.event, "participants");
    assert_eq!(bob_last.data["participants"], expected);
    // Bob joined an existing room: no room-created for him
    assert!(bob.envelopes().iter().all(|e| e.event != "room-created"));

    check_invariants(&server);
}

#[test]
fn s2_offer_relay() {
    let mut server = server();
    let alice = connect(&mut server, 1);
    send(&mut server, &alice, "join-room", json!({ "roomName": "demo" }));
    let room_id = alice.envelopes()[1].data["roomId"].as_str().unwrap().to_owned();
    let bob = connect(&mut server, 2);
    send(&mut server, &bob, "join-room", json!({ "roomId": room_id }));

    let alice_frames = alice.frame_count();
    let sdp = json!({ "sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1" });
    send(
        &mut server,
        &alice,
        "offer",
        json!({ "targetClientId": bob.id(), "offer": sdp }),
    );

    let delivered = bob.last();
    assert_eq!(delivered.event, "offer");
    assert_eq!(delivered.data["fromClientId"], alice.id().as_str());
    assert_eq!(delivered.data["offer"], sdp);
    // The sender hears nothing back
    assert_eq!(alice.frame_count(), alice_frames);
    assert_eq!(server.stats().relayed(), 1);

    // Answer and candidate take the same path with their own keys
    send(
        &mut server,
        &bob,
        "answer",
        json!({ "targetClientId": alice.id(), "answer": { "sdp": "v=0" } }),
    );
    let answered = alice.last();
    assert_eq!(answered.event, "answer");
    assert_eq!(answered.data["fromClientId"], bob.id().as_str());

    send(
        &mut server,
        &bob,
        "ice-candidate",
        json!({ "targetClientId": alice.id(), "candidate": { "sdpMid": "0" } }),
    );
    let candidate = alice.last();
    assert_eq!(candidate.event, "ice-candidate");
    assert_eq!(candidate.data["candidate"], json!({ "sdpMid": "0" }));

    check_invariants(&server);
}

#[test]
fn s3_cross_room_relay_refused() {
    let mut server = server();
    let alice = connect(&mut server, 1);
    send(&mut server, &alice, "join-room", json!({ "roomName": "one" }));
    let carol = connect(&mut server, 2);
    send(&mut server, &carol, "join-room", json!({ "roomName": "two" }));

    let carol_frames = carol.frame_count();
    send(
        &mut server,
        &alice,
        "offer",
        json!({ "targetClientId": carol.id(), "offer": {} }),
    );

    let refusal = alice.last();
    assert_eq!(refusal.event, "error");
    assert_eq!(
        refusal.data,
        Value::String("Target client not found in room".into())
    );
    assert_eq!(carol.frame_count(), carol_frames);
    assert_eq!(server.stats().relayed(), 0);

    check_invariants(&server);
}

#[test]
fn s4_room_capacity() {
    let mut server = server();
    let founder = connect(&mut server, 0);
    send(&mut server, &founder, "join-room", json!({ "roomName": "big" }));
    let room_id = founder.envelopes()[1].data["roomId"].as_str().unwrap().to_owned();

    let mut members = vec![founder];
    for token in 1..6 {
        let peer = connect(&mut server, token);
        send(&mut server, &peer, "join-room", json!({ "roomId": room_id }));
        members.push(peer);
    }

    let counts_before: Vec<usize> = members.iter().map(Peer::frame_count).collect();
    let seventh = connect(&mut server, 6);
    send(&mut server, &seventh, "join-room", json!({ "roomId": room_id }));

    let refusal = seventh.last();
    assert_eq!(refusal.event, "error");
    assert_eq!(
        refusal.data,
        Value::String("Room is full (max 6 participants)".into())
    );
    // Nobody inside heard a new participants broadcast
    for (peer, before) in members.iter().zip(counts_before) {
        assert_eq!(peer.frame_count(), before);
    }

    let key = server.rooms().find_by_id(&room_id).unwrap();
    assert_eq!(server.rooms().get(key).unwrap().participant_count(), 6);
    check_invariants(&server);
}

#[test]
fn s5_departure_transfers_ownership() {
    let mut server = server();
    let alice = connect(&mut server, 1);
    send(&mut server, &alice, "join-room", json!({ "roomName": "r" }));
    let room_id = alice.envelopes()[1].data["roomId"].as_str().unwrap().to_owned();
    let bob = connect(&mut server, 2);
    send(&mut server, &bob, "join-room", json!({ "roomId": room_id }));

    server.on_closed(&alice.handle, 1);

    let last = bob.last();
    assert_eq!(last.event, "participants");
    assert_eq!(last.data["participants"], json!([bob.id()]));

    let key = server.rooms().find_by_id(&room_id).unwrap();
    let room = server.rooms().get(key).unwrap();
    let bob_key = server.clients().find_by_handle(&bob.handle).unwrap();
    assert_eq!(room.owner, Some(bob_key));
    assert_eq!(server.clients().active_count(), 1);

    check_invariants(&server);
}

#[test]
fn s6_idle_reap() {
    let mut server = server();
    let sleeper = connect(&mut server, 1);
    let keeper = connect(&mut server, 2);
    send(&mut server, &sleeper, "join-room", json!({ "roomName": "r" }));
    let room_id = sleeper.envelopes()[1].data["roomId"].as_str().unwrap().to_owned();
    send(&mut server, &keeper, "join-room", json!({ "roomId": room_id }));

    // Keeper stays active at t=600; sleeper last spoke at t=0
    send_at(&mut server, &keeper, "leave-room", Value::Null, 600);
    send_at(&mut server, &keeper, "join-room", json!({ "roomId": room_id }), 600);

    server.reap(600);

    assert!(*sleeper.sink.closed.lock().unwrap());
    assert_eq!(server.clients().active_count(), 1);
    let last = keeper.last();
    assert_eq!(last.event, "participants");
    assert_eq!(last.data["participants"], json!([keeper.id()]));

    // Once every occupant has aged out, rooms empty and are reaped in
    // the same pass
    let loner = connect(&mut server, 3);
    send_at(&mut server, &loner, "join-room", json!({ "roomName": "x" }), 600);
    server.reap(1200);
    assert_eq!(server.clients().active_count(), 0);
    assert_eq!(server.rooms().active_count(), 0);

    check_invariants(&server);
}

#[test]
fn leave_laws_are_idempotent() {
    let mut server = server();
    let peer = connect(&mut server, 1);

    // Leave outside a room: no state change, no message
    let before = peer.frame_count();
    send(&mut server, &peer, "leave-room", Value::Null);
    assert_eq!(peer.frame_count(), before);

    send(&mut server, &peer, "join-room", json!({ "roomName": "r" }));
    send(&mut server, &peer, "leave-room", Value::Null);
    let after_leave = peer.frame_count();
    send(&mut server, &peer, "leave-room", Value::Null);
    assert_eq!(peer.frame_count(), after_leave);

    let key = server.clients().find_by_handle(&peer.handle).unwrap();
    let client = server.clients().get(key).unwrap();
    assert_eq!(client.state, ClientState::Connected);
    assert!(client.current_room.is_none());

    check_invariants(&server);
}

#[test]
fn rejoining_moves_between_rooms() {
    let mut server = server();
    let alice = connect(&mut server, 1);
    let bob = connect(&mut server, 2);
    send(&mut server, &alice, "join-room", json!({ "roomName": "first" }));
    let first_id = alice.envelopes()[1].data["roomId"].as_str().unwrap().to_owned();
    send(&mut server, &bob, "join-room", json!({ "roomId": first_id }));

    // join-room while joined behaves as leave + join
    send(&mut server, &alice, "join-room", json!({ "roomName": "second" }));

    let bob_view = bob.last();
    assert_eq!(bob_view.data["participants"], json!([bob.id()]));

    let alice_key = server.clients().find_by_handle(&alice.handle).unwrap();
    let second_key = server.clients().get(alice_key).unwrap().current_room.unwrap();
    let second = server.rooms().get(second_key).unwrap();
    assert_eq!(second.name, "second");
    assert_ne!(second.id, first_id);
    assert!(second.contains(alice_key));

    let first_key = server.rooms().find_by_id(&first_id).unwrap();
    assert!(!server.rooms().get(first_key).unwrap().contains(alice_key));

    check_invariants(&server);
}

#[test]
fn room_registry_exhaustion_refuses_creation() {
    let mut config = ServerConfig::default();
    config.max_rooms = 2;
    let mut server = server_with(config);

    let mut peers = Vec::new();
    for token in 0..2 {
        let peer = connect(&mut server, token);
        send(&mut server, &peer, "join-room", json!({ "roomName": "r" }));
        peers.push(peer);
    }

    let overflow = connect(&mut server, 9);
    send(&mut server, &overflow, "join-room", json!({ "roomName": "r3" }));
    let refusal = overflow.last();
    assert_eq!(refusal.event, "error");
    assert_eq!(refusal.data, Value::String("Cannot create room".into()));

    // The refused client stays roomless and functional
    let key = server.clients().find_by_handle(&overflow.handle).unwrap();
    assert!(server.clients().get(key).unwrap().current_room.is_none());
    assert_eq!(
        server.clients().get(key).unwrap().state,
        ClientState::Connected
    );

    // Capacity freed by an emptied room is usable again
    send(&mut server, &peers[0], "leave-room", Value::Null);
    send(&mut server, &overflow, "join-room", json!({ "roomName": "r3" }));
    assert_eq!(overflow.last().event, "participants");

    check_invariants(&server);
}

#[test]
fn client_registry_exhaustion_refuses_accept() {
    let mut config = ServerConfig::default();
    config.max_clients = 2;
    let mut server = server_with(config);

    let a = connect(&mut server, 1);
    let b = connect(&mut server, 2);
    let refused = connect(&mut server, 3);

    assert_eq!(a.frame_count(), 1);
    assert_eq!(b.frame_count(), 1);
    assert_eq!(refused.frame_count(), 0);
    assert!(*refused.sink.closed.lock().unwrap());

    // A departing client frees the slot for the next accept
    server.on_closed(&a.handle, 1);
    let replacement = connect(&mut server, 4);
    assert_eq!(replacement.frame_count(), 1);

    check_invariants(&server);
}

#[test]
fn disconnect_purges_all_references() {
    let mut server = server();
    let alice = connect(&mut server, 1);
    send(&mut server, &alice, "join-room", json!({ "roomName": "r" }));
    let room_id = alice.envelopes()[1].data["roomId"].as_str().unwrap().to_owned();
    let bob = connect(&mut server, 2);
    send(&mut server, &bob, "join-room", json!({ "roomId": room_id }));

    let alice_key = server.clients().find_by_handle(&alice.handle).unwrap();
    server.on_closed(&alice.handle, 1);

    for (_, room) in server.rooms().iter() {
        assert!(!room.contains(alice_key));
    }
    assert!(server.clients().get(alice_key).is_none());

    // A signal aimed at the departed id is a routing error, not a crash
    send(
        &mut server,
        &bob,
        "offer",
        json!({ "targetClientId": alice.id(), "offer": {} }),
    );
    assert_eq!(
        bob.last().data,
        Value::String("Target client not found in room".into())
    );

    check_invariants(&server);
}

#[test]
fn opaque_payloads_pass_through_untouched() {
    let mut server = server();
    let alice = connect(&mut server, 1);
    send(&mut server, &alice, "join-room", json!({ "roomName": "r" }));
    let room_id = alice.envelopes()[1].data["roomId"].as_str().unwrap().to_owned();
    let bob = connect(&mut server, 2);
    send(&mut server, &bob, "join-room", json!({ "roomId": room_id }));

    // The server must not inspect or normalize whatever rides under the
    // payload key: strings, numbers, deep objects, null
    for payload in [
        json!("bare string"),
        json!(42),
        json!({ "nested": { "deep": [1, 2, { "sdp": "v=0" }] } }),
        Value::Null,
    ] {
        send(
            &mut server,
            &alice,
            "ice-candidate",
            json!({ "targetClientId": bob.id(), "candidate": payload }),
        );
        assert_eq!(bob.last().data["candidate"], payload);
    }

    check_invariants(&server);
}
