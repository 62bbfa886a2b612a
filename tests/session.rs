use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::json;
use syncroom::room::{MemoryStore, PlaybackEvent, PlaybackKind, RoomId};
use syncroom::session::{ConnectionId, ServerEvent, SessionError, Sessions};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

struct TestClient {
  id: ConnectionId,
  rx: UnboundedReceiver<Result<Message, axum::Error>>,
}

impl TestClient {
  /// Drains everything the server pushed since the last call.
  fn events(&mut self) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(message) = self.rx.try_recv() {
      if let Ok(Message::Text(payload)) = message {
        events.push(payload.parse().expect("server sent invalid event"));
      }
    }
    events
  }
}

fn sessions() -> Sessions {
  Sessions::new(Arc::new(MemoryStore::new()))
}

fn connect(sessions: &Sessions) -> TestClient {
  let (tx, rx) = unbounded_channel();
  let id = sessions.add_connection(tx);
  let mut client = TestClient { id, rx };
  // Consume the welcome event; tests that care assert on it separately.
  let events = client.events();
  assert!(matches!(events.as_slice(), [ServerEvent::Connected { connection_id }] if *connection_id == id));
  client
}

fn room(id: &str) -> RoomId {
  RoomId::new(id)
}

#[test]
fn create_twice_fails_the_second_time() {
  let sessions = sessions();
  let a = connect(&sessions);
  let b = connect(&sessions);

  sessions.create_room(a.id, room("movie-night"), "ana").unwrap();
  let err = sessions.create_room(b.id, room("movie-night"), "bob").unwrap_err();
  assert!(matches!(err, SessionError::RoomAlreadyExists));

  // The winner's room is intact: a joiner still sees ana as owner.
  let mut c = connect(&sessions);
  sessions.join_room(c.id, room("movie-night"), "cleo").unwrap();
  let owner = c.events().into_iter().find_map(|e| match e {
    ServerEvent::RoomSync { owner, .. } => Some(owner),
    _ => None,
  });
  assert_eq!(owner.as_deref(), Some("ana"));
}

#[test]
fn creator_receives_snapshot_and_roster() {
  let sessions = sessions();
  let mut a = connect(&sessions);

  sessions.create_room(a.id, room("movie-night"), "ana").unwrap();

  let events = a.events();
  let (owner, users) = events
    .iter()
    .find_map(|e| match e {
      ServerEvent::RoomSync { owner, users, .. } => Some((owner.clone(), users.clone())),
      _ => None,
    })
    .expect("creator got no snapshot");
  assert_eq!(owner, "ana");
  assert_eq!(users.len(), 1);
  assert_eq!(users[0].connection_id, a.id);

  let roster = events
    .iter()
    .find_map(|e| match e {
      ServerEvent::AllUsers { users } => Some(users),
      _ => None,
    })
    .expect("creator got no roster refresh");
  assert_eq!(roster.len(), 1);
}

#[test]
fn join_missing_room_fails_without_mutating_the_store() {
  let sessions = sessions();
  let a = connect(&sessions);

  let err = sessions.join_room(a.id, room("ghost"), "ana").unwrap_err();
  assert!(matches!(err, SessionError::RoomNotFound));
  assert!(sessions.room_ids().unwrap().is_empty());
}

#[test]
fn joiner_snapshot_contains_itself_exactly_once() {
  let sessions = sessions();
  let a = connect(&sessions);
  let mut b = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions.join_room(b.id, room("r"), "bob").unwrap();

  let users = b
    .events()
    .into_iter()
    .find_map(|e| match e {
      ServerEvent::RoomSync { users, .. } => Some(users),
      _ => None,
    })
    .expect("joiner got no snapshot");
  let own = users.iter().filter(|u| u.connection_id == b.id).count();
  assert_eq!(own, 1);
}

#[test]
fn roster_stays_unique_across_join_leave_rejoin() {
  let sessions = sessions();
  let a = connect(&sessions);
  let mut observer = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions.join_room(observer.id, room("r"), "olga").unwrap();

  let b1 = connect(&sessions);
  sessions.join_room(b1.id, room("r"), "bob").unwrap();
  sessions.leave_room(b1.id, &room("r")).unwrap();

  // Rejoin under the same username from a fresh transport session, then a
  // reconnect replacing it in place.
  let b2 = connect(&sessions);
  sessions.join_room(b2.id, room("r"), "bob").unwrap();
  let b3 = connect(&sessions);
  sessions.join_room(b3.id, room("r"), "bob").unwrap();

  let users = observer
    .events()
    .into_iter()
    .rev()
    .find_map(|e| match e {
      ServerEvent::AllUsers { users } => Some(users),
      _ => None,
    })
    .expect("observer got no roster refresh");

  let usernames: HashSet<_> = users.iter().map(|u| u.username.as_str()).collect();
  let connections: HashSet<_> = users.iter().map(|u| u.connection_id).collect();
  assert_eq!(users.len(), 3);
  assert_eq!(usernames.len(), users.len(), "duplicate username in roster");
  assert_eq!(connections.len(), users.len(), "duplicate connection id in roster");
  let bob = users.iter().find(|u| u.username == "bob").unwrap();
  assert_eq!(bob.connection_id, b3.id);
}

#[test]
fn switching_rooms_leaves_the_previous_roster() {
  let sessions = sessions();
  let mut a = connect(&sessions);
  let mut h = connect(&sessions);
  let b = connect(&sessions);

  sessions.create_room(a.id, room("first"), "ana").unwrap();
  sessions.create_room(h.id, room("second"), "hana").unwrap();
  sessions.join_room(b.id, room("first"), "bob").unwrap();
  a.events();
  h.events();

  sessions.join_room(b.id, room("second"), "bob").unwrap();

  // The first room hears the departure and its roster no longer lists bob.
  let events = a.events();
  assert!(events.iter().any(|e| matches!(e,
    ServerEvent::UserDisconnected { connection_id } if *connection_id == b.id)));
  let roster = events
    .iter()
    .rev()
    .find_map(|e| match e {
      ServerEvent::AllUsers { users } => Some(users),
      _ => None,
    })
    .expect("first room got no roster refresh");
  assert!(roster.iter().all(|u| u.username != "bob"));

  // Rejoining the room the connection is already in must not run the
  // departure path against its own fresh entry.
  sessions.join_room(b.id, room("second"), "bob").unwrap();
  let roster = h
    .events()
    .into_iter()
    .rev()
    .find_map(|e| match e {
      ServerEvent::AllUsers { users } => Some(users),
      _ => None,
    })
    .unwrap();
  assert_eq!(roster.len(), 2);
  assert!(roster.iter().any(|u| u.username == "bob"));
}

#[test]
fn leaving_twice_is_a_no_op() {
  let sessions = sessions();
  let a = connect(&sessions);
  let b = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions.join_room(b.id, room("r"), "bob").unwrap();

  sessions.leave_room(b.id, &room("r")).unwrap();
  sessions.leave_room(b.id, &room("r")).unwrap();
  // A connection that never joined is equally harmless.
  let stranger = connect(&sessions);
  sessions.leave_room(stranger.id, &room("r")).unwrap();
}

#[test]
fn disconnect_runs_the_leave_path() {
  let sessions = sessions();
  let mut a = connect(&sessions);
  let b = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions.join_room(b.id, room("r"), "bob").unwrap();
  a.events();

  sessions.remove_connection(b.id).unwrap();

  let events = a.events();
  assert!(events.iter().any(|e| matches!(e,
    ServerEvent::UserDisconnected { connection_id } if *connection_id == b.id)));
  let roster = events.iter().rev().find_map(|e| match e {
    ServerEvent::AllUsers { users } => Some(users),
    _ => None,
  });
  assert_eq!(roster.map(|u| u.len()), Some(1));
}

#[test]
fn change_video_resets_playback_for_later_joiners() {
  let sessions = sessions();
  let a = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions
    .playback_event(
      a.id,
      &room("r"),
      PlaybackEvent { kind: PlaybackKind::Seek, playing: true, position: 99.0 },
    )
    .unwrap();
  sessions.change_video(a.id, &room("r"), "https://youtu.be/xyz").unwrap();

  let mut b = connect(&sessions);
  sessions.join_room(b.id, room("r"), "bob").unwrap();
  let state = b
    .events()
    .into_iter()
    .find_map(|e| match e {
      ServerEvent::RoomSync { video_state, .. } => Some(video_state),
      _ => None,
    })
    .unwrap();
  assert_eq!(state.url, "https://youtu.be/xyz");
  assert_eq!(state.position, 0.0);
  assert!(state.playing);
}

#[test]
fn playback_events_reach_everyone_but_the_sender() {
  let sessions = sessions();
  let mut a = connect(&sessions);
  let mut b = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions.join_room(b.id, room("r"), "bob").unwrap();
  a.events();
  b.events();

  let event = PlaybackEvent { kind: PlaybackKind::Playpause, playing: false, position: 12.0 };
  sessions.playback_event(a.id, &room("r"), event).unwrap();

  assert!(b.events().iter().any(|e| matches!(e,
    ServerEvent::VideoState { event } if !event.playing && event.position == 12.0)));
  assert!(a.events().iter().all(|e| !matches!(e, ServerEvent::VideoState { .. })));
}

#[test]
fn delete_room_sends_one_room_ended_each_and_forgets_the_room() {
  let sessions = sessions();
  let mut a = connect(&sessions);
  let mut b = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions.join_room(b.id, room("r"), "bob").unwrap();
  a.events();
  b.events();

  sessions.delete_room(&room("r")).unwrap();

  for client in [&mut a, &mut b] {
    let ended =
      client.events().iter().filter(|e| matches!(e, ServerEvent::RoomEnded)).count();
    assert_eq!(ended, 1);
  }

  let c = connect(&sessions);
  assert!(matches!(
    sessions.join_room(c.id, room("r"), "cleo").unwrap_err(),
    SessionError::RoomNotFound
  ));
  assert!(matches!(sessions.delete_room(&room("r")).unwrap_err(), SessionError::RoomNotFound));
}

#[test]
fn chat_broadcast_includes_the_sender() {
  let sessions = sessions();
  let mut a = connect(&sessions);
  let mut b = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions.join_room(b.id, room("r"), "bob").unwrap();
  a.events();
  b.events();

  sessions.send_message(&room("r"), "ana", "hi").unwrap();
  sessions.send_message(&room("r"), "bob", "hey").unwrap();

  for client in [&mut a, &mut b] {
    let texts: Vec<_> = client
      .events()
      .into_iter()
      .filter_map(|e| match e {
        ServerEvent::ReceiveMessage { message } => Some(message.text),
        _ => None,
      })
      .collect();
    // Arrival order at the relay is the canonical order for everyone.
    assert_eq!(texts, ["hi", "hey"]);
  }

  // The log is persisted: a later joiner replays it from the snapshot.
  let mut c = connect(&sessions);
  sessions.join_room(c.id, room("r"), "cleo").unwrap();
  let messages = c
    .events()
    .into_iter()
    .find_map(|e| match e {
      ServerEvent::RoomSync { messages, .. } => Some(messages),
      _ => None,
    })
    .unwrap();
  assert_eq!(messages.len(), 2);
}

#[test]
fn toggle_mute_rebroadcasts_the_roster() {
  let sessions = sessions();
  let mut a = connect(&sessions);
  let b = connect(&sessions);

  sessions.create_room(a.id, room("r"), "ana").unwrap();
  sessions.join_room(b.id, room("r"), "bob").unwrap();
  a.events();

  sessions.toggle_mute(b.id, &room("r"), false).unwrap();

  let users = a
    .events()
    .into_iter()
    .rev()
    .find_map(|e| match e {
      ServerEvent::AllUsers { users } => Some(users),
      _ => None,
    })
    .unwrap();
  let bob = users.iter().find(|u| u.connection_id == b.id).unwrap();
  assert!(!bob.is_muted);
}

#[test]
fn signal_relay_forwards_verbatim_and_drops_unknown_targets() {
  let sessions = sessions();
  let a = connect(&sessions);
  let mut b = connect(&sessions);

  let payload = json!({ "sdp": "v=0...", "kind": "offer" });
  sessions.relay_signal(a.id, b.id, payload.clone());

  let events = b.events();
  assert!(events.iter().any(|e| matches!(e,
    ServerEvent::Signal { from, payload: got } if *from == a.id && *got == payload)));

  // No live session for the target: silently dropped, never an error.
  sessions.relay_signal(a.id, ConnectionId::new(), json!({ "sdp": "late" }));
}
