use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::client::Client;
use super::messages::{Message, MessageKind, RoomInfo, UserInfo};
use super::types::{Room, RoomId, UserId};

pub(crate) const GENERAL_ROOM_ID: &str = "general";
pub(crate) const GENERAL_ROOM_NAME: &str = "General Chat";

/// Commands sent to the hub actor, applied one at a time in arrival order
pub(crate) enum HubCommand {
    Register { client: Arc<dyn Client> },
    Unregister { client: Arc<dyn Client> },
    JoinRoom { client: Arc<dyn Client>, room: RoomId },
    LeaveRoom { client: Arc<dyn Client>, room: RoomId },
    Broadcast { message: Message },
    Private { user: UserId, message: Message },
}

/// Routing state owned by the hub actor. The lock is write-held only for
/// the duration of a single command; snapshot readers take it shared.
pub(crate) struct HubState {
    clients: HashMap<UserId, Arc<dyn Client>>,
    rooms: HashMap<RoomId, Room>,
}

impl HubState {
    pub(crate) fn new() -> Self {
        let general = RoomId::from(GENERAL_ROOM_ID);
        let mut rooms = HashMap::new();
        rooms.insert(general.clone(), Room::new(general, GENERAL_ROOM_NAME));

        Self {
            clients: HashMap::new(),
            rooms,
        }
    }

    pub(crate) fn apply(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { client } => self.register(client),
            HubCommand::Unregister { client } => self.unregister(client),
            HubCommand::JoinRoom { client, room } => self.join_room(client, room),
            HubCommand::LeaveRoom { client, room } => self.leave_room(client, room),
            HubCommand::Broadcast { message } => self.broadcast_room(message),
            HubCommand::Private { user, message } => self.send_private(&user, message),
        }
    }

    fn register(&mut self, client: Arc<dyn Client>) {
        let user = client.user().clone();

        // Last-register-wins: a reconnect under the same identity replaces
        // the previous handle.
        if self
            .clients
            .insert(user.id.clone(), Arc::clone(&client))
            .is_some()
        {
            debug!("replaced existing registration for {}", user.id);
        }

        info!("user {} ({}) connected", user.username, user.id);

        client.send(&Message::system("Welcome to the chat!"));
        client.send(&Message::system(self.rooms_summary()));
    }

    fn unregister(&mut self, client: Arc<dyn Client>) {
        let user = client.user().clone();

        // Idempotent, and a stale handle that was replaced by a newer
        // registration must not evict its successor.
        let registered = self
            .clients
            .get(&user.id)
            .is_some_and(|current| Arc::ptr_eq(current, &client));
        if !registered {
            return;
        }

        if let Some(room_id) = client.current_room() {
            self.leave_if_member(&client, &room_id);
        }

        self.clients.remove(&user.id);
        info!("user {} ({}) disconnected", user.username, user.id);
    }

    fn join_room(&mut self, client: Arc<dyn Client>, room_id: RoomId) {
        let user = client.user().clone();

        // Leave the current room first. This also runs when rejoining the
        // room the client is already in: a full leave+join cycle.
        if let Some(current) = client.current_room() {
            self.leave_if_member(&client, &current);
        }

        // Unknown rooms are provisioned on first join, named after their id
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone(), room_id.as_str()));
        room.add_member(user.id.clone());
        client.set_current_room(Some(room_id.clone()));

        let join = Message::room_event(
            MessageKind::Join,
            format!("{} joined the room", user.username),
            room_id.clone(),
        );
        self.deliver_to_room(&room_id, &join);

        // Replay history to the joiner before any later broadcast reaches it
        if let Some(room) = self.rooms.get(&room_id) {
            for message in &room.history {
                client.send(message);
            }
        }

        info!("user {} joined room {}", user.username, room_id);
    }

    fn leave_room(&mut self, client: Arc<dyn Client>, room_id: RoomId) {
        if !self.leave_if_member(&client, &room_id) {
            return;
        }
        client.set_current_room(None);
        info!("user {} left room {}", client.user().username, room_id);
    }

    /// Remove the user from a room and notify the remaining members.
    /// Returns false, with no broadcast, when the user was not a member.
    fn leave_if_member(&mut self, client: &Arc<dyn Client>, room_id: &RoomId) -> bool {
        let user = client.user().clone();

        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if !room.remove_member(&user.id) {
            return false;
        }

        let leave = Message::room_event(
            MessageKind::Leave,
            format!("{} left the room", user.username),
            room_id.clone(),
        );
        self.deliver_to_room(room_id, &leave);
        true
    }

    fn broadcast_room(&mut self, message: Message) {
        let Some(room_id) = message.room.clone() else {
            debug!("broadcast without a room id dropped");
            return;
        };

        // Unknown room: no history write, no delivery
        match self.rooms.get_mut(&room_id) {
            Some(room) => room.history.push(message.clone()),
            None => {
                debug!("broadcast to unknown room {} dropped", room_id);
                return;
            }
        }

        self.deliver_to_room(&room_id, &message);
    }

    fn send_private(&self, user_id: &UserId, message: Message) {
        match self.clients.get(user_id) {
            Some(client) => client.send(&message),
            None => debug!("private message to disconnected user {} dropped", user_id),
        }
    }

    fn deliver_to_room(&self, room_id: &RoomId, message: &Message) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        for user_id in &room.members {
            if let Some(client) = self.clients.get(user_id) {
                client.send(message);
            }
        }
    }

    fn rooms_summary(&self) -> String {
        let mut entries: Vec<String> = self
            .rooms
            .values()
            .map(|room| format!("{} ({})", room.name, room.id))
            .collect();
        entries.sort();
        format!("Available rooms: {}", entries.join(", "))
    }

    pub(crate) fn create_room(&mut self, name: &str) -> RoomInfo {
        let id = RoomId::generate();
        self.rooms.insert(id.clone(), Room::new(id.clone(), name));
        info!("room {} ({}) created", name, id);

        RoomInfo {
            id,
            name: name.to_string(),
            user_count: 0,
        }
    }

    pub(crate) fn room_infos(&self) -> Vec<RoomInfo> {
        self.rooms
            .values()
            .map(|room| RoomInfo {
                id: room.id.clone(),
                name: room.name.clone(),
                user_count: room.members.len(),
            })
            .collect()
    }

    pub(crate) fn user_infos(&self) -> Vec<UserInfo> {
        self.clients
            .values()
            .map(|client| {
                let user = client.user();
                UserInfo {
                    id: user.id.clone(),
                    username: user.username.clone(),
                    room: client.current_room(),
                }
            })
            .collect()
    }

    #[cfg(test)]
    fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(&RoomId::from(id))
    }
}

pub(crate) async fn hub_actor(
    state: Arc<RwLock<HubState>>,
    mut rx: mpsc::UnboundedReceiver<HubCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        let mut state = state.write().expect("hub state lock poisoned");
        state.apply(cmd);
    }
}

/// Handle to communicate with the hub actor.
///
/// Mutations are queued and applied in submission order; `create_room` and
/// the list accessors synchronize directly on the shared state instead.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    state: Arc<RwLock<HubState>>,
}

impl Default for HubHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl HubHandle {
    /// Spawn the hub actor and return a handle to it
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(HubState::new()));
        tokio::spawn(hub_actor(Arc::clone(&state), rx));

        Self { tx, state }
    }

    pub fn register(&self, client: Arc<dyn Client>) {
        let _ = self.tx.send(HubCommand::Register { client });
    }

    pub fn unregister(&self, client: Arc<dyn Client>) {
        let _ = self.tx.send(HubCommand::Unregister { client });
    }

    pub fn join_room(&self, client: Arc<dyn Client>, room: RoomId) {
        let _ = self.tx.send(HubCommand::JoinRoom { client, room });
    }

    pub fn leave_room(&self, client: Arc<dyn Client>, room: RoomId) {
        let _ = self.tx.send(HubCommand::LeaveRoom { client, room });
    }

    pub fn broadcast_room(&self, message: Message) {
        let _ = self.tx.send(HubCommand::Broadcast { message });
    }

    pub fn send_private(&self, user: UserId, message: Message) {
        let _ = self.tx.send(HubCommand::Private { user, message });
    }

    /// Allocate a room with a generated id and return its descriptor
    pub fn create_room(&self, name: &str) -> RoomInfo {
        self.state
            .write()
            .expect("hub state lock poisoned")
            .create_room(name)
    }

    /// Snapshot of the room directory
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.state
            .read()
            .expect("hub state lock poisoned")
            .room_infos()
    }

    /// Snapshot of the connected-user directory
    pub fn list_connected_users(&self) -> Vec<UserInfo> {
        self.state
            .read()
            .expect("hub state lock poisoned")
            .user_infos()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::hub::types::User;

    /// In-memory Client recording everything the hub pushes at it
    struct RecorderClient {
        user: User,
        room: Mutex<Option<RoomId>>,
        sent: Mutex<Vec<Message>>,
    }

    impl RecorderClient {
        fn new(username: &str) -> Arc<Self> {
            Arc::new(Self {
                user: User::new(username),
                room: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn kinds(&self) -> Vec<MessageKind> {
            self.sent().iter().map(|m| m.kind).collect()
        }
    }

    impl Client for RecorderClient {
        fn send(&self, message: &Message) {
            self.sent.lock().unwrap().push(message.clone());
        }

        fn user(&self) -> &User {
            &self.user
        }

        fn current_room(&self) -> Option<RoomId> {
            self.room.lock().unwrap().clone()
        }

        fn set_current_room(&self, room: Option<RoomId>) {
            *self.room.lock().unwrap() = room;
        }
    }

    fn as_client(recorder: &Arc<RecorderClient>) -> Arc<dyn Client> {
        Arc::clone(recorder) as Arc<dyn Client>
    }

    #[test]
    fn register_sends_welcome_then_room_list() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));

        let sent = alice.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, MessageKind::System);
        assert_eq!(sent[0].content, "Welcome to the chat!");
        assert_eq!(sent[1].kind, MessageKind::System);
        assert_eq!(sent[1].content, "Available rooms: General Chat (general)");
    }

    #[test]
    fn register_indexes_client_by_user_id() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));

        let users = state.user_infos();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, alice.user.id);
        assert_eq!(users[0].username, "alice");
    }

    #[test]
    fn duplicate_registration_replaces_prior_handle() {
        let mut state = HubState::new();
        let first = RecorderClient::new("alice");
        let second = Arc::new(RecorderClient {
            user: first.user.clone(),
            room: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        });

        state.register(as_client(&first));
        state.register(as_client(&second));
        assert_eq!(state.user_infos().len(), 1);

        // only the replacement handle receives traffic now
        state.send_private(&first.user.id, Message::system("ping"));
        assert_eq!(first.sent_count(), 2);
        assert_eq!(second.sent_count(), 3);
    }

    #[test]
    fn stale_unregister_does_not_evict_replacement() {
        let mut state = HubState::new();
        let first = RecorderClient::new("alice");
        let second = Arc::new(RecorderClient {
            user: first.user.clone(),
            room: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        });

        state.register(as_client(&first));
        state.register(as_client(&second));
        state.unregister(as_client(&first));

        assert_eq!(state.user_infos().len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));
        state.unregister(as_client(&alice));
        state.unregister(as_client(&alice));

        assert!(state.user_infos().is_empty());
    }

    #[test]
    fn unregister_broadcasts_leave_to_remaining_members() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");
        let bob = RecorderClient::new("bob");

        state.register(as_client(&alice));
        state.register(as_client(&bob));
        state.join_room(as_client(&alice), RoomId::from("general"));
        state.join_room(as_client(&bob), RoomId::from("general"));

        let before = bob.sent_count();
        state.unregister(as_client(&alice));

        let sent = bob.sent();
        assert_eq!(sent.len(), before + 1);
        let leave = &sent[before];
        assert_eq!(leave.kind, MessageKind::Leave);
        assert_eq!(leave.content, "alice left the room");
        // the leaver is gone: no self-delivery
        assert!(!alice.kinds().contains(&MessageKind::Leave));
    }

    // Scenario: client joins an unknown room, which is auto-provisioned
    #[test]
    fn join_auto_provisions_unknown_room() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));
        state.join_room(as_client(&alice), RoomId::from("lobby"));

        let rooms = state.room_infos();
        let lobby = rooms
            .iter()
            .find(|r| r.id == RoomId::from("lobby"))
            .expect("lobby should exist");
        assert_eq!(lobby.name, "lobby");
        assert_eq!(lobby.user_count, 1);
        assert_eq!(alice.current_room(), Some(RoomId::from("lobby")));
    }

    // Scenario: two members, one broadcast; history length 1
    #[test]
    fn broadcast_delivers_to_members_and_appends_history() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");
        let bob = RecorderClient::new("bob");

        state.register(as_client(&alice));
        state.register(as_client(&bob));
        state.join_room(as_client(&alice), RoomId::from("general"));
        state.join_room(as_client(&bob), RoomId::from("general"));

        state.broadcast_room(Message::text(&alice.user, "hi", RoomId::from("general")));

        let received = bob
            .sent()
            .into_iter()
            .find(|m| m.kind == MessageKind::Text)
            .expect("bob should receive the text");
        assert_eq!(received.content, "hi");
        assert_eq!(state.room("general").unwrap().history.len(), 1);

        // sender is a member too: exactly one copy each
        let alice_copies = alice.kinds().iter().filter(|k| **k == MessageKind::Text).count();
        assert_eq!(alice_copies, 1);
    }

    #[test]
    fn broadcast_to_unknown_room_is_dropped() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));
        state.join_room(as_client(&alice), RoomId::from("general"));

        state.broadcast_room(Message::text(&alice.user, "void", RoomId::from("nowhere")));

        assert!(state.room("nowhere").is_none());
        assert!(!alice.sent().iter().any(|m| m.content == "void"));
    }

    // History equals the broadcast sequence, in call order
    #[test]
    fn history_preserves_broadcast_order() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));
        state.join_room(as_client(&alice), RoomId::from("general"));

        for n in 0..5 {
            state.broadcast_room(Message::text(
                &alice.user,
                format!("msg-{}", n),
                RoomId::from("general"),
            ));
        }

        let history: Vec<String> = state
            .room("general")
            .unwrap()
            .history
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(history, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
    }

    // A joiner receives all prior broadcasts, in order, before anything newer
    #[test]
    fn join_replays_full_history_in_order() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");
        let bob = RecorderClient::new("bob");

        state.register(as_client(&alice));
        state.register(as_client(&bob));
        state.join_room(as_client(&alice), RoomId::from("general"));
        state.broadcast_room(Message::text(&alice.user, "one", RoomId::from("general")));
        state.broadcast_room(Message::text(&alice.user, "two", RoomId::from("general")));

        state.join_room(as_client(&bob), RoomId::from("general"));
        state.broadcast_room(Message::text(&alice.user, "three", RoomId::from("general")));

        let texts: Vec<String> = bob
            .sent()
            .into_iter()
            .filter(|m| m.kind == MessageKind::Text)
            .map(|m| m.content)
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    // Scenario: joining room B while in room A leaves A with one broadcast
    #[test]
    fn join_leaves_previous_room_first() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");
        let bob = RecorderClient::new("bob");

        state.register(as_client(&alice));
        state.register(as_client(&bob));
        state.join_room(as_client(&bob), RoomId::from("room-a"));
        state.join_room(as_client(&alice), RoomId::from("room-a"));

        state.join_room(as_client(&alice), RoomId::from("room-b"));

        let rooms = state.room_infos();
        let room_a = rooms.iter().find(|r| r.id == RoomId::from("room-a")).unwrap();
        let room_b = rooms.iter().find(|r| r.id == RoomId::from("room-b")).unwrap();
        assert_eq!(room_a.user_count, 1);
        assert_eq!(room_b.user_count, 1);
        assert_eq!(alice.current_room(), Some(RoomId::from("room-b")));

        let leaves = bob
            .sent()
            .iter()
            .filter(|m| m.kind == MessageKind::Leave && m.content == "alice left the room")
            .count();
        assert_eq!(leaves, 1);
    }

    // Each user id appears in at most one member set at any point
    #[test]
    fn user_belongs_to_at_most_one_room() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));
        for room in ["general", "room-a", "room-b", "room-a"] {
            state.join_room(as_client(&alice), RoomId::from(room));

            let memberships: usize = state
                .rooms
                .values()
                .filter(|r| r.members.contains(&alice.user.id))
                .count();
            assert_eq!(memberships, 1);
        }
    }

    #[test]
    fn rejoining_same_room_produces_leave_join_pair() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");
        let bob = RecorderClient::new("bob");

        state.register(as_client(&alice));
        state.register(as_client(&bob));
        state.join_room(as_client(&alice), RoomId::from("general"));
        state.join_room(as_client(&bob), RoomId::from("general"));

        let before = bob.sent_count();
        state.join_room(as_client(&alice), RoomId::from("general"));

        let kinds: Vec<MessageKind> = bob.kinds()[before..].to_vec();
        assert_eq!(kinds, vec![MessageKind::Leave, MessageKind::Join]);
    }

    #[test]
    fn leave_is_idempotent() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");
        let bob = RecorderClient::new("bob");

        state.register(as_client(&alice));
        state.register(as_client(&bob));
        state.join_room(as_client(&alice), RoomId::from("general"));
        state.join_room(as_client(&bob), RoomId::from("general"));

        let before = bob.sent_count();
        state.leave_room(as_client(&alice), RoomId::from("general"));
        state.leave_room(as_client(&alice), RoomId::from("general"));

        let leaves = bob.kinds()[before..]
            .iter()
            .filter(|k| **k == MessageKind::Leave)
            .count();
        assert_eq!(leaves, 1);
        assert!(alice.current_room().is_none());
        assert_eq!(state.room("general").unwrap().members.len(), 1);
    }

    #[test]
    fn leave_room_not_joined_is_a_noop() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));
        state.leave_room(as_client(&alice), RoomId::from("general"));

        assert!(alice.kinds().iter().all(|k| *k == MessageKind::System));
    }

    #[test]
    fn private_message_reaches_only_the_recipient() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");
        let bob = RecorderClient::new("bob");

        state.register(as_client(&alice));
        state.register(as_client(&bob));

        let message = Message::private(&alice.user, "psst", bob.user.id.clone());
        state.send_private(&bob.user.id, message);

        assert!(bob.sent().iter().any(|m| m.content == "psst"));
        assert!(!alice.sent().iter().any(|m| m.content == "psst"));
    }

    // No room state changes, no error
    #[test]
    fn private_message_to_disconnected_user_is_dropped() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");

        state.register(as_client(&alice));
        state.join_room(as_client(&alice), RoomId::from("general"));
        let history_before = state.room("general").unwrap().history.len();

        let ghost = UserId::from("user_00000000");
        let message = Message::private(&alice.user, "hello?", ghost.clone());
        state.send_private(&ghost, message);

        assert_eq!(state.room("general").unwrap().history.len(), history_before);
    }

    #[test]
    fn create_room_allocates_fresh_id() {
        let mut state = HubState::new();

        let info = state.create_room("Design");
        assert_eq!(info.name, "Design");
        assert_eq!(info.user_count, 0);
        assert!(info.id.as_str().starts_with("room_"));
        assert!(state.rooms.contains_key(&info.id));
    }

    #[test]
    fn list_connected_users_reports_rooms() {
        let mut state = HubState::new();
        let alice = RecorderClient::new("alice");
        let bob = RecorderClient::new("bob");

        state.register(as_client(&alice));
        state.register(as_client(&bob));
        state.join_room(as_client(&alice), RoomId::from("general"));

        let users = state.user_infos();
        let alice_info = users.iter().find(|u| u.id == alice.user.id).unwrap();
        let bob_info = users.iter().find(|u| u.id == bob.user.id).unwrap();
        assert_eq!(alice_info.room, Some(RoomId::from("general")));
        assert!(bob_info.room.is_none());
    }

    #[tokio::test]
    async fn handle_applies_commands_in_submission_order() {
        let handle = HubHandle::new();
        let alice = RecorderClient::new("alice");

        handle.register(as_client(&alice));
        handle.join_room(as_client(&alice), RoomId::from("general"));
        handle.broadcast_room(Message::text(&alice.user, "hi", RoomId::from("general")));

        tokio::time::timeout(Duration::from_secs(1), async {
            while alice.sent_count() < 4 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("hub actor did not drain the command queue");

        assert_eq!(
            alice.kinds(),
            vec![
                MessageKind::System,
                MessageKind::System,
                MessageKind::Join,
                MessageKind::Text,
            ]
        );
        assert_eq!(handle.list_connected_users().len(), 1);
    }
}
