use std::{future::Future, sync::Arc};

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RoomError;

use super::{ClientId, Mailbox, Message, MessageKind, ProfileChange, Room, User};

/// Callback run by the delivery loop for every message addressed to a client.
pub type OnMessage = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// One participant's session in a room.
///
/// A client is created by [`Room::enter`] and becomes terminal after its
/// first successful [`Client::leave`].
pub struct Client {
    id: ClientId,
    user: Arc<RwLock<User>>,
    room: Mutex<Option<Arc<Room>>>,
    mailbox: Arc<Mailbox>,
    on_message: Arc<RwLock<Option<OnMessage>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("user", &*self.user.read())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Client {
    pub(crate) fn new(room: Arc<Room>, user: User, mailbox_capacity: usize) -> Self {
        Self {
            id: Uuid::now_v7(),
            user: Arc::new(RwLock::new(user)),
            room: Mutex::new(Some(room)),
            mailbox: Arc::new(Mailbox::new(mailbox_capacity)),
            on_message: Arc::new(RwLock::new(None)),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Snapshot of the client's current user.
    pub fn user(&self) -> User {
        self.user.read().clone()
    }

    pub fn room(&self) -> Option<Arc<Room>> {
        self.room.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.room.lock().is_some()
    }

    pub(crate) fn user_cell(&self) -> Arc<RwLock<User>> {
        self.user.clone()
    }

    pub(crate) fn mailbox(&self) -> Arc<Mailbox> {
        self.mailbox.clone()
    }

    /// Installs the callback the delivery loop hands messages to.
    ///
    /// Messages that arrive before a callback is installed are discarded.
    pub fn on_message<F, Fut>(&self, callback: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: OnMessage =
            Arc::new(move |message: Message| -> BoxFuture<'static, ()> { Box::pin(callback(message)) });
        *self.on_message.write() = Some(callback);
    }

    /// Broadcasts `text` to the client's room under its current user.
    pub fn send(&self, kind: MessageKind, text: impl Into<String>) -> Result<(), RoomError> {
        let room = self.room().ok_or(RoomError::NotInRoom)?;
        room.broadcast(Message::new(kind, self.user(), text));
        Ok(())
    }

    /// Sends the room's presence list. Encoding failures are logged and dropped.
    pub fn broadcast_user_list(&self) -> Result<(), RoomError> {
        let room = self.room().ok_or(RoomError::NotInRoom)?;
        match room.presence_message(&self.user()) {
            Ok(message) => {
                room.broadcast(message);
            }
            Err(error) => warn!(client = %self.id, %error, "failed to encode presence list"),
        }
        Ok(())
    }

    /// Announces a profile change on behalf of the old user, then applies it.
    ///
    /// A rename onto a name bound to another identity is refused; otherwise
    /// the client's binding follows it to the new name.
    pub fn change_profile(&self, change: &ProfileChange) -> Result<User, RoomError> {
        let room = self.room().ok_or(RoomError::NotInRoom)?;
        let current = self.user();
        let updated = change.apply_to(&current);

        if updated.name_key() != current.name_key() && !room.rebind(&current, &updated) {
            return Err(RoomError::MayNotEnter(updated.name));
        }

        room.broadcast(Message::new(
            MessageKind::ChangeUser,
            current,
            format!("{}\n{}", updated.name, updated.color),
        ));
        *self.user.write() = updated.clone();

        info!(client = %self.id, name = %updated.name, color = %updated.color, "changed user");
        Ok(updated)
    }

    /// Leaves the room. Only the first call has any effect; later calls
    /// report [`RoomError::NotInRoom`].
    pub fn leave(&self) -> Result<(), RoomError> {
        let room = self.room.lock().take().ok_or(RoomError::NotInRoom)?;

        room.remove(self.id);
        self.mailbox.close();

        let user = self.user();
        info!(client = %self.id, name = %user.name, "left room");

        match room.presence_message(&user) {
            Ok(message) => {
                room.broadcast(message);
            }
            Err(error) => warn!(client = %self.id, %error, "failed to encode presence list"),
        }
        Ok(())
    }

    /// Spawns the delivery loop. It ends when the mailbox is closed.
    pub(crate) fn start_listening(&self) {
        let id = self.id;
        let mailbox = self.mailbox.clone();
        let on_message = self.on_message.clone();

        tokio::spawn(async move {
            while let Some(message) = mailbox.recv().await {
                let callback = on_message.read().clone();
                match callback {
                    Some(callback) => callback(message).await,
                    None => debug!(client = %id, kind = ?message.kind, "no receiver yet, message discarded"),
                }
            }
            debug!(client = %id, "delivery loop finished");
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::rooms::RoomOptions;

    fn room() -> Arc<Room> {
        Arc::new(Room::new(RoomOptions::default()))
    }

    fn listen(client: &Client) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on_message(move |message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
            }
        });
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("delivery loop closed")
    }

    #[tokio::test]
    async fn leave_twice_reports_not_in_room() {
        let room = room();
        let client = room.enter(User::new("Alice", "#f00"));

        assert!(client.leave().is_ok());
        assert!(matches!(client.leave(), Err(RoomError::NotInRoom)));
        assert!(!client.is_active());
        assert!(room.is_empty());
    }

    #[tokio::test]
    async fn send_after_leave_fails() {
        let room = room();
        let client = room.enter(User::new("Alice", "#f00"));
        client.leave().unwrap();

        assert!(matches!(
            client.send(MessageKind::Text, "late"),
            Err(RoomError::NotInRoom)
        ));
        assert!(matches!(client.broadcast_user_list(), Err(RoomError::NotInRoom)));
    }

    #[tokio::test]
    async fn profile_change_is_sent_as_old_user() {
        let room = room();
        let client = room.enter(User::new("Alice", "#f00"));
        let mut rx = listen(&client);

        let change = ProfileChange {
            name: Some("Alicia".to_owned()),
            color: None,
        };
        client.change_profile(&change).unwrap();

        let message = next(&mut rx).await;
        assert_eq!(message.kind, MessageKind::ChangeUser);
        assert_eq!(message.user.name, "Alice");
        assert_eq!(message.text, "Alicia\n#f00");
        assert_eq!(client.user().name, "Alicia");
    }

    #[tokio::test]
    async fn rename_onto_bound_name_is_refused() {
        let room = room();
        room.enter(User::new("Bob", "#000").with_email("a@x"));
        let mallory = room.enter(User::new("Mallory", "#000").with_email("m@x"));

        let change = ProfileChange {
            name: Some("BOB".to_owned()),
            color: None,
        };
        assert!(matches!(
            mallory.change_profile(&change),
            Err(RoomError::MayNotEnter(_))
        ));
        assert_eq!(mallory.user().name, "Mallory");
    }

    #[tokio::test]
    async fn renames_keep_a_single_binding() {
        let room = room();
        let mallory = room.enter(User::new("Mallory", "#000").with_email("m@x"));

        for name in ["Alice", "Bob", "Carol"] {
            let change = ProfileChange {
                name: Some(name.to_owned()),
                color: None,
            };
            mallory.change_profile(&change).unwrap();
        }
        mallory.leave().unwrap();

        assert!(room.can_enter(&User::new("Mallory", "#000").with_email("x@x")));
        assert!(room.can_enter(&User::new("Alice", "#000").with_email("alice@x")));
        assert!(room.can_enter(&User::new("Bob", "#000").with_email("bob@x")));
        assert!(!room.can_enter(&User::new("Carol", "#000").with_email("carol@x")));
    }

    #[tokio::test]
    async fn leave_announces_presence_to_the_rest() {
        let room = room();
        let alice = room.enter(User::new("Alice", "#f00"));
        let bob = room.enter(User::new("Bob", "#0f0"));
        let mut rx = listen(&alice);

        bob.leave().unwrap();

        let message = next(&mut rx).await;
        assert_eq!(message.kind, MessageKind::PresentUsers);
        assert_eq!(message.user.name, "Bob");
        let users: Vec<User> = serde_json::from_str(&message.text).unwrap();
        assert_eq!(users, vec![User::new("Alice", "#f00")]);
    }
}
