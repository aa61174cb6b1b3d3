use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RoomError;

use super::{Client, Delivery, Mailbox, Message, MessageKind, User};

pub type ClientId = Uuid;

#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Bound of each member's mailbox.
    pub mailbox_capacity: usize,
    /// Record name/email bindings on entry.
    pub verify_identity: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            verify_identity: true,
        }
    }
}

#[derive(Debug)]
struct Member {
    user: Arc<RwLock<User>>,
    mailbox: Arc<Mailbox>,
}

/// Broadcast hub holding every entered client.
///
/// Membership and each member's mailbox are stored together under one lock;
/// broadcasts iterate under the read side so they are linearized against
/// concurrent enter and leave.
#[derive(Debug, Default)]
pub struct Room {
    members: RwLock<HashMap<ClientId, Member>>,
    // lowercase name -> email
    identities: Mutex<HashMap<String, String>>,
    options: RoomOptions,
}

impl Room {
    pub fn new(options: RoomOptions) -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            identities: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Creates a client for `user` and starts its delivery loop.
    ///
    /// Never refuses entry; callers that want identity protection should
    /// check [`Room::can_enter`] first or use [`Room::try_enter`].
    /// Must be called from within a tokio runtime.
    pub fn enter(self: &Arc<Self>, user: User) -> Arc<Client> {
        if self.options.verify_identity {
            if let Some(email) = &user.email {
                self.identities
                    .lock()
                    .entry(user.name_key())
                    .or_insert_with(|| email.clone());
            }
        }

        self.admit(user)
    }

    /// Checks and binds the identity in one step, then enters.
    pub fn try_enter(self: &Arc<Self>, user: User) -> Result<Arc<Client>, RoomError> {
        if !self.claim(&user) {
            return Err(RoomError::MayNotEnter(user.name));
        }

        Ok(self.admit(user))
    }

    /// False iff a different email is already bound to the same name.
    pub fn can_enter(&self, user: &User) -> bool {
        admits(&self.identities.lock(), user)
    }

    /// Like [`Room::can_enter`], but also binds the name when it is free.
    pub(crate) fn claim(&self, user: &User) -> bool {
        let mut identities = self.identities.lock();
        if !admits(&identities, user) {
            return false;
        }

        if self.options.verify_identity {
            if let Some(email) = &user.email {
                identities
                    .entry(user.name_key())
                    .or_insert_with(|| email.clone());
            }
        }
        true
    }

    /// Moves the binding held by `from` over to `to`, so a renaming client
    /// never holds more than one name. False if `to` is bound elsewhere.
    pub(crate) fn rebind(&self, from: &User, to: &User) -> bool {
        let mut identities = self.identities.lock();
        if !admits(&identities, to) {
            return false;
        }

        if self.options.verify_identity {
            if let Some(email) = &to.email {
                let old_key = from.name_key();
                if identities.get(&old_key) == Some(email) {
                    identities.remove(&old_key);
                }
                identities
                    .entry(to.name_key())
                    .or_insert_with(|| email.clone());
            }
        }
        true
    }

    fn admit(self: &Arc<Self>, user: User) -> Arc<Client> {
        let client = Arc::new(Client::new(self.clone(), user, self.options.mailbox_capacity));

        self.members.write().insert(
            client.id(),
            Member {
                user: client.user_cell(),
                mailbox: client.mailbox(),
            },
        );
        client.start_listening();

        info!(client = %client.id(), name = %client.user().name, "entered room");
        client
    }

    /// Pushes `message` to every member, the sender included.
    ///
    /// Returns the number of members it was queued for.
    pub fn broadcast(&self, message: Message) -> usize {
        let members = self.members.read();

        let mut delivered = 0;
        for (id, member) in members.iter() {
            match member.mailbox.push(message.clone()) {
                Delivery::Queued => delivered += 1,
                Delivery::DroppedOldest => {
                    debug!(client = %id, "mailbox full, dropped oldest message");
                    delivered += 1;
                }
                Delivery::Closed => {}
            }
        }
        delivered
    }

    pub fn present_users(&self) -> Vec<User> {
        self.members
            .read()
            .values()
            .map(|member| member.user.read().clone())
            .collect()
    }

    /// Presence snapshot sent on behalf of `from`.
    pub fn presence_message(&self, from: &User) -> Result<Message, serde_json::Error> {
        let users = serde_json::to_string(&self.present_users())?;
        Ok(Message::new(MessageKind::PresentUsers, from.clone(), users))
    }

    pub(crate) fn remove(&self, id: ClientId) -> bool {
        self.members.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn admits(identities: &HashMap<String, String>, user: &User) -> bool {
    match identities.get(&user.name_key()) {
        None => true,
        Some(email) => user.email.as_deref() == Some(email.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Arc<Room> {
        Arc::new(Room::new(RoomOptions::default()))
    }

    #[tokio::test]
    async fn names_are_bound_case_insensitively() {
        let room = room();
        let bob = User::new("Bob", "#000").with_email("a@x");
        assert!(room.can_enter(&bob));

        room.enter(bob);
        assert!(!room.can_enter(&User::new("BOB", "#000").with_email("b@y")));
        assert!(!room.can_enter(&User::new("bob", "#000")));
        assert!(room.can_enter(&User::new("BOB", "#000").with_email("a@x")));
        assert!(room.can_enter(&User::new("Alice", "#000").with_email("b@y")));
    }

    #[tokio::test]
    async fn try_enter_refuses_impersonation() {
        let room = room();
        room.try_enter(User::new("Bob", "#000").with_email("a@x")).unwrap();

        let refused = room.try_enter(User::new("bOb", "#111").with_email("b@y"));
        assert!(matches!(refused, Err(RoomError::MayNotEnter(name)) if name == "bOb"));
        assert_eq!(room.len(), 1);
    }

    #[tokio::test]
    async fn rebind_leaves_foreign_bindings_alone() {
        let room = room();
        room.enter(User::new("Bob", "#000").with_email("b@x"));

        let from = User::new("Bob", "#000").with_email("m@x");
        let to = User::new("Mallory", "#000").with_email("m@x");
        assert!(room.rebind(&from, &to));
        assert!(!room.can_enter(&User::new("Bob", "#000").with_email("m@x")));
    }

    #[tokio::test]
    async fn unverified_rooms_bind_nothing() {
        let room = Arc::new(Room::new(RoomOptions {
            verify_identity: false,
            ..RoomOptions::default()
        }));
        room.enter(User::new("Bob", "#000").with_email("a@x"));
        assert!(room.can_enter(&User::new("bob", "#000").with_email("b@y")));
    }

    #[tokio::test]
    async fn presence_lists_every_member() {
        let room = room();
        room.enter(User::new("Alice", "#f00"));
        room.enter(User::new("Bob", "#0f0"));

        let message = room.presence_message(&User::new("Alice", "#f00")).unwrap();
        assert_eq!(message.kind, MessageKind::PresentUsers);

        let mut users: Vec<User> = serde_json::from_str(&message.text).unwrap();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(users, vec![User::new("Alice", "#f00"), User::new("Bob", "#0f0")]);
    }
}
