use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

use super::User;

/// Longest `text` a message may carry, in chars. Longer text is truncated.
pub const MAX_TEXT_LEN: usize = 65536;

/// Wire tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum MessageKind {
    Hello = 0,
    Text = 1,
    ChangeUser = 2,
    PresentUsers = 3,
    EmptyCanvas = 4,
    Auth = 5,
    AuthAck = 6,
    AuthRst = 7,
    MayNotEnter = 8,
    SetName = 9,
    SetColor = 10,
}

impl From<MessageKind> for i64 {
    fn from(kind: MessageKind) -> Self {
        kind as i64
    }
}

impl TryFrom<i64> for MessageKind {
    type Error = ProtocolError;

    fn try_from(tag: i64) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Self::Hello,
            1 => Self::Text,
            2 => Self::ChangeUser,
            3 => Self::PresentUsers,
            4 => Self::EmptyCanvas,
            5 => Self::Auth,
            6 => Self::AuthAck,
            7 => Self::AuthRst,
            8 => Self::MayNotEnter,
            9 => Self::SetName,
            10 => Self::SetColor,
            _ => return Err(ProtocolError::UnknownMessageKind(tag)),
        })
    }
}

/// Unit of communication between a room and its clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub user: User,
    pub text: String,
}

impl Message {
    pub fn new(kind: MessageKind, user: User, text: impl Into<String>) -> Self {
        let mut text = text.into();
        truncate_text(&mut text);

        Self { kind, user, text }
    }
}

pub fn truncate_text(text: &mut String) {
    if let Some((cut, _)) = text.char_indices().nth(MAX_TEXT_LEN) {
        text.truncate(cut);
    }
}

/// Raw frame as sent by a browser: `{"type": 1, "text": "..."}`.
#[derive(Debug, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: i64,
    #[serde(default)]
    pub text: String,
}

/// Requested profile fields; `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileChange {
    pub name: Option<String>,
    pub color: Option<String>,
}

impl ProfileChange {
    pub fn apply_to(&self, user: &User) -> User {
        User {
            name: self.name.clone().unwrap_or_else(|| user.name.clone()),
            color: self.color.clone().unwrap_or_else(|| user.color.clone()),
            email: user.email.clone(),
        }
    }
}

/// A decoded client frame with its payload already split into fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Hello(User),
    Text(String),
    ChangeUser(ProfileChange),
    EmptyCanvas(String),
    Auth(String),
}

impl Request {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_slice(data)?;
        Self::parse(frame)
    }

    pub fn parse(Frame { kind, mut text }: Frame) -> Result<Self, ProtocolError> {
        let kind = MessageKind::try_from(kind)?;
        truncate_text(&mut text);

        match kind {
            MessageKind::Hello => {
                let fields: Vec<&str> = text.split('\n').collect();
                let user = match fields[..] {
                    [name, color] => User::new(name, color),
                    [name, color, email] => User::new(name, color).with_email(email),
                    _ => return Err(ProtocolError::MalformedHandshake),
                };
                Ok(Self::Hello(user))
            }
            MessageKind::Text => Ok(Self::Text(text)),
            MessageKind::ChangeUser => {
                let fields: Vec<&str> = text.split('\n').collect();
                let [name, color] = fields[..] else {
                    return Err(ProtocolError::MalformedProfile);
                };
                Ok(Self::ChangeUser(ProfileChange {
                    name: Some(name.to_owned()),
                    color: Some(color.to_owned()),
                }))
            }
            MessageKind::SetName | MessageKind::SetColor if text.contains('\n') => {
                Err(ProtocolError::MalformedProfile)
            }
            MessageKind::SetName => Ok(Self::ChangeUser(ProfileChange {
                name: Some(text),
                color: None,
            })),
            MessageKind::SetColor => Ok(Self::ChangeUser(ProfileChange {
                name: None,
                color: Some(text),
            })),
            MessageKind::EmptyCanvas => Ok(Self::EmptyCanvas(text)),
            MessageKind::Auth => Ok(Self::Auth(text)),
            MessageKind::PresentUsers
            | MessageKind::AuthAck
            | MessageKind::AuthRst
            | MessageKind::MayNotEnter => Err(ProtocolError::UnexpectedKind(kind)),
        }
    }
}
