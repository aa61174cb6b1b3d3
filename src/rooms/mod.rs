mod client;
mod limit;
mod mailbox;
mod msg;
mod room;
mod user;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use client::{Client, OnMessage};
pub use limit::{EVENT_BURST, EVENTS_PER_SECOND, MessageLimiter};
pub use mailbox::{Delivery, Mailbox};
pub use msg::{Frame, MAX_TEXT_LEN, Message, MessageKind, ProfileChange, Request, truncate_text};
pub use room::{ClientId, Room, RoomOptions};
pub use user::User;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connect", get(ws::connect))
}
