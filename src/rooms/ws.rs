use std::{future::Future, sync::Arc, time::Duration};

use anyhow::anyhow;
use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::{HeaderMap, header::ORIGIN},
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use parking_lot::Mutex;
use tokio::time::{Instant, interval_at, timeout};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{AppError, AppResult, config::Config};

use super::{Client, Message, MessageKind, MessageLimiter, ProfileChange, Request, Room, User};

/// The client admitted on a connection, shared with its keep-alive task.
type Session = Arc<Mutex<Option<Arc<Client>>>>;

#[debug_handler(state = crate::AppState)]
pub async fn connect(
    State(room): State<Arc<Room>>,
    State(config): State<Arc<Config>>,
    headers: HeaderMap,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let origin = headers.get(ORIGIN).and_then(|origin| origin.to_str().ok());
    if !config.allows_origin(origin) {
        warn!(?origin, "refused websocket origin");
        return Err(AppError::forbidden(anyhow!("origin not allowed")));
    }

    let span = info_span!("connection", id = %Uuid::now_v7());
    Ok(ws.on_upgrade(move |socket| serve(socket, room, config).instrument(span)))
}

/// Write half of a socket. Every frame goes through the same lock so
/// deliveries and keep-alive pings never interleave.
#[derive(Clone)]
struct Outbox {
    sink: Arc<tokio::sync::Mutex<SplitSink<WebSocket, WsMessage>>>,
    timeout: Duration,
}

impl Outbox {
    fn new(sink: SplitSink<WebSocket, WsMessage>, timeout: Duration) -> Self {
        Self {
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            timeout,
        }
    }

    async fn send(&self, frame: WsMessage) -> anyhow::Result<()> {
        let mut sink = self.sink.lock().await;
        timeout(self.timeout, sink.send(frame)).await??;
        Ok(())
    }

    async fn send_message(&self, message: &Message) -> anyhow::Result<()> {
        let json = serde_json::to_string(message)?;
        self.send(WsMessage::Text(json.into())).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.send(WsMessage::Ping(Default::default())).await
    }
}

async fn serve(socket: WebSocket, room: Arc<Room>, config: Arc<Config>) {
    let (sink, mut stream) = socket.split();
    let outbox = Outbox::new(sink, config.timeout);
    let session = Session::default();

    let pinger = outbox.clone();
    let ping = move || {
        let outbox = pinger.clone();
        async move { outbox.ping().await }
    };
    let keep_alive =
        tokio::spawn(keep_alive(ping, session.clone(), config.ping_period()).in_current_span());

    let connection = Connection {
        room,
        outbox,
        session,
        limiter: MessageLimiter::default(),
    };

    loop {
        let frame = match timeout(config.timeout, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(error))) => {
                debug!(%error, "websocket read failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!("websocket read timed out");
                break;
            }
        };

        match frame {
            WsMessage::Text(_) | WsMessage::Binary(_) => connection.handle(&frame.into_data()).await,
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
        }
    }

    keep_alive.abort();
    connection.leave();
}

/// Pings the peer every `period`. A failed ping counts as a dead connection.
async fn keep_alive<P, F>(mut ping: P, session: Session, period: Duration)
where
    P: FnMut() -> F,
    F: Future<Output = anyhow::Result<()>>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;

        if let Err(error) = ping().await {
            debug!(%error, "keep-alive ping failed");
            let client = session.lock().clone();
            if let Some(client) = client {
                let _ = client.leave();
            }
            return;
        }
    }
}

struct Connection {
    room: Arc<Room>,
    outbox: Outbox,
    session: Session,
    limiter: MessageLimiter,
}

impl Connection {
    fn client(&self) -> Option<Arc<Client>> {
        self.session.lock().clone()
    }

    async fn handle(&self, data: &[u8]) {
        let request = match Request::decode(data) {
            Ok(request) => request,
            Err(error) => {
                warn!(%error, "dropping client frame");
                return;
            }
        };

        match request {
            Request::Hello(user) => self.hello(user).await,
            Request::Text(text) => self.relay(MessageKind::Text, text),
            Request::EmptyCanvas(text) => self.relay(MessageKind::EmptyCanvas, text),
            Request::ChangeUser(change) => self.change_profile(&change),
            Request::Auth(_) => debug!("login codes are not supported, ignoring auth"),
        }
    }

    async fn hello(&self, user: User) {
        if self.client().is_some() {
            debug!("already entered, ignoring hello");
            return;
        }

        let client = match self.room.try_enter(user.clone()) {
            Ok(client) => client,
            Err(error) => {
                info!(%error, "refused entry");
                let refusal = Message::new(MessageKind::MayNotEnter, user.clone(), user.name);
                if let Err(error) = self.outbox.send_message(&refusal).await {
                    debug!(%error, "failed to send refusal");
                }
                return;
            }
        };

        let outbox = self.outbox.clone();
        client.on_message(move |message| {
            let outbox = outbox.clone();
            async move {
                if let Err(error) = outbox.send_message(&message).await {
                    debug!(%error, kind = ?message.kind, "failed to deliver message");
                }
            }
        });
        *self.session.lock() = Some(client.clone());

        let result = client
            .send(MessageKind::Hello, format!("{}\n{}", user.name, user.color))
            .and_then(|()| client.broadcast_user_list());
        if let Err(error) = result {
            debug!(%error, "client left during handshake");
        }

        info!(name = %user.name, color = %user.color, "hello");
    }

    fn admit_event(&self, kind: MessageKind) -> Option<Arc<Client>> {
        let client = self.client()?;
        if !self.limiter.allow() {
            debug!(?kind, "rate limited, dropping");
            return None;
        }
        Some(client)
    }

    fn relay(&self, kind: MessageKind, text: String) {
        let Some(client) = self.admit_event(kind) else {
            return;
        };

        debug!(?kind, len = text.len(), "relaying");
        if let Err(error) = client.send(kind, text) {
            debug!(%error, ?kind, "dropping message");
        }
    }

    fn change_profile(&self, change: &ProfileChange) {
        let Some(client) = self.admit_event(MessageKind::ChangeUser) else {
            return;
        };

        if let Err(error) = client.change_profile(change) {
            debug!(%error, "profile change refused");
        }
    }

    fn leave(&self) {
        if let Some(client) = self.client() {
            let _ = client.leave();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::rooms::RoomOptions;

    #[tokio::test]
    async fn failed_ping_leaves_the_room() {
        let room = Arc::new(Room::new(RoomOptions::default()));
        let alice = room.enter(User::new("Alice", "#f00"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        alice.on_message(move |message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
            }
        });

        let bob = room.enter(User::new("Bob", "#0f0"));
        let session = Session::default();
        *session.lock() = Some(bob.clone());

        let pings = Arc::new(AtomicUsize::new(0));
        let ping = {
            let pings = pings.clone();
            move || {
                let sent = pings.fetch_add(1, Ordering::SeqCst);
                async move {
                    if sent < 2 {
                        Ok(())
                    } else {
                        Err(anyhow!("peer gone"))
                    }
                }
            }
        };

        tokio::time::timeout(
            Duration::from_secs(1),
            keep_alive(ping, session, Duration::from_millis(10)),
        )
        .await
        .expect("keep-alive kept running after a failed ping");

        assert_eq!(pings.load(Ordering::SeqCst), 3);
        assert!(!bob.is_active());
        assert_eq!(room.present_users(), vec![User::new("Alice", "#f00")]);

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.kind, MessageKind::PresentUsers);
        assert_eq!(message.user.name, "Bob");
        let users: Vec<User> = serde_json::from_str(&message.text).unwrap();
        assert_eq!(users, vec![User::new("Alice", "#f00")]);
    }
}
