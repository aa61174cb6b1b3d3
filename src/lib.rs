pub mod appresult;
pub mod config;
pub mod error;
pub mod rooms;

use std::sync::Arc;

use axum::{extract::FromRef, Router};
use tower_http::trace::TraceLayer;

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use error::{ProtocolError, RoomError};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub room: Arc<rooms::Room>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            room: Arc::new(rooms::Room::new(config.room_options())),
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(rooms::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
