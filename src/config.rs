use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, anyhow};

use crate::rooms::RoomOptions;

/// Longest accepted connection timeout, one day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Server settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    /// Read/write timeout of a connection.
    pub timeout: Duration,
    pub mailbox_capacity: usize,
    pub verify_identity: bool,
    /// `Origin` values allowed to connect. Empty admits every origin.
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 1243)),
            timeout: Duration::from_secs(60),
            mailbox_capacity: 256,
            verify_identity: true,
            allowed_origins: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let timeout_secs: u64 = parse(&lookup, "DRAWROOM_TIMEOUT_SECS")?
            .unwrap_or(defaults.timeout.as_secs());
        if !(1..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
            return Err(anyhow!(
                "DRAWROOM_TIMEOUT_SECS must be between 1 and {MAX_TIMEOUT_SECS}"
            ));
        }

        let mailbox_capacity = parse(&lookup, "DRAWROOM_MAILBOX_CAPACITY")?
            .unwrap_or(defaults.mailbox_capacity);
        if mailbox_capacity == 0 {
            return Err(anyhow!("DRAWROOM_MAILBOX_CAPACITY must be at least 1"));
        }

        let allowed_origins = lookup("DRAWROOM_ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            addr: parse(&lookup, "DRAWROOM_ADDR")?.unwrap_or(defaults.addr),
            timeout: Duration::from_secs(timeout_secs),
            mailbox_capacity,
            verify_identity: parse(&lookup, "DRAWROOM_VERIFY_IDENTITY")?
                .unwrap_or(defaults.verify_identity),
            allowed_origins,
        })
    }

    /// Keep-alive period, kept under the timeout so idle peers stay connected.
    pub fn ping_period(&self) -> Duration {
        self.timeout * 9 / 10
    }

    pub fn room_options(&self) -> RoomOptions {
        RoomOptions {
            mailbox_capacity: self.mailbox_capacity,
            verify_identity: self.verify_identity,
        }
    }

    pub fn allows_origin(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }

        origin.is_some_and(|origin| self.allowed_origins.iter().any(|allowed| allowed == origin))
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid {key}: {value:?}"))
        })
        .transpose()
}
