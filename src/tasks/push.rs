//! WebSocket push channel.
//!
//! The server never sends deltas: a change notification only means "what you
//! have is stale", so the answer to every notification is a new
//! `request_sync`.

use std::time::Duration;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::Error;
use crate::events::{PushStatus, SyncSource};
use crate::model::Snapshot;
use crate::tasks::sync::SnapshotSink;

/// Frames exchanged on the push channel, tagged by `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    RequestSync,
    FullSync(Snapshot),
    PhotosChanged,
    SettingsChanged,
}

/// Doubling reconnect delay with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }
}

/// Liveness limits for a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub connect_timeout: Duration,
    /// Ping period; two periods without any frame end the session.
    pub interval: Duration,
}

impl Keepalive {
    fn idle_limit(&self) -> Duration {
        self.interval.saturating_mul(2)
    }
}

enum SessionEnd {
    /// The server closed the connection; reconnect.
    Closed,
    /// Nothing arrived within the idle limit; reconnect.
    Silent(Duration),
    /// Nobody is listening for snapshots any more.
    SinkGone,
}

/// Keep a push connection open for the lifetime of `cancel`, reconnecting
/// with `backoff` whenever it drops.
///
/// `status` starts as [`PushStatus::Connecting`], becomes `Connected` on each
/// successful handshake and `Disconnected` after each failure; it stays
/// `Disconnected` through reconnect attempts until one succeeds.
#[instrument(skip_all, fields(url = %url))]
pub async fn run(
    url: Url,
    mut backoff: Backoff,
    keepalive: Keepalive,
    sink: SnapshotSink,
    status: watch::Sender<PushStatus>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = session(&url, keepalive, &sink, &status, &mut backoff) => outcome,
        };

        let error = match outcome {
            Ok(SessionEnd::SinkGone) => {
                debug!("snapshot receiver closed; stopping push channel");
                break;
            }
            Ok(SessionEnd::Closed) => {
                info!("push channel closed by server");
                "closed by server".to_string()
            }
            Ok(SessionEnd::Silent(idle)) => {
                let idle = humantime::format_duration(idle).to_string();
                warn!(%idle, "push channel went silent");
                format!("no traffic for {idle}")
            }
            Err(err) => {
                warn!(error = %err, "push channel error");
                err.to_string()
            }
        };
        status.send_replace(PushStatus::Disconnected { error });

        let delay = backoff.next_delay();
        debug!(
            delay = %humantime::format_duration(delay),
            "push channel reconnect scheduled"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }
    Ok(())
}

async fn session(
    url: &Url,
    keepalive: Keepalive,
    sink: &SnapshotSink,
    status: &watch::Sender<PushStatus>,
    backoff: &mut Backoff,
) -> Result<SessionEnd, Error> {
    let (stream, _response) = timeout(keepalive.connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| Error::ConnectTimeout {
            url: url.to_string(),
            after: keepalive.connect_timeout,
        })??;
    backoff.reset();
    status.send_replace(PushStatus::Connected);
    info!("push channel connected");

    let (mut write, mut read) = stream.split();
    write.send(encode(&PushMessage::RequestSync)?).await?;

    let mut ping = interval(keepalive.interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        let frame = tokio::select! {
            frame = read.next() => frame,
            _ = ping.tick() => {
                let idle = last_seen.elapsed();
                if idle >= keepalive.idle_limit() {
                    return Ok(SessionEnd::Silent(idle));
                }
                write.send(Message::Ping(Default::default())).await?;
                continue;
            }
        };
        let Some(frame) = frame else {
            return Ok(SessionEnd::Closed);
        };
        last_seen = Instant::now();

        match frame? {
            Message::Text(text) => match serde_json::from_str::<PushMessage>(&text) {
                Ok(PushMessage::FullSync(snapshot)) => {
                    debug!(photos = snapshot.photos.len(), "full sync received");
                    if sink.deliver(SyncSource::Push, snapshot).await.is_err() {
                        return Ok(SessionEnd::SinkGone);
                    }
                }
                Ok(PushMessage::PhotosChanged) | Ok(PushMessage::SettingsChanged) => {
                    debug!("server state changed; requesting sync");
                    write.send(encode(&PushMessage::RequestSync)?).await?;
                }
                Ok(PushMessage::RequestSync) => {
                    debug!("ignoring request_sync from server");
                }
                Err(err) => warn!(error = %err, "unreadable push frame"),
            },
            Message::Close(frame) => {
                debug!(?frame, "close frame");
                return Ok(SessionEnd::Closed);
            }
            _ => {}
        }
    }
}

fn encode(msg: &PushMessage) -> Result<Message, Error> {
    Ok(Message::text(serde_json::to_string(msg)?))
}
