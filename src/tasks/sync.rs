//! Sync Channel: keeps the presentation loop supplied with snapshots.
//!
//! Push is the primary transport. Polling takes over for the rest of the
//! session when push has not delivered within the startup grace period, or
//! when it fails to connect before anything was loaded.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::FrameApi;
use crate::config::SyncOptions;
use crate::events::{PushStatus, SyncSource, SyncUpdate};
use crate::model::Snapshot;
use crate::tasks::{poll, push};

/// The snapshot receiver has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Shared delivery path for both transports. Also raises the "first snapshot
/// loaded" signal the coordinator waits on.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    updates: mpsc::Sender<SyncUpdate>,
    loaded: Arc<watch::Sender<bool>>,
}

impl SnapshotSink {
    pub fn new(updates: mpsc::Sender<SyncUpdate>) -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            updates,
            loaded: Arc::new(loaded),
        }
    }

    pub async fn deliver(&self, source: SyncSource, snapshot: Snapshot) -> Result<(), SinkClosed> {
        self.updates
            .send(SyncUpdate { source, snapshot })
            .await
            .map_err(|_| SinkClosed)?;
        self.loaded.send_if_modified(|loaded| !std::mem::replace(loaded, true));
        Ok(())
    }

    pub fn loaded(&self) -> watch::Receiver<bool> {
        self.loaded.subscribe()
    }

    pub fn has_loaded(&self) -> bool {
        *self.loaded.borrow()
    }
}

/// Why the coordinator gave up on push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    GraceExpired(Duration),
    ConnectFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StartupOutcome {
    PushDelivered,
    Fallback(FallbackReason),
    Cancelled,
}

/// Run the Sync Channel until `cancel` fires.
///
/// `push_url` is `None` when push is not configured; polling then starts
/// right away.
#[instrument(skip_all)]
pub async fn run<A: FrameApi + ?Sized>(
    api: Arc<A>,
    options: SyncOptions,
    push_url: Option<Url>,
    updates: mpsc::Sender<SyncUpdate>,
    cancel: CancellationToken,
) -> Result<()> {
    let sink = SnapshotSink::new(updates);

    let Some(url) = push_url.filter(|_| options.push_enabled) else {
        info!("push channel disabled");
        return poll::run(api, options.poll_interval, sink, cancel).await;
    };

    let push_cancel = cancel.child_token();
    let (status_tx, status_rx) = watch::channel(PushStatus::Connecting);
    let backoff = push::Backoff::new(options.reconnect_initial, options.reconnect_max);
    let keepalive = push::Keepalive {
        connect_timeout: options.connect_timeout,
        interval: options.keepalive_interval,
    };
    let push_task = tokio::spawn(push::run(
        url,
        backoff,
        keepalive,
        sink.clone(),
        status_tx,
        push_cancel.clone(),
    ));

    let outcome = await_startup(options.startup_grace, sink.loaded(), status_rx, &cancel).await;
    match outcome {
        StartupOutcome::PushDelivered => {
            info!("push channel delivered first snapshot");
            push_task.await.context("push task panicked")?
        }
        StartupOutcome::Fallback(reason) => {
            warn!(?reason, "falling back to polling");
            push_cancel.cancel();
            if let Err(err) = push_task.await.context("push task panicked")? {
                debug!(error = %err, "push task ended with error");
            }
            poll::run(api, options.poll_interval, sink, cancel).await
        }
        StartupOutcome::Cancelled => {
            push_task.await.context("push task panicked")?
        }
    }
}

async fn await_startup(
    grace: Duration,
    mut loaded: watch::Receiver<bool>,
    mut status: watch::Receiver<PushStatus>,
    cancel: &CancellationToken,
) -> StartupOutcome {
    let deadline = sleep(grace);
    tokio::pin!(deadline);

    loop {
        if *loaded.borrow_and_update() {
            return StartupOutcome::PushDelivered;
        }
        let current = status.borrow_and_update().clone();
        if let PushStatus::Disconnected { error } = current {
            return StartupOutcome::Fallback(FallbackReason::ConnectFailed(error));
        }

        tokio::select! {
            _ = cancel.cancelled() => return StartupOutcome::Cancelled,
            _ = &mut deadline => {
                if *loaded.borrow() {
                    return StartupOutcome::PushDelivered;
                }
                return StartupOutcome::Fallback(FallbackReason::GraceExpired(grace));
            }
            changed = loaded.changed() => {
                if changed.is_err() {
                    return StartupOutcome::Cancelled;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    // Push task is gone without reporting; treat like a failed connect.
                    return StartupOutcome::Fallback(FallbackReason::ConnectFailed(
                        "push task stopped".to_string(),
                    ));
                }
            }
        }
    }
}
