//! Pull fallback: fetch the full state over HTTP on a fixed period.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::FrameApi;
use crate::events::SyncSource;
use crate::tasks::sync::SnapshotSink;

/// Fetch immediately, then every `period`, until cancelled. Failed attempts
/// are logged; the next tick is the retry.
#[instrument(skip_all, fields(period = %humantime::format_duration(period)))]
pub async fn run<A: FrameApi + ?Sized>(
    api: Arc<A>,
    period: Duration,
    sink: SnapshotSink,
    cancel: CancellationToken,
) -> Result<()> {
    info!("polling for state");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = api.fetch_snapshot() => fetched,
        };
        match fetched {
            Ok(snapshot) => {
                debug!(photos = snapshot.photos.len(), "poll succeeded");
                if sink.deliver(SyncSource::Pull, snapshot).await.is_err() {
                    debug!("snapshot receiver closed; stopping poll");
                    break;
                }
            }
            Err(err) => warn!(error = %err, "sync failed"),
        }
    }
    Ok(())
}
