//! Slideshow Driver: the loop that owns the session state and paces the show.
//!
//! All mutation happens on this task. Snapshots, control commands, timers and
//! finished loads are all events on one `select!`, so a snapshot can never
//! land halfway through a cycle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::FrameApi;
use crate::config::SlideshowTiming;
use crate::error::Error;
use crate::events::{ControlCommand, SyncUpdate};
use crate::model::{Photo, Settings, Snapshot, Transition};
use crate::schedule::{self, Clock};
use crate::slideshow::{CycleStart, Displayed, Phase, Slideshow};
use crate::surface::{PLACEHOLDER_MESSAGE, Surface};
use crate::tasks::loader::{self, LoadedPhoto};

/// Client-side state. Only the presentation loop writes to it.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Active photos from the last snapshot, in server order.
    pub photos: Vec<Photo>,
    /// `None` until the first snapshot arrives.
    pub settings: Option<Settings>,
    pub sleeping: bool,
    pub slideshow: Slideshow,
}

impl Session {
    /// Replace photos and settings wholesale. Applying the same snapshot twice
    /// leaves the session as it was after the first.
    pub fn apply(&mut self, snapshot: Snapshot) {
        self.photos = snapshot.active_photos();
        self.settings = Some(snapshot.settings);
        self.slideshow.on_photos_replaced(&self.photos);
    }

    pub fn rotation_interval(&self) -> Duration {
        self.settings
            .as_ref()
            .map_or_else(|| Settings::default().rotation_interval(), Settings::rotation_interval)
    }

    pub fn transition(&self) -> Transition {
        self.settings
            .as_ref()
            .map(|settings| settings.transition)
            .unwrap_or_default()
    }
}

/// Read-only view of the loop, published after every event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub photo_count: usize,
    pub cursor: Option<usize>,
    pub displayed: Option<String>,
    pub sleeping: bool,
    /// A cycle timer is armed.
    pub cycle_pending: bool,
    pub loading: bool,
}

struct Exit {
    due: Instant,
    shown: Displayed,
}

type LoadResult = (u64, Result<LoadedPhoto, Error>);

pub struct PresentationLoop {
    api: Arc<dyn FrameApi>,
    surface: Box<dyn Surface>,
    clock: Box<dyn Clock>,
    timing: SlideshowTiming,
    sleep_check: Duration,
    session: Session,
    /// The one pending cycle timer.
    next_cycle: Option<Instant>,
    loading: JoinSet<LoadResult>,
    exits: VecDeque<Exit>,
    status: watch::Sender<SessionStatus>,
}

impl PresentationLoop {
    pub fn new(
        api: Arc<dyn FrameApi>,
        surface: Box<dyn Surface>,
        clock: Box<dyn Clock>,
        timing: SlideshowTiming,
        sleep_check: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            api,
            surface,
            clock,
            timing,
            sleep_check,
            session: Session::default(),
            next_cycle: None,
            loading: JoinSet::new(),
            exits: VecDeque::new(),
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Drive the slideshow until `cancel` fires or both inputs are closed.
    pub async fn run(
        mut self,
        mut updates: mpsc::Receiver<SyncUpdate>,
        mut control: mpsc::Receiver<ControlCommand>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut sleep_ticker = interval(self.sleep_check);
        sleep_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut updates_open = true;
        let mut control_open = true;

        self.start_cycle();
        self.publish();

        loop {
            let cycle_due = self.next_cycle;
            let exit_due = self.exits.front().map(|exit| exit.due);

            tokio::select! {
                _ = cancel.cancelled() => break,

                update = updates.recv(), if updates_open => match update {
                    Some(update) => self.on_update(update),
                    None => {
                        debug!("sync channel closed");
                        updates_open = false;
                    }
                },

                command = control.recv(), if control_open => match command {
                    Some(command) => self.on_command(command),
                    None => control_open = false,
                },

                _ = sleep_ticker.tick() => self.check_sleep(),

                _ = sleep_until(cycle_due.unwrap_or_else(Instant::now)), if cycle_due.is_some() => {
                    self.next_cycle = None;
                    self.start_cycle();
                }

                Some(joined) = self.loading.join_next() => match joined {
                    Ok((generation, result)) => self.on_loaded(generation, result),
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        warn!(error = %err, "image load task failed");
                        self.on_load_failure(self.session.slideshow.generation());
                    }
                },

                _ = sleep_until(exit_due.unwrap_or_else(Instant::now)), if exit_due.is_some() => {
                    self.finish_exits();
                }
            }

            if !updates_open && !control_open {
                info!("all inputs closed; stopping slideshow");
                break;
            }
            self.publish();
        }

        self.loading.shutdown().await;
        Ok(())
    }

    fn on_update(&mut self, update: SyncUpdate) {
        let was_empty = matches!(self.session.slideshow.phase(), Phase::Empty);
        let shuffle = update.snapshot.settings.shuffle;
        self.session.apply(update.snapshot);
        info!(
            source = ?update.source,
            photos = self.session.photos.len(),
            "snapshot applied"
        );
        if shuffle {
            debug!("shuffle requested; showing photos in server order");
        }
        self.check_sleep();

        if was_empty && !self.session.photos.is_empty() {
            self.start_cycle();
        }
    }

    fn on_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Advance => {
                if self.session.sleeping {
                    debug!("advance ignored while sleeping");
                    return;
                }
                info!("manual advance");
                self.start_cycle();
            }
        }
    }

    /// Begin a cycle now. Any armed timer and any in-flight load are dropped.
    fn start_cycle(&mut self) {
        self.next_cycle = None;
        self.loading.abort_all();

        match self.session.slideshow.begin_cycle(&self.session.photos) {
            CycleStart::Empty => {
                self.exits.clear();
                render(self.surface.show_placeholder(PLACEHOLDER_MESSAGE));
                self.schedule(self.timing.empty_retry);
            }
            CycleStart::Load {
                generation,
                index,
                photo,
            } => {
                debug!(generation, index, filename = %photo.filename, "loading photo");
                let api = Arc::clone(&self.api);
                self.loading
                    .spawn(async move { (generation, loader::load(api, photo).await) });
            }
        }
    }

    fn on_loaded(&mut self, generation: u64, result: Result<LoadedPhoto, Error>) {
        let frame = match result {
            Ok(frame) => frame,
            Err(err) => {
                warn!(generation, error = %err, "failed to load photo");
                self.on_load_failure(generation);
                return;
            }
        };

        let Some(presented) = self.session.slideshow.complete(generation) else {
            debug!(generation, "dropping stale load");
            return;
        };
        render(
            self.surface
                .present(generation, &frame, self.session.transition()),
        );
        if let Some(previous) = presented.previous {
            render(self.surface.retire(&previous));
            self.exits.push_back(Exit {
                due: deadline(self.timing.exit_duration),
                shown: previous,
            });
        }
        self.schedule(self.session.rotation_interval());
    }

    fn on_load_failure(&mut self, generation: u64) {
        if self.session.slideshow.fail(generation) {
            self.schedule(self.timing.skip_delay);
        }
    }

    fn finish_exits(&mut self) {
        let now = Instant::now();
        while let Some(exit) = self.exits.front() {
            if exit.due > now {
                break;
            }
            if let Some(exit) = self.exits.pop_front() {
                render(self.surface.remove(&exit.shown));
            }
        }
    }

    fn schedule(&mut self, after: Duration) {
        self.next_cycle = Some(deadline(after));
    }

    fn check_sleep(&mut self) {
        let now = self.clock.local_time();
        let sleeping = schedule::is_sleeping(self.session.settings.as_ref(), now);
        if sleeping == self.session.sleeping {
            return;
        }
        self.session.sleeping = sleeping;
        info!(sleeping, time = %now.format("%H:%M"), "sleep state changed");
        render(self.surface.set_sleeping(sleeping));
    }

    fn publish(&self) {
        let status = SessionStatus {
            photo_count: self.session.photos.len(),
            cursor: self.session.slideshow.cursor(),
            displayed: self
                .session
                .slideshow
                .displayed()
                .map(|shown| shown.photo.filename.clone()),
            sleeping: self.session.sleeping,
            cycle_pending: self.next_cycle.is_some(),
            loading: matches!(self.session.slideshow.phase(), Phase::Loading { .. }),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// `after` from now, or the default rotation when that overflows the clock.
fn deadline(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or_else(|| {
        warn!(
            after = %humantime::format_duration(after),
            "delay out of range; using the default rotation"
        );
        now + Settings::default().rotation_interval()
    })
}

/// Rendering problems are logged and never stop the show.
fn render(result: Result<()>) {
    if let Err(err) = result {
        warn!(error = %err, "surface error");
    }
}
