mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use common::{FakeApi, RecordingSurface, SurfaceEvent, rotating, snapshot};
use kiosk_frame::config::SlideshowTiming;
use kiosk_frame::events::{ControlCommand, SyncSource, SyncUpdate};
use kiosk_frame::model::{Settings, Snapshot, Transition};
use kiosk_frame::schedule::FixedClock;
use kiosk_frame::surface::PLACEHOLDER_MESSAGE;
use kiosk_frame::tasks::presenter::{PresentationLoop, SessionStatus};

const PATIENCE: Duration = Duration::from_secs(600);

struct Harness {
    updates: mpsc::Sender<SyncUpdate>,
    control: mpsc::Sender<ControlCommand>,
    events: mpsc::UnboundedReceiver<(Instant, SurfaceEvent)>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start(api: Arc<FakeApi>, clock: FixedClock) -> Self {
        let (surface, events) = RecordingSurface::new();
        let presenter = PresentationLoop::new(
            api,
            Box::new(surface),
            Box::new(clock),
            SlideshowTiming::default(),
            Duration::from_secs(60),
        );
        let status = presenter.subscribe();
        let (updates, updates_rx) = mpsc::channel(8);
        let (control, control_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(presenter.run(updates_rx, control_rx, cancel.clone()));
        Self {
            updates,
            control,
            events,
            status,
            cancel,
            task,
        }
    }

    async fn sync(&self, snapshot: Snapshot) {
        self.updates
            .send(SyncUpdate {
                source: SyncSource::Push,
                snapshot,
            })
            .await
            .unwrap();
    }

    async fn advance(&self) {
        self.control.send(ControlCommand::Advance).await.unwrap();
    }

    async fn next_event(&mut self) -> (Instant, SurfaceEvent) {
        timeout(PATIENCE, self.events.recv())
            .await
            .expect("timed out waiting for a surface event")
            .expect("surface dropped")
    }

    async fn next_matching(
        &mut self,
        pred: impl Fn(&SurfaceEvent) -> bool,
    ) -> (Instant, SurfaceEvent) {
        loop {
            let (at, event) = self.next_event().await;
            if pred(&event) {
                return (at, event);
            }
        }
    }

    /// Next photo put on screen: (time, filename, transition).
    async fn next_present(&mut self) -> (Instant, String, Transition) {
        match self
            .next_matching(|e| matches!(e, SurfaceEvent::Present { .. }))
            .await
        {
            (
                at,
                SurfaceEvent::Present {
                    filename,
                    transition,
                    ..
                },
            ) => (at, filename, transition),
            _ => unreachable!(),
        }
    }

    /// Asserts nothing is presented for `window`.
    async fn expect_no_present(&mut self, window: Duration) {
        let waited = timeout(window, async {
            loop {
                match self.events.recv().await {
                    Some((_, SurfaceEvent::Present { filename, .. })) => break filename,
                    Some(_) => continue,
                    None => std::future::pending::<()>().await,
                }
            }
        })
        .await;
        if let Ok(filename) = waited {
            panic!("unexpected present of {filename}");
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        timeout(PATIENCE, self.task)
            .await
            .expect("presenter did not stop")
            .unwrap()
            .unwrap();
    }
}

fn noon() -> FixedClock {
    FixedClock::new(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
}

fn assert_elapsed(from: Instant, to: Instant, expected: Duration) {
    let elapsed = to - from;
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(100),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

fn sleep_window(start: &str, end: &str) -> Settings {
    Settings {
        rotation_speed: Some(10.0),
        sleep_enabled: true,
        sleep_start: Some(start.to_string()),
        sleep_end: Some(end.to_string()),
        ..Settings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn placeholder_then_photos_cycle_in_order() {
    let mut h = Harness::start(Arc::new(FakeApi::empty()), noon());

    let (_, first) = h.next_event().await;
    assert_eq!(
        first,
        SurfaceEvent::Placeholder(PLACEHOLDER_MESSAGE.to_string())
    );

    let settings = Settings {
        transition: Transition::Slide,
        ..rotating(3.0)
    };
    h.sync(snapshot(&[("a.jpg", true), ("hidden.jpg", false), ("b.jpg", true)], settings))
        .await;

    let (t_a, name, transition) = h.next_present().await;
    assert_eq!(name, "a.jpg");
    assert_eq!(transition, Transition::Slide);

    let (t_b, name, _) = h.next_present().await;
    assert_eq!(name, "b.jpg");
    assert_elapsed(t_a, t_b, Duration::from_secs(3));

    let (t_again, name, _) = h.next_present().await;
    assert_eq!(name, "a.jpg");
    assert_elapsed(t_b, t_again, Duration::from_secs(3));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn empty_list_retries_placeholder() {
    let mut h = Harness::start(Arc::new(FakeApi::empty()), noon());
    let (t0, _) = h.next_event().await;
    h.sync(snapshot(&[("off.jpg", false)], Settings::default())).await;
    let (t1, event) = h.next_event().await;
    assert!(matches!(event, SurfaceEvent::Placeholder(_)));
    assert_elapsed(t0, t1, SlideshowTiming::default().empty_retry);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn outgoing_photo_removed_after_exit_transition() {
    let mut h = Harness::start(Arc::new(FakeApi::empty()), noon());
    h.sync(snapshot(&[("a.jpg", true), ("b.jpg", true)], rotating(5.0)))
        .await;

    let (_, a, _) = h.next_present().await;
    assert_eq!(a, "a.jpg");
    let (t_b, b, _) = h.next_present().await;
    assert_eq!(b, "b.jpg");

    let (t_retire, retire) = h
        .next_matching(|e| matches!(e, SurfaceEvent::Retire { .. }))
        .await;
    assert!(matches!(retire, SurfaceEvent::Retire { ref filename, .. } if filename == "a.jpg"));
    assert_eq!(t_retire, t_b);

    let (t_remove, remove) = h
        .next_matching(|e| matches!(e, SurfaceEvent::Remove { .. }))
        .await;
    assert!(matches!(remove, SurfaceEvent::Remove { ref filename, .. } if filename == "a.jpg"));
    assert_elapsed(t_b, t_remove, SlideshowTiming::default().exit_duration);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn broken_image_is_skipped_once() {
    let api = Arc::new(FakeApi::empty().with_broken("broken.jpg"));
    let mut h = Harness::start(Arc::clone(&api), noon());
    let (t0, _) = h.next_event().await;
    h.sync(snapshot(&[("broken.jpg", true), ("good.jpg", true)], rotating(10.0)))
        .await;

    let (t_good, name, _) = h.next_present().await;
    assert_eq!(name, "good.jpg");
    assert_elapsed(t0, t_good, SlideshowTiming::default().skip_delay);

    let (t_again, name, _) = h.next_present().await;
    assert_eq!(name, "good.jpg");
    assert_elapsed(
        t_good,
        t_again,
        Duration::from_secs(10) + SlideshowTiming::default().skip_delay,
    );
    assert_eq!(
        api.fetched(),
        vec!["broken.jpg", "good.jpg", "broken.jpg", "good.jpg"]
    );

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn manual_advance_replaces_pending_timer() {
    let mut h = Harness::start(Arc::new(FakeApi::empty()), noon());
    h.sync(snapshot(
        &[("a.jpg", true), ("b.jpg", true), ("c.jpg", true)],
        rotating(10.0),
    ))
    .await;
    let (t_a, name, _) = h.next_present().await;
    assert_eq!(name, "a.jpg");

    sleep(Duration::from_secs(2)).await;
    h.advance().await;
    let (t_b, name, _) = h.next_present().await;
    assert_eq!(name, "b.jpg");
    assert_elapsed(t_a, t_b, Duration::from_secs(2));

    // The timer armed for a.jpg is gone; only the one from b.jpg fires.
    let (t_c, name, _) = h.next_present().await;
    assert_eq!(name, "c.jpg");
    assert_elapsed(t_b, t_c, Duration::from_secs(10));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn advance_drops_in_flight_load() {
    let api = Arc::new(FakeApi::empty().with_slow("slow.jpg", Duration::from_secs(5)));
    let mut h = Harness::start(Arc::clone(&api), noon());
    let (t0, _) = h.next_event().await;
    h.sync(snapshot(&[("slow.jpg", true), ("b.jpg", true)], rotating(10.0)))
        .await;

    sleep(Duration::from_secs(1)).await;
    h.advance().await;

    let (t_b, name, _) = h.next_present().await;
    assert_eq!(name, "b.jpg");
    assert_elapsed(t0, t_b, Duration::from_secs(1));

    // slow.jpg only shows up on its own next turn, never from the dropped load.
    let (t_slow, name, _) = h.next_present().await;
    assert_eq!(name, "slow.jpg");
    assert_elapsed(t_b, t_slow, Duration::from_secs(15));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn advance_ignored_while_sleeping() {
    let clock = FixedClock::new(NaiveTime::from_hms_opt(23, 0, 0).unwrap());
    let mut h = Harness::start(Arc::new(FakeApi::empty()), clock);
    h.sync(snapshot(&[("a.jpg", true), ("b.jpg", true)], sleep_window("22:00", "06:00")))
        .await;

    let (_, event) = h
        .next_matching(|e| matches!(e, SurfaceEvent::Sleeping(_)))
        .await;
    assert_eq!(event, SurfaceEvent::Sleeping(true));
    let (t_a, name, _) = h.next_present().await;
    assert_eq!(name, "a.jpg");

    sleep(Duration::from_secs(1)).await;
    h.advance().await;
    h.expect_no_present(Duration::from_secs(5)).await;

    let (t_b, name, _) = h.next_present().await;
    assert_eq!(name, "b.jpg");
    assert_elapsed(t_a, t_b, Duration::from_secs(10));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn sleep_follows_the_clock_between_syncs() {
    let clock = FixedClock::new(NaiveTime::from_hms_opt(21, 59, 0).unwrap());
    let mut h = Harness::start(Arc::new(FakeApi::empty()), clock.clone());
    h.sync(snapshot(&[("a.jpg", true)], sleep_window("22:00", "06:00")))
        .await;
    h.next_present().await;
    assert!(!h.status.borrow().sleeping);

    clock.set(NaiveTime::from_hms_opt(22, 0, 0).unwrap());
    let (_, event) = h
        .next_matching(|e| matches!(e, SurfaceEvent::Sleeping(_)))
        .await;
    assert_eq!(event, SurfaceEvent::Sleeping(true));

    clock.set(NaiveTime::from_hms_opt(6, 0, 0).unwrap());
    let (_, event) = h
        .next_matching(|e| matches!(e, SurfaceEvent::Sleeping(_)))
        .await;
    assert_eq!(event, SurfaceEvent::Sleeping(false));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn replayed_snapshot_changes_nothing() {
    let mut h = Harness::start(Arc::new(FakeApi::empty()), noon());
    let snap = snapshot(&[("a.jpg", true), ("b.jpg", true)], rotating(30.0));
    h.sync(snap.clone()).await;
    h.next_present().await;
    let before = h.status.borrow().clone();
    assert_eq!(before.cursor, Some(0));
    assert_eq!(before.displayed.as_deref(), Some("a.jpg"));

    h.sync(snap.clone()).await;
    h.sync(snap).await;
    h.expect_no_present(Duration::from_secs(5)).await;
    let after = h.status.borrow().clone();
    assert_eq!(after.photo_count, 2);
    assert_eq!(after.cursor, before.cursor);
    assert_eq!(after.displayed, before.displayed);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn emptied_list_resets_to_first_photo() {
    let mut h = Harness::start(Arc::new(FakeApi::empty()), noon());
    h.sync(snapshot(&[("a.jpg", true), ("b.jpg", true)], rotating(3.0)))
        .await;
    h.next_present().await;
    h.next_present().await;

    h.sync(snapshot(&[], rotating(3.0))).await;
    let (_, event) = h
        .next_matching(|e| matches!(e, SurfaceEvent::Placeholder(_)))
        .await;
    assert_eq!(
        event,
        SurfaceEvent::Placeholder(PLACEHOLDER_MESSAGE.to_string())
    );
    assert_eq!(h.status.borrow().cursor, None);

    h.sync(snapshot(&[("a.jpg", true), ("b.jpg", true)], rotating(3.0)))
        .await;
    let (_, name, _) = h.next_present().await;
    assert_eq!(name, "a.jpg");

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stops_when_inputs_close() {
    let h = Harness::start(Arc::new(FakeApi::empty()), noon());
    let Harness {
        updates,
        control,
        task,
        ..
    } = h;
    drop(updates);
    drop(control);
    timeout(PATIENCE, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn huge_rotation_speed_keeps_running() {
    let mut h = Harness::start(Arc::new(FakeApi::empty()), noon());
    h.sync(snapshot(&[("a.jpg", true), ("b.jpg", true)], rotating(1e19)))
        .await;
    let (_, name, _) = h.next_present().await;
    assert_eq!(name, "a.jpg");

    h.expect_no_present(Duration::from_secs(3600)).await;
    assert!(!h.task.is_finished(), "presenter died on a huge rotation");

    h.advance().await;
    let (_, name, _) = h.next_present().await;
    assert_eq!(name, "b.jpg");

    h.sync(snapshot(&[("a.jpg", true), ("b.jpg", true)], rotating(1e20)))
        .await;
    h.advance().await;
    let (_, name, _) = h.next_present().await;
    assert_eq!(name, "a.jpg");

    h.stop().await;
}
