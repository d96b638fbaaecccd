use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use kiosk_frame::api::{Endpoints, FrameApi, HttpApi};
use kiosk_frame::config::Configuration;
use kiosk_frame::events::{ControlCommand, SyncUpdate};
use kiosk_frame::schedule::{self, Clock, FixedClock, SleepWindow, SystemClock};
use kiosk_frame::surface;
use kiosk_frame::tasks::{control, presenter::PresentationLoop, sync};

#[derive(Debug, Parser)]
#[command(
    name = "kiosk-frame",
    version,
    about = "Slideshow display for a photo frame backend"
)]
struct Args {
    /// Path to YAML config
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
    /// Fetch the current state once, print what would be shown and exit
    #[arg(long = "dry-run")]
    dry_run: bool,
    /// Evaluate the sleep window at this local time (HH:MM) instead of the clock
    #[arg(long = "at", value_name = "HH:MM")]
    at: Option<String>,
}

fn init_tracing(verbosity: u8) {
    // RUST_LOG wins; otherwise -v picks the level
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        verbose,
        dry_run,
        at,
    } = Args::parse();
    init_tracing(verbose);

    let fixed_time = match at {
        Some(raw) => Some(
            NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                .with_context(|| format!("failed to parse --at {raw:?}"))?,
        ),
        None => None,
    };

    let cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::info!(
        "Loaded configuration from {}:\n{:#?}",
        config.display(),
        cfg
    );

    let endpoints = Endpoints::new(cfg.server_base()?);
    let http = HttpApi::new(endpoints.clone(), cfg.request_timeout)
        .context("failed to build HTTP client")?;
    let clock: Box<dyn Clock> = match fixed_time {
        Some(time) => Box::new(FixedClock::new(time)),
        None => Box::new(SystemClock::new(cfg.timezone)),
    };

    if dry_run {
        return run_dry_run(&http, clock.as_ref()).await;
    }

    let push_url = if cfg.sync.push_enabled {
        Some(
            endpoints
                .push_channel(&cfg.sync.push_path)
                .context("failed to derive push channel URL")?,
        )
    } else {
        None
    };
    let api: Arc<dyn FrameApi> = Arc::new(http);

    // Channels (small/bounded)
    let (updates_tx, updates_rx) = mpsc::channel::<SyncUpdate>(8); // Sync -> Presenter
    let (control_tx, control_rx) = mpsc::channel::<ControlCommand>(16); // External -> Presenter

    let cancel = CancellationToken::new();

    // Ctrl-D/Ctrl-C stop the frame
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut sink = Vec::new();
            match io::stdin().read_to_end(&mut sink) {
                Ok(_) => tracing::info!("stdin closed; initiating shutdown"),
                Err(err) => tracing::warn!("stdin watcher failed: {err}"),
            }
            cancel.cancel();
        });
    } else {
        tracing::debug!("stdin is not a terminal; skipping shutdown watcher");
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let control = control_tx.clone();
        tokio::spawn(async move {
            match signal(SignalKind::user_defined1()) {
                Ok(mut sigusr1) => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = sigusr1.recv() => {
                            if received.is_none() {
                                break;
                            }
                            tracing::info!("SIGUSR1 received; advancing slideshow");
                            if let Err(err) = control.send(ControlCommand::Advance).await {
                                tracing::warn!("failed to forward advance request: {err}");
                                break;
                            }
                        }
                    }
                },
                Err(err) => tracing::warn!("failed to register SIGUSR1 handler: {err}"),
            }
        });
    }

    let mut tasks = JoinSet::new();

    // Sync Channel
    tasks.spawn({
        let api = Arc::clone(&api);
        let options = cfg.sync.clone();
        let cancel = cancel.clone();
        async move {
            let result = sync::run(api, options, push_url, updates_tx, cancel.clone())
                .await
                .context("sync task failed");
            if result.is_err() {
                cancel.cancel();
            }
            result
        }
    });

    // Control socket
    tasks.spawn({
        let path = cfg.control_socket_path.clone();
        let cancel = cancel.clone();
        async move {
            let result = control::run(path, control_tx, cancel.clone())
                .await
                .context("control task failed");
            if result.is_err() {
                cancel.cancel();
            }
            result
        }
    });

    // Presentation loop runs on the main task until cancelled
    let presenter = PresentationLoop::new(
        api,
        surface::from_config(&cfg.surface),
        clock,
        cfg.slideshow,
        cfg.sleep_check_interval,
    );
    if let Err(e) = presenter
        .run(updates_rx, control_rx, cancel.clone())
        .await
        .context("presentation loop failed")
    {
        tracing::error!("{e:?}");
    }
    // Ensure other tasks are asked to stop
    cancel.cancel();

    // Drain JoinSet (wait for other tasks to complete)
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}

async fn run_dry_run(http: &HttpApi, clock: &dyn Clock) -> Result<()> {
    let snapshot = http
        .fetch_snapshot()
        .await
        .context("failed to fetch photos and settings")?;
    let active = snapshot.active_photos();
    let now = clock.local_time();
    let endpoints = http.endpoints();

    println!(
        "# dry run\n# server: {}\n# photos: {} ({} active)\n# rotation: {}\n# transition: {}\n",
        endpoints.base(),
        snapshot.photos.len(),
        active.len(),
        humantime::format_duration(snapshot.settings.rotation_interval()),
        snapshot.settings.transition
    );

    if active.is_empty() {
        println!("(no active photos; the frame would show the placeholder)");
    } else {
        println!("# slideshow order:");
        for (idx, photo) in active.iter().enumerate() {
            println!("  {:>4}: {}", idx + 1, photo.filename);
            println!("        original:  {}", endpoints.upload(photo)?);
            println!("        thumbnail: {}", endpoints.thumbnail(photo)?);
        }
    }

    let window = SleepWindow::from_settings(&snapshot.settings)
        .map_or_else(|| "disabled".to_string(), |w| w.to_string());
    let sleeping = schedule::is_sleeping(Some(&snapshot.settings), now);
    println!(
        "\n# sleep window: {window}\n# at {}: {}",
        now.format("%H:%M"),
        if sleeping { "sleeping" } else { "awake" }
    );
    if snapshot.settings.shuffle {
        println!("# note: shuffle is set but photos are shown in server order");
    }
    Ok(())
}
