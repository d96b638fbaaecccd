use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use chrono_tz::Tz;
use reqwest::Url;
use serde::Deserialize;

const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
const DEFAULT_CONTROL_SOCKET_PATH: &str = "/tmp/kiosk-frame.sock";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Base URL of the frame backend (`http` or `https`).
    pub server_url: String,
    /// IANA zone used to evaluate the sleep window. Host zone when unset.
    pub timezone: Option<Tz>,
    /// Unix domain socket accepting runtime control commands.
    pub control_socket_path: PathBuf,
    /// How often the sleep window is re-evaluated between syncs.
    #[serde(with = "humantime_serde")]
    pub sleep_check_interval: Duration,
    /// Timeout applied to every HTTP request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Push/pull transport settings.
    pub sync: SyncOptions,
    /// Slideshow pacing for the non-photo paths.
    pub slideshow: SlideshowTiming,
    /// Where frames are rendered.
    pub surface: SurfaceConfig,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        let url = self.server_base()?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            "server-url must use http or https, got {}",
            url.scheme()
        );
        ensure!(
            !self.control_socket_path.as_os_str().is_empty(),
            "control-socket-path must not be empty"
        );
        ensure!(
            self.control_socket_path.file_name().is_some(),
            "control-socket-path must include a socket file name"
        );
        ensure!(
            !self.sleep_check_interval.is_zero(),
            "sleep-check-interval must be greater than zero"
        );
        ensure!(
            !self.request_timeout.is_zero(),
            "request-timeout must be greater than zero"
        );
        self.sync.validate().context("invalid sync configuration")?;
        self.slideshow
            .validate()
            .context("invalid slideshow configuration")?;
        self.surface
            .validate()
            .context("invalid surface configuration")?;
        Ok(self)
    }

    /// Parsed `server-url`.
    pub fn server_base(&self) -> Result<Url> {
        ensure!(!self.server_url.trim().is_empty(), "server-url must not be empty");
        Url::parse(self.server_url.trim())
            .with_context(|| format!("server-url {:?} is not a valid URL", self.server_url))
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            timezone: None,
            control_socket_path: PathBuf::from(DEFAULT_CONTROL_SOCKET_PATH),
            sleep_check_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(15),
            sync: SyncOptions::default(),
            slideshow: SlideshowTiming::default(),
            surface: SurfaceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SyncOptions {
    /// Try the WebSocket push channel before falling back to polling.
    pub push_enabled: bool,
    /// Path of the push channel on the server.
    pub push_path: String,
    /// How long push gets to deliver the first snapshot.
    #[serde(with = "humantime_serde")]
    pub startup_grace: Duration,
    /// Polling period once the pull fallback is engaged.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// First reconnect delay after the push channel drops.
    #[serde(with = "humantime_serde")]
    pub reconnect_initial: Duration,
    /// Upper bound for the reconnect delay.
    #[serde(with = "humantime_serde")]
    pub reconnect_max: Duration,
    /// Limit on the TCP connect plus WebSocket handshake.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Ping period on an open push channel. A channel silent for two periods
    /// is treated as dead and reconnected.
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,
}

impl SyncOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.push_path.starts_with('/'),
            "sync.push-path must start with '/'"
        );
        ensure!(
            !self.startup_grace.is_zero(),
            "sync.startup-grace must be greater than zero"
        );
        ensure!(
            !self.poll_interval.is_zero(),
            "sync.poll-interval must be greater than zero"
        );
        ensure!(
            !self.reconnect_initial.is_zero(),
            "sync.reconnect-initial must be greater than zero"
        );
        ensure!(
            self.reconnect_max >= self.reconnect_initial,
            "sync.reconnect-max must be at least sync.reconnect-initial"
        );
        ensure!(
            !self.connect_timeout.is_zero(),
            "sync.connect-timeout must be greater than zero"
        );
        ensure!(
            !self.keepalive_interval.is_zero(),
            "sync.keepalive-interval must be greater than zero"
        );
        Ok(())
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            push_enabled: true,
            push_path: "/ws/frame".to_string(),
            startup_grace: Duration::from_secs(5),
            poll_interval: Duration::from_secs(60),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SlideshowTiming {
    /// Retry period while there is nothing to show.
    #[serde(with = "humantime_serde")]
    pub empty_retry: Duration,
    /// Delay before moving past a photo that failed to load.
    #[serde(with = "humantime_serde")]
    pub skip_delay: Duration,
    /// How long an outgoing photo stays around for its exit transition.
    #[serde(with = "humantime_serde")]
    pub exit_duration: Duration,
}

impl SlideshowTiming {
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.empty_retry.is_zero(),
            "slideshow.empty-retry must be greater than zero"
        );
        ensure!(
            !self.skip_delay.is_zero(),
            "slideshow.skip-delay must be greater than zero"
        );
        Ok(())
    }
}

impl Default for SlideshowTiming {
    fn default() -> Self {
        Self {
            empty_retry: Duration::from_secs(5),
            skip_delay: Duration::from_secs(1),
            exit_duration: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum SurfaceConfig {
    /// Log every rendering step; useful headless.
    #[default]
    Log,
    /// Write the current frame to a PNG file for an external viewer.
    Snapshot { path: PathBuf },
}

impl SurfaceConfig {
    fn validate(&self) -> Result<()> {
        if let Self::Snapshot { path } = self {
            ensure!(
                path.file_name().is_some(),
                "surface.path must include a file name"
            );
        }
        Ok(())
    }
}
