//! Server-owned records the frame consumes: photos, display settings and the
//! snapshot that bundles them.

use std::fmt;
use std::time::Duration;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

const DEFAULT_ROTATION_SECS: f64 = 10.0;
/// Longest rotation honoured; larger server values are clamped to a day.
const MAX_ROTATION_SECS: f64 = 24.0 * 60.0 * 60.0;

/// A photo as listed by `GET /api/photos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    /// Relative path under the upload store; doubles as the identifier.
    pub filename: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "Photo::default_folder")]
    pub folder: String,
    /// Seconds since the epoch. Only used to bust image caches.
    #[serde(default)]
    pub added: Option<f64>,
}

impl Photo {
    fn default_folder() -> String {
        ".".to_string()
    }

    /// Query string appended to image URLs so a re-uploaded file is refetched.
    pub fn cache_buster(&self) -> Option<String> {
        self.added
            .filter(|t| t.is_finite())
            .map(|t| format!("t={t}"))
    }
}

/// Transition family used when a new photo enters the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    #[default]
    Fade,
    Slide,
    Zoom,
    Blur,
    Flip,
    Revolve,
}

impl Transition {
    const ALL: &'static [Self] = &[
        Self::Fade,
        Self::Slide,
        Self::Zoom,
        Self::Blur,
        Self::Flip,
        Self::Revolve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fade => "fade",
            Self::Slide => "slide",
            Self::Zoom => "zoom",
            Self::Blur => "blur",
            Self::Flip => "flip",
            Self::Revolve => "revolve",
        }
    }

    /// Unknown names fall back to [`Transition::Fade`].
    pub fn from_name(raw: &str) -> Self {
        let raw = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw))
            .unwrap_or_default()
    }

    /// Animation class applied on top of the base fade; `None` for fade itself.
    pub fn animation_class(&self) -> Option<&'static str> {
        match self {
            Self::Fade => None,
            Self::Slide => Some("tx-slide"),
            Self::Zoom => Some("tx-zoom"),
            Self::Blur => Some("tx-blur"),
            Self::Flip => Some("tx-flip"),
            Self::Revolve => Some("tx-revolve"),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Transition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Self::from_name).unwrap_or_default())
    }
}

/// Display settings as served by `GET /api/settings`.
///
/// Every field tolerates being absent; the accessors apply the defaults the
/// frame falls back to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub rotation_speed: Option<f64>,
    #[serde(default)]
    pub transition: Transition,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub sleep_enabled: bool,
    #[serde(default)]
    pub sleep_start: Option<String>,
    #[serde(default)]
    pub sleep_end: Option<String>,
}

impl Settings {
    /// How long each photo stays on screen.
    pub fn rotation_interval(&self) -> Duration {
        let secs = self
            .rotation_speed
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(DEFAULT_ROTATION_SECS)
            .min(MAX_ROTATION_SECS);
        Duration::try_from_secs_f64(secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_ROTATION_SECS))
    }
}

/// One complete server state. Always applied wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub photos: Vec<Photo>,
    pub settings: Settings,
}

impl Snapshot {
    /// Active photos in server order.
    pub fn active_photos(&self) -> Vec<Photo> {
        self.photos.iter().filter(|p| p.active).cloned().collect()
    }
}
