//! Rendering side of the slideshow.
//!
//! The presentation loop keeps the authoritative record of what is shown; a
//! surface only turns those decisions into pixels (or log lines).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use tracing::{debug, info};

use crate::config::SurfaceConfig;
use crate::model::Transition;
use crate::slideshow::Displayed;
use crate::tasks::loader::LoadedPhoto;

pub const PLACEHOLDER_MESSAGE: &str = "No Photos Available";

pub trait Surface: Send {
    /// Replace everything on screen with a text placeholder.
    fn show_placeholder(&mut self, message: &str) -> Result<()>;

    /// Insert `frame` as showing number `generation` and start its enter
    /// transition.
    fn present(&mut self, generation: u64, frame: &LoadedPhoto, transition: Transition)
        -> Result<()>;

    /// Start the exit transition of a showing that is being replaced.
    fn retire(&mut self, shown: &Displayed) -> Result<()>;

    /// Drop a showing whose exit transition has finished.
    fn remove(&mut self, shown: &Displayed) -> Result<()>;

    /// Show or hide the sleep overlay.
    fn set_sleeping(&mut self, sleeping: bool) -> Result<()>;
}

pub fn from_config(cfg: &SurfaceConfig) -> Box<dyn Surface> {
    match cfg {
        SurfaceConfig::Log => Box::new(LogSurface),
        SurfaceConfig::Snapshot { path } => Box::new(SnapshotSurface::new(path.clone())),
    }
}

/// Headless surface: every rendering step becomes a log line.
#[derive(Debug, Default)]
pub struct LogSurface;

impl Surface for LogSurface {
    fn show_placeholder(&mut self, message: &str) -> Result<()> {
        info!(message, "placeholder");
        Ok(())
    }

    fn present(
        &mut self,
        generation: u64,
        frame: &LoadedPhoto,
        transition: Transition,
    ) -> Result<()> {
        let (width, height) = frame.dimensions();
        info!(
            generation,
            filename = %frame.photo.filename,
            width,
            height,
            %transition,
            class = transition.animation_class().unwrap_or("-"),
            "present"
        );
        Ok(())
    }

    fn retire(&mut self, shown: &Displayed) -> Result<()> {
        debug!(generation = shown.generation, filename = %shown.photo.filename, "exit transition");
        Ok(())
    }

    fn remove(&mut self, shown: &Displayed) -> Result<()> {
        debug!(generation = shown.generation, filename = %shown.photo.filename, "removed");
        Ok(())
    }

    fn set_sleeping(&mut self, sleeping: bool) -> Result<()> {
        info!(sleeping, "sleep overlay");
        Ok(())
    }
}

/// Writes the visible frame to a PNG file, replacing it atomically, so an
/// external viewer can pick it up. Placeholder and sleep are a black frame.
#[derive(Debug)]
pub struct SnapshotSurface {
    path: PathBuf,
    current: Option<RgbaImage>,
    sleeping: bool,
}

impl SnapshotSurface {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            current: None,
            sleeping: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn blank(&self) -> RgbaImage {
        let (width, height) = self
            .current
            .as_ref()
            .map_or((1, 1), |img| img.dimensions());
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
    }

    fn write(&self, img: &RgbaImage) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("png.tmp");
        img.save_with_format(&tmp, ImageFormat::Png)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl Surface for SnapshotSurface {
    fn show_placeholder(&mut self, message: &str) -> Result<()> {
        debug!(message, path = %self.path.display(), "snapshot placeholder");
        let blank = self.blank();
        self.current = None;
        self.write(&blank)
    }

    fn present(
        &mut self,
        _generation: u64,
        frame: &LoadedPhoto,
        transition: Transition,
    ) -> Result<()> {
        debug!(filename = %frame.photo.filename, %transition, "snapshot present");
        self.current = Some(frame.image.clone());
        if self.sleeping {
            return Ok(());
        }
        self.write(&frame.image)
    }

    fn retire(&mut self, _shown: &Displayed) -> Result<()> {
        Ok(())
    }

    fn remove(&mut self, _shown: &Displayed) -> Result<()> {
        Ok(())
    }

    fn set_sleeping(&mut self, sleeping: bool) -> Result<()> {
        self.sleeping = sleeping;
        match (&self.current, sleeping) {
            (Some(img), false) => self.write(img),
            _ => self.write(&self.blank()),
        }
    }
}
