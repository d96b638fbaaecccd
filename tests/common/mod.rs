#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::sync::mpsc;
use tokio::time::Instant;

use kiosk_frame::api::FrameApi;
use kiosk_frame::error::Error;
use kiosk_frame::model::{Photo, Settings, Snapshot, Transition};
use kiosk_frame::slideshow::Displayed;
use kiosk_frame::surface::Surface;
use kiosk_frame::tasks::loader::LoadedPhoto;

pub fn photo(name: &str, active: bool) -> Photo {
    Photo {
        filename: name.to_string(),
        active,
        folder: ".".into(),
        added: None,
    }
}

pub fn snapshot(photos: &[(&str, bool)], settings: Settings) -> Snapshot {
    Snapshot {
        photos: photos
            .iter()
            .map(|(name, active)| photo(name, *active))
            .collect(),
        settings,
    }
}

pub fn rotating(seconds: f64) -> Settings {
    Settings {
        rotation_speed: Some(seconds),
        ..Settings::default()
    }
}

pub fn png_bytes() -> Vec<u8> {
    let img = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// In-memory backend. Images decode unless listed as broken; slow images
/// take their configured delay to arrive.
pub struct FakeApi {
    snapshot: Mutex<Snapshot>,
    broken: Vec<String>,
    slow: HashMap<String, Duration>,
    fetched: Mutex<Vec<String>>,
    snapshot_calls: Mutex<usize>,
    png: Vec<u8>,
}

impl FakeApi {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            broken: Vec::new(),
            slow: HashMap::new(),
            fetched: Mutex::new(Vec::new()),
            snapshot_calls: Mutex::new(0),
            png: png_bytes(),
        }
    }

    pub fn empty() -> Self {
        Self::new(snapshot(&[], Settings::default()))
    }

    pub fn with_broken(mut self, filename: &str) -> Self {
        self.broken.push(filename.to_string());
        self
    }

    pub fn with_slow(mut self, filename: &str, delay: Duration) -> Self {
        self.slow.insert(filename.to_string(), delay);
        self
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn snapshot_calls(&self) -> usize {
        *self.snapshot_calls.lock().unwrap()
    }
}

#[async_trait]
impl FrameApi for FakeApi {
    async fn fetch_photos(&self) -> Result<Vec<Photo>, Error> {
        Ok(self.snapshot.lock().unwrap().photos.clone())
    }

    async fn fetch_settings(&self) -> Result<Settings, Error> {
        Ok(self.snapshot.lock().unwrap().settings.clone())
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, Error> {
        *self.snapshot_calls.lock().unwrap() += 1;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn fetch_image(&self, photo: &Photo) -> Result<Vec<u8>, Error> {
        self.fetched.lock().unwrap().push(photo.filename.clone());
        if let Some(delay) = self.slow.get(&photo.filename) {
            tokio::time::sleep(*delay).await;
        }
        if self.broken.contains(&photo.filename) {
            return Ok(b"definitely not an image".to_vec());
        }
        Ok(self.png.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Placeholder(String),
    Present {
        generation: u64,
        filename: String,
        transition: Transition,
    },
    Retire {
        generation: u64,
        filename: String,
    },
    Remove {
        generation: u64,
        filename: String,
    },
    Sleeping(bool),
}

/// Surface that reports every call, stamped with the (virtual) time.
pub struct RecordingSurface {
    events: mpsc::UnboundedSender<(Instant, SurfaceEvent)>,
}

impl RecordingSurface {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Instant, SurfaceEvent)>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }

    fn record(&self, event: SurfaceEvent) -> anyhow::Result<()> {
        let _ = self.events.send((Instant::now(), event));
        Ok(())
    }
}

impl Surface for RecordingSurface {
    fn show_placeholder(&mut self, message: &str) -> anyhow::Result<()> {
        self.record(SurfaceEvent::Placeholder(message.to_string()))
    }

    fn present(
        &mut self,
        generation: u64,
        frame: &LoadedPhoto,
        transition: Transition,
    ) -> anyhow::Result<()> {
        self.record(SurfaceEvent::Present {
            generation,
            filename: frame.photo.filename.clone(),
            transition,
        })
    }

    fn retire(&mut self, shown: &Displayed) -> anyhow::Result<()> {
        self.record(SurfaceEvent::Retire {
            generation: shown.generation,
            filename: shown.photo.filename.clone(),
        })
    }

    fn remove(&mut self, shown: &Displayed) -> anyhow::Result<()> {
        self.record(SurfaceEvent::Remove {
            generation: shown.generation,
            filename: shown.photo.filename.clone(),
        })
    }

    fn set_sleeping(&mut self, sleeping: bool) -> anyhow::Result<()> {
        self.record(SurfaceEvent::Sleeping(sleeping))
    }
}
