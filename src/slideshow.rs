//! Cursor and display bookkeeping for the slideshow.
//!
//! This is the part of the driver that has no timers and no I/O: it decides
//! which photo a cycle loads and records what ends up on screen, so the
//! presentation loop (and tests) can inspect the display without a surface.

use crate::model::Photo;

/// Where the current cycle stands.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// Nothing in flight; waiting for the next cycle.
    Idle,
    /// The photo list was empty when the cycle began.
    Empty,
    /// Loading the image for `photo`.
    Loading { generation: u64, photo: Photo },
}

/// Outcome of [`Slideshow::begin_cycle`].
#[derive(Debug, Clone, PartialEq)]
pub enum CycleStart {
    Empty,
    Load {
        generation: u64,
        index: usize,
        photo: Photo,
    },
}

/// A photo on screen, tagged with the cycle that put it there so two
/// showings of the same file stay distinct.
#[derive(Debug, Clone, PartialEq)]
pub struct Displayed {
    pub generation: u64,
    pub photo: Photo,
}

/// A load that made it to the screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Presented {
    pub current: Displayed,
    /// What it replaces, which now has to transition out.
    pub previous: Option<Displayed>,
}

#[derive(Debug, Clone)]
pub struct Slideshow {
    cursor: Option<usize>,
    generation: u64,
    phase: Phase,
    displayed: Option<Displayed>,
}

impl Default for Slideshow {
    fn default() -> Self {
        Self::new()
    }
}

impl Slideshow {
    pub fn new() -> Self {
        Self {
            cursor: None,
            generation: 0,
            phase: Phase::Idle,
            displayed: None,
        }
    }

    /// Index of the photo most recently selected, `None` before the first
    /// selection or after the list went empty.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn displayed(&self) -> Option<&Displayed> {
        self.displayed.as_ref()
    }

    /// Start a cycle against the current list.
    ///
    /// The cursor advances by one and wraps modulo the *current* length, even
    /// when the list changed since the previous cycle.
    pub fn begin_cycle(&mut self, photos: &[Photo]) -> CycleStart {
        self.generation += 1;
        if photos.is_empty() {
            self.cursor = None;
            self.displayed = None;
            self.phase = Phase::Empty;
            return CycleStart::Empty;
        }

        let index = self.cursor.map_or(0, |c| c.wrapping_add(1)) % photos.len();
        self.cursor = Some(index);
        let photo = photos[index].clone();
        self.phase = Phase::Loading {
            generation: self.generation,
            photo: photo.clone(),
        };
        CycleStart::Load {
            generation: self.generation,
            index,
            photo,
        }
    }

    /// Record that the load for `generation` finished. Results from an
    /// abandoned cycle are dropped.
    pub fn complete(&mut self, generation: u64) -> Option<Presented> {
        let photo = match &self.phase {
            Phase::Loading {
                generation: current,
                photo,
            } if *current == generation => photo.clone(),
            _ => return None,
        };
        self.phase = Phase::Idle;
        let current = Displayed { generation, photo };
        let previous = self.displayed.replace(current.clone());
        Some(Presented { current, previous })
    }

    /// Record that the load for `generation` failed. The cursor is left where
    /// it is so the next cycle moves on exactly one step.
    pub fn fail(&mut self, generation: u64) -> bool {
        match &self.phase {
            Phase::Loading {
                generation: current,
                ..
            } if *current == generation => {
                self.phase = Phase::Idle;
                true
            }
            _ => false,
        }
    }

    /// Called when a snapshot replaces the list.
    pub fn on_photos_replaced(&mut self, photos: &[Photo]) {
        if photos.is_empty() {
            self.cursor = None;
        }
    }
}
