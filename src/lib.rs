pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod schedule;
pub mod slideshow;
pub mod surface;
pub mod tasks {
    pub mod control;
    pub mod loader;
    pub mod poll;
    pub mod presenter;
    pub mod push;
    pub mod sync;
}
