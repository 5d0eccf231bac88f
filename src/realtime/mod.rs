pub mod config;
pub mod controller;
pub mod loop_worker;
pub mod phash;

pub use config::RealtimeConfig;
pub use controller::RealtimeController;
pub use loop_worker::{CaptureOutcome, WatchState};
