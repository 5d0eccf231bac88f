pub mod alerts;
pub mod policies;
pub mod readings;

pub use readings::{DEFAULT_HISTORY_LIMIT, DEFAULT_TREND_DAYS};
