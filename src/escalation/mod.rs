pub mod config;
pub mod monitor;
pub mod store;

pub use config::EscalationConfig;
pub use monitor::EscalationMonitor;
pub use store::StressStore;
