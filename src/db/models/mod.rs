pub mod alert;
pub mod policy;
pub mod reading;
pub mod trend;

pub use alert::{Alert, HIGH_STRESS_ALERT_TITLE};
pub use policy::{AlertThreshold, NotificationPolicy, PolicyInput};
pub use reading::{Reading, ReadingSource};
pub use trend::DailyTrend;
