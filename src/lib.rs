pub mod db;
pub mod detection;
pub mod error;
pub mod escalation;
pub mod realtime;
pub mod service;
pub mod settings;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};

use db::Database;
use detection::{ScoreEngine, StressPipeline};
use escalation::EscalationMonitor;
use realtime::RealtimeConfig;
use service::StressService;
use settings::SettingsStore;

pub const DATABASE_FILE: &str = "stress-sense.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

/// Everything a front end needs, built once at startup. The face detector
/// and the scoring model are loaded here and never reloaded.
pub struct AppState {
    pub settings: SettingsStore,
    pub service: StressService,
}

impl AppState {
    pub fn bootstrap(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let database = Database::new(data_dir.join(DATABASE_FILE))?;
        let service = build_service(database, &settings);

        Ok(Self { settings, service })
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        self.settings.get().realtime.clone()
    }
}

fn build_service(database: Database, settings: &SettingsStore) -> StressService {
    let current = settings.get();
    let base = settings.base_dir();
    let model_path = current.resolved_model_path(base);
    let engine = ScoreEngine::from_model_path(model_path.as_deref(), current.inference_timeout());
    let pipeline = StressPipeline::with_config(Arc::new(current.resolved_detector(base)), engine);
    StressService::new(
        database,
        pipeline,
        EscalationMonitor::new(current.escalation.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_files_and_falls_back_without_model() {
        let dir = std::env::temp_dir().join(format!("stress-sense-app-{}", uuid::Uuid::new_v4()));
        let state = AppState::bootstrap(&dir).unwrap();

        assert!(dir.join(SETTINGS_FILE).exists());
        assert!(dir.join(DATABASE_FILE).exists());
        assert_eq!(state.settings.base_dir(), dir.as_path());
        assert_eq!(state.realtime_config(), RealtimeConfig::default());
        if std::env::var_os(settings::MODEL_PATH_ENV).is_none() {
            assert!(!state.service.pipeline().engine().is_model_backed());
        }
        assert!(!state.service.pipeline().localizer().is_enabled());

        drop(state);
        let _ = std::fs::remove_dir_all(dir);
    }
}
