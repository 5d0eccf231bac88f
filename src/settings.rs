use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::detection::DetectorConfig;
use crate::escalation::EscalationConfig;
use crate::realtime::RealtimeConfig;

pub const MODEL_PATH_ENV: &str = "STRESS_SENSE_MODEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressSettings {
    pub model_path: Option<PathBuf>,
    pub inference_timeout_ms: u64,
    pub detector: DetectorConfig,
    pub escalation: EscalationConfig,
    pub realtime: RealtimeConfig,
}

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            inference_timeout_ms: 2_000,
            detector: DetectorConfig::default(),
            escalation: EscalationConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl StressSettings {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    /// `STRESS_SENSE_MODEL` wins over the configured path. Relative paths
    /// resolve against `base`.
    pub fn resolved_model_path(&self, base: &Path) -> Option<PathBuf> {
        std::env::var_os(MODEL_PATH_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.model_path.clone())
            .map(|path| base.join(path))
    }

    /// Detector settings with the model path resolved against `base`.
    pub fn resolved_detector(&self, base: &Path) -> DetectorConfig {
        DetectorConfig {
            model_path: self.detector.model_path.as_ref().map(|path| base.join(path)),
            ..self.detector.clone()
        }
    }
}

/// Settings file, read once at startup.
pub struct SettingsStore {
    path: PathBuf,
    data: StressSettings,
}

impl SettingsStore {
    /// Load settings from `path`, writing the defaults there when the file
    /// does not exist yet.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            StressSettings::default()
        };

        let store = Self { path, data };
        if !store.path.exists() {
            store.persist()?;
        }
        Ok(store)
    }

    pub fn get(&self) -> &StressSettings {
        &self.data
    }

    /// Directory relative model paths resolve against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
