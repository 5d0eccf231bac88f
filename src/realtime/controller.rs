use anyhow::{bail, Context, Result};
use log::info;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::service::StressService;

use super::config::RealtimeConfig;
use super::loop_worker::watch_loop;

/// Owns at most one running frame watcher.
pub struct RealtimeController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for RealtimeController {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the token that stops the watcher, for callers that wire it to
    /// a signal.
    pub fn start(
        &mut self,
        subject_id: String,
        frame_dir: PathBuf,
        service: StressService,
        config: RealtimeConfig,
    ) -> Result<CancellationToken> {
        if self.handle.is_some() {
            bail!("frame watcher already active");
        }
        if !frame_dir.is_dir() {
            bail!("frame directory {} does not exist", frame_dir.display());
        }

        info!(
            "watching {} for subject {} every {}s",
            frame_dir.display(),
            subject_id,
            config.interval().as_secs()
        );

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(watch_loop(
            subject_id,
            frame_dir,
            service,
            config,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token.clone());
        Ok(cancel_token)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("frame watcher task failed to join")
        } else {
            Ok(())
        }
    }

    /// Wait for the watcher to exit on its own (its token was cancelled
    /// elsewhere).
    pub async fn join(&mut self) -> Result<()> {
        self.cancel_token = None;
        match self.handle.take() {
            Some(handle) => handle.await.context("frame watcher task failed to join"),
            None => Ok(()),
        }
    }
}
