use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use tracing::debug;

use super::error::{PingError, SpeedTestError, TransferError};
use super::transfer::CancelSignal;
use super::{download, ping, upload};
use super::{ProgressEvent, ProgressSink, SpeedTestResult, TestPhase};
use crate::config::SpeedTestConfig;
use crate::host;

/// Sequences Ping -> Download -> Upload -> Complete and assembles the final
/// result record. Any phase fault stops the sequence and is absorbed into a
/// failed result; cancellation is the only outcome without a result.
pub struct SpeedTestRunner {
    config: Arc<SpeedTestConfig>,
    client: Client,
}

enum PhaseFailure {
    Cancelled,
    Failed(String),
}

impl SpeedTestRunner {
    pub fn new(config: Arc<SpeedTestConfig>, client: Client) -> Self {
        Self { config, client }
    }

    pub async fn run(
        &self,
        progress: Arc<dyn ProgressSink>,
        cancel: CancelSignal,
    ) -> Result<SpeedTestResult, SpeedTestError> {
        let identity = host::collect();
        let mut result = SpeedTestResult {
            success: true,
            error: None,
            computer_name: identity.computer_name,
            ip: identity.ip,
            connection_type: identity.connection_type,
            download_mbps: 0.0,
            upload_mbps: 0.0,
            ping_ms: 0.0,
            jitter_ms: 0.0,
            server: self.config.server_url.clone(),
            timestamp: Utc::now(),
        };

        match self.run_phases(&mut result, &progress, &cancel).await {
            Ok(()) => {
                progress.notify(ProgressEvent {
                    phase: TestPhase::Complete,
                    progress: 100.0,
                    current: 0.0,
                    status: "Test complete!".into(),
                });
            }
            Err(PhaseFailure::Cancelled) => {
                debug!("run cancelled, discarding partial results");
                return Err(SpeedTestError::Cancelled);
            }
            Err(PhaseFailure::Failed(message)) => {
                result.success = false;
                progress.notify(ProgressEvent {
                    phase: TestPhase::Error,
                    progress: 0.0,
                    current: 0.0,
                    status: format!("Error: {message}"),
                });
                result.error = Some(message);
            }
        }

        Ok(result)
    }

    async fn run_phases(
        &self,
        result: &mut SpeedTestResult,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancelSignal,
    ) -> Result<(), PhaseFailure> {
        progress.notify(starting(TestPhase::Ping, "Starting ping test..."));
        let latency = ping::measure_ping(&self.client, &self.config, progress.as_ref(), cancel)
            .await
            .map_err(|err| match err {
                PingError::Cancelled => PhaseFailure::Cancelled,
                other => PhaseFailure::Failed(other.to_string()),
            })?;
        result.ping_ms = round1(latency.min_ms);
        result.jitter_ms = round1(latency.jitter_ms);

        progress.notify(starting(TestPhase::Download, "Starting download test..."));
        let download_mbps =
            download::measure_download(&self.client, &self.config, Arc::clone(progress), cancel)
                .await
                .map_err(phase_failure)?;
        result.download_mbps = round2(download_mbps);

        progress.notify(starting(TestPhase::Upload, "Starting upload test..."));
        let upload_mbps =
            upload::measure_upload(&self.client, &self.config, Arc::clone(progress), cancel)
                .await
                .map_err(phase_failure)?;
        result.upload_mbps = round2(upload_mbps);

        Ok(())
    }
}

fn phase_failure(err: TransferError) -> PhaseFailure {
    match err {
        TransferError::Cancelled => PhaseFailure::Cancelled,
        other => PhaseFailure::Failed(other.to_string()),
    }
}

fn starting(phase: TestPhase, status: &str) -> ProgressEvent {
    ProgressEvent {
        phase,
        progress: 0.0,
        current: 0.0,
        status: status.into(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
