use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, warn};

use super::error::{TransferError, WorkerError};
use super::transfer::{run_transfer, CancelSignal, RETRY_DELAY};
use super::{ProgressEvent, ProgressSink, TestPhase};
use crate::config::SpeedTestConfig;

/// Drives the download phase: a fresh byte counter, `threads` GET-and-drain
/// workers, and the sampler for `download_duration` seconds. Returns the
/// average throughput in Mbps.
pub async fn measure_download(
    client: &Client,
    config: &SpeedTestConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: &CancelSignal,
) -> Result<f64, TransferError> {
    let endpoint = config.download_url();

    progress.notify(ProgressEvent {
        phase: TestPhase::Download,
        progress: 0.0,
        current: 0.0,
        status: format!("Testing: {endpoint}"),
    });

    let counter = Arc::new(AtomicU64::new(0));
    let summary = run_transfer(
        config.threads,
        Duration::from_secs(config.download_duration),
        TestPhase::Download,
        Arc::clone(&counter),
        Arc::clone(&progress),
        |mbps| format!("Download: {mbps:.2} Mbps"),
        cancel,
        |phase_cancel| {
            download_worker(
                client.clone(),
                endpoint.clone(),
                Arc::clone(&counter),
                phase_cancel,
            )
        },
    )
    .await?;

    progress.notify(ProgressEvent {
        phase: TestPhase::Download,
        progress: 100.0,
        current: summary.average_mbps,
        status: format!(
            "Downloaded {:.2} MB, {} samples",
            summary.total_bytes as f64 / (1024.0 * 1024.0),
            summary.sample_count
        ),
    });

    Ok(summary.average_mbps)
}

/// One download worker: GET the endpoint with a cache-busting query value
/// and stream the body, crediting each chunk to the shared counter as it
/// arrives so mid-transfer sampler readings are meaningful.
async fn download_worker(
    client: Client,
    endpoint: String,
    counter: Arc<AtomicU64>,
    cancel: CancelSignal,
) -> Result<(), WorkerError> {
    let mut requests = 0u32;
    let mut successes = 0u32;
    let mut errors = 0u32;

    while !cancel.is_cancelled() {
        requests += 1;
        let url = format!("{}?n={}", endpoint, rand::random::<u32>());

        let response = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = client.get(&url).send() => match sent {
                Ok(response) => response,
                Err(err) => {
                    errors += 1;
                    return Err(err.into());
                }
            },
        };

        if !response.status().is_success() {
            errors += 1;
            let err = WorkerError::HttpStatus {
                status: response.status(),
                url,
            };
            // First rejection for this worker is fatal to help diagnose a
            // misconfigured endpoint; later ones back off and retry.
            if errors == 1 {
                return Err(err);
            }
            warn!(%err, "download request rejected, retrying");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
            continue;
        }

        let mut stream = response.bytes_stream();
        let mut request_bytes = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => {
                    counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    request_bytes += chunk.len() as u64;
                }
                Some(Err(err)) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    errors += 1;
                    return Err(err.into());
                }
                None => break,
            }
        }
        if request_bytes > 0 {
            successes += 1;
        }
    }

    debug!(requests, successes, errors, "download worker finished");
    Ok(())
}
