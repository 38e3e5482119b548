use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, warn};

use super::error::{TransferError, WorkerError};
use super::transfer::{run_transfer, CancelSignal, RETRY_DELAY};
use super::{ProgressEvent, ProgressSink, TestPhase};
use crate::config::SpeedTestConfig;

/// Drives the upload phase: generates the payload once, then runs `threads`
/// POST workers against a fresh byte counter for `upload_duration` seconds.
/// Returns the average throughput in Mbps.
pub async fn measure_upload(
    client: &Client,
    config: &SpeedTestConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: &CancelSignal,
) -> Result<f64, TransferError> {
    let endpoint = config.upload_url();

    progress.notify(ProgressEvent {
        phase: TestPhase::Upload,
        progress: 0.0,
        current: 0.0,
        status: format!("Testing: {endpoint}"),
    });

    // Shared read-only across all workers; `Bytes` makes the per-request
    // body a refcount bump, not a copy.
    let payload = generate_payload(config.upload_data_size_mb as usize * 1_048_576);

    progress.notify(ProgressEvent {
        phase: TestPhase::Upload,
        progress: 0.0,
        current: 0.0,
        status: format!(
            "Generated {:.2} MB of upload data",
            payload.len() as f64 / (1024.0 * 1024.0)
        ),
    });

    let counter = Arc::new(AtomicU64::new(0));
    let summary = run_transfer(
        config.threads,
        Duration::from_secs(config.upload_duration),
        TestPhase::Upload,
        Arc::clone(&counter),
        Arc::clone(&progress),
        |mbps| format!("Upload: {mbps:.2} Mbps"),
        cancel,
        |phase_cancel| {
            upload_worker(
                client.clone(),
                endpoint.clone(),
                payload.clone(),
                Arc::clone(&counter),
                phase_cancel,
            )
        },
    )
    .await?;

    progress.notify(ProgressEvent {
        phase: TestPhase::Upload,
        progress: 100.0,
        current: summary.average_mbps,
        status: format!(
            "Uploaded {:.2} MB, {} samples",
            summary.total_bytes as f64 / (1024.0 * 1024.0),
            summary.sample_count
        ),
    });

    Ok(summary.average_mbps)
}

fn generate_payload(size: usize) -> Bytes {
    let mut rng = StdRng::from_entropy();
    let mut data = vec![0u8; size];
    rng.fill_bytes(&mut data);
    Bytes::from(data)
}

/// One upload worker: POST the full payload with a cache-busting query
/// value. Upload accounting is per completed request, since the payload is
/// sent atomically.
async fn upload_worker(
    client: Client,
    endpoint: String,
    payload: Bytes,
    counter: Arc<AtomicU64>,
    cancel: CancelSignal,
) -> Result<(), WorkerError> {
    let mut requests = 0u32;
    let mut successes = 0u32;
    let mut errors = 0u32;

    while !cancel.is_cancelled() {
        requests += 1;
        let url = format!("{}?n={}", endpoint, rand::random::<f64>());

        let request = client
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload.clone());

        let response = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = request.send() => match sent {
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
            // Same policy as the download worker: first rejection is fatal,
            // later ones back off and retry.
            if errors == 1 {
                return Err(err);
            }
            warn!(%err, "upload request rejected, retrying");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
            continue;
        }

        counter.fetch_add(payload.len() as u64, Ordering::Relaxed);
        successes += 1;
    }

    debug!(requests, successes, errors, "upload worker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::http_fixture::{spawn, Respond};

    #[test]
    fn payload_has_requested_size_and_entropy() {
        let payload = generate_payload(2 * 1_048_576);
        assert_eq!(payload.len(), 2 * 1_048_576);
        // A CSPRNG-filled buffer is never all one value.
        let first = payload[0];
        assert!(payload.iter().any(|&b| b != first));
    }

    #[tokio::test]
    async fn worker_credits_full_payload_per_completed_request() {
        let addr = spawn(Respond::OkWithBody(0)).await;
        let client = Client::new();
        let counter = Arc::new(AtomicU64::new(0));
        let cancel = CancelSignal::new();
        let payload = Bytes::from(vec![7u8; 4096]);

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        upload_worker(
            client,
            format!("http://{addr}/upload"),
            payload,
            Arc::clone(&counter),
            cancel,
        )
        .await
        .unwrap();

        let total = counter.load(Ordering::Relaxed);
        assert!(total > 0, "no completed uploads credited");
        assert_eq!(total % 4096, 0, "partial payload credited: {total}");
    }

    #[tokio::test]
    async fn first_status_error_is_fatal_to_the_worker() {
        let addr = spawn(Respond::Status(429)).await;
        let client = Client::new();
        let counter = Arc::new(AtomicU64::new(0));
        let cancel = CancelSignal::new();

        let result = upload_worker(
            client,
            format!("http://{addr}/upload"),
            Bytes::from_static(b"data"),
            Arc::clone(&counter),
            cancel,
        )
        .await;

        match result {
            Err(WorkerError::HttpStatus { status, .. }) => {
                assert_eq!(status.as_u16(), 429)
            }
            other => panic!("expected status fault, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
