//! Speed-test job.
//!
//! A single-shot subordinate task: measures latency, download and upload
//! against an HTTP probe, then writes the snapshot into the persisted state.
//! At most one job runs at a time; requests arriving while one is in flight
//! are dropped. Phase failures zero that phase's status; the snapshot is
//! recorded regardless, so the controller always sees the last attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::RngCore;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::collect::epoch_seconds;
use crate::config::Store;
use crate::inform::SpeedTestStatus;

/// Probe used when the configuration names none.
pub const DEFAULT_PROBE_URL: &str = "http://speedtest.tele2.net";

/// Download object fetched from the probe.
const DOWNLOAD_PATH: &str = "/10MB.zip";

/// Upload sink on the probe.
const UPLOAD_PATH: &str = "/upload.php";

/// Upload body size: 2 MiB of random bytes.
const UPLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Latency samples taken for the ping phase.
const PING_SAMPLES: u32 = 3;

/// Guard ensuring at most one speed-test runs at a time.
#[derive(Debug, Default)]
pub struct SpeedTestJob {
    running: AtomicBool,
}

impl SpeedTestJob {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn one run in the background. A request while a run is in flight
    /// is dropped.
    pub fn spawn(self: &Arc<Self>, store: Arc<Store>, client: Client) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("speed-test already running, dropping request");
            return;
        }

        let job = Arc::clone(self);
        tokio::spawn(async move {
            let probe = {
                let snapshot = store.snapshot();
                if snapshot.general.speedtest_url.is_empty() {
                    DEFAULT_PROBE_URL.to_string()
                } else {
                    snapshot.general.speedtest_url
                }
            };

            let status = run_probe(&client, &probe).await;
            info!(
                latency = status.latency,
                down = status.xput_download,
                up = status.xput_upload,
                "speed-test finished"
            );

            if let Err(e) = store.update(|config| config.speedtest = Some(status)) {
                warn!(error = %e, "cannot persist speed-test snapshot");
            }

            job.running.store(false, Ordering::SeqCst);
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn run_probe(client: &Client, probe: &str) -> SpeedTestStatus {
    let latency = measure_latency(client, probe).await;
    let mut status = SpeedTestStatus {
        latency,
        status_ping: u64::from(latency > 0),
        ..SpeedTestStatus::default()
    };

    match measure_download(client, probe).await {
        Some(mbps) => {
            status.xput_download = mbps;
            status.status_download = 1;
        }
        None => warn!(probe, "download phase failed"),
    }

    match measure_upload(client, probe).await {
        Some(mbps) => {
            status.xput_upload = mbps;
            status.status_upload = 1;
        }
        None => warn!(probe, "upload phase failed"),
    }

    let now = epoch_seconds() as u64;
    status.rundate = now;
    status.runtime = now;
    status
}

// Best round-trip of a few HEAD requests, in whole milliseconds.
async fn measure_latency(client: &Client, probe: &str) -> u64 {
    let mut best: Option<u128> = None;
    for _ in 0..PING_SAMPLES {
        let started = Instant::now();
        if client.head(probe).send().await.is_ok() {
            let elapsed = started.elapsed().as_millis();
            best = Some(best.map_or(elapsed, |b| b.min(elapsed)));
        }
    }
    best.unwrap_or(0) as u64
}

async fn measure_download(client: &Client, probe: &str) -> Option<f64> {
    let url = format!("{probe}{DOWNLOAD_PATH}");
    let started = Instant::now();
    let response = client.get(&url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body = response.bytes().await.ok()?;
    Some(throughput_mbps(body.len(), started))
}

async fn measure_upload(client: &Client, probe: &str) -> Option<f64> {
    let url = format!("{probe}{UPLOAD_PATH}");
    let mut body = vec![0u8; UPLOAD_BYTES];
    rand::thread_rng().fill_bytes(&mut body);

    let started = Instant::now();
    let response = client.post(&url).body(body).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    Some(throughput_mbps(UPLOAD_BYTES, started))
}

fn throughput_mbps(bytes: usize, started: Instant) -> f64 {
    let secs = started.elapsed().as_secs_f64().max(f64::EPSILON);
    (bytes as f64 * 8.0) / 1_000_000.0 / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_job_guard() {
        let job = SpeedTestJob::new();
        assert!(!job.is_running());
        assert!(job
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok());
        assert!(job.is_running());
        // A second claim is refused until the first completes.
        assert!(job
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err());
        job.running.store(false, Ordering::SeqCst);
        assert!(!job.is_running());
    }

    #[tokio::test]
    async fn test_failed_phases_still_snapshot() {
        let client = Client::new();
        // Nothing listens here; every phase fails.
        let status = run_probe(&client, "http://127.0.0.1:1").await;

        assert_eq!(status.status_ping, 0);
        assert_eq!(status.status_download, 0);
        assert_eq!(status.status_upload, 0);
        assert_eq!(status.latency, 0);
        // The attempt itself is still recorded.
        assert!(status.runtime > 0);
        assert!(status.rundate > 0);
    }

    #[tokio::test]
    async fn test_spawn_persists_snapshot() {
        let path = std::env::temp_dir().join(format!(
            "informant-speedtest-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let store = crate::config::Store::open(&path, crate::config::Format::Json).unwrap();
        store
            .update(|config| config.general.speedtest_url = "http://127.0.0.1:1".to_string())
            .unwrap();

        let job = SpeedTestJob::new();
        job.spawn(Arc::clone(&store), Client::new());

        for _ in 0..200 {
            if !job.is_running() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        assert!(!job.is_running(), "speed-test did not finish in time");

        let snapshot = store.snapshot().speedtest.expect("snapshot recorded");
        assert!(snapshot.runtime > 0);
        assert_eq!(snapshot.status_download, 0);
        let _ = std::fs::remove_file(&path);
    }
}
