#![allow(dead_code)]

use std::time::Duration;

use api::{JobCounts, JobState, QueueError, QueueService, Settings};
use broker::BrokerConfig;

/// Settings for an in-memory broker with short timings.
pub fn memory_settings() -> Settings {
    Settings {
        broker: BrokerConfig::memory(),
        worker_block_timeout: Duration::from_millis(50),
        demo_job_delay: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(2),
        ..Settings::default()
    }
}

/// Poll stats until `state` reaches `expected`, or give up after `timeout`.
pub async fn wait_for_count(
    service: &QueueService,
    state: JobState,
    expected: u64,
    timeout: Duration,
) -> Result<JobCounts, QueueError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let counts = service.stats().await?;
        if counts.get(state) == expected || tokio::time::Instant::now() >= deadline {
            return Ok(counts);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
