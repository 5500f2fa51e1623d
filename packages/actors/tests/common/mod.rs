#![allow(dead_code)]

use std::time::Duration;

use broker::{BrokerConfig, BrokerError, BrokerQueue, Connection};
use queue_core::{JobCounts, JobPayload, JobState};
use serde_json::{Map, Value};

pub async fn memory_queue(name: &str) -> Result<(Connection, BrokerQueue), BrokerError> {
    let connection = broker::connect(&BrokerConfig::memory())
        .await?
        .ok_or_else(|| BrokerError::InvalidConfig("memory broker did not connect".into()))?;
    let queue = BrokerQueue::new(&connection, name)?;
    Ok((connection, queue))
}

pub fn payload_with_message(message: &str) -> JobPayload {
    let mut map = Map::new();
    map.insert("msg".to_string(), Value::String(message.to_string()));
    map
}

/// Poll the queue until `state` reaches `expected`, or give up after `timeout`.
pub async fn wait_for_count(
    queue: &BrokerQueue,
    state: JobState,
    expected: u64,
    timeout: Duration,
) -> Result<JobCounts, BrokerError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let counts = queue.counts().await?;
        if counts.get(state) == expected || tokio::time::Instant::now() >= deadline {
            return Ok(counts);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
