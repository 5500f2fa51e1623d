#![allow(dead_code)]

use serde_json::{Map, Value};

use broker::{BrokerConfig, BrokerError, BrokerQueue, Connection};
use queue_core::JobPayload;

pub async fn memory_connection() -> Result<Connection, BrokerError> {
    broker::connect(&BrokerConfig::memory())
        .await?
        .ok_or_else(|| BrokerError::InvalidConfig("memory broker did not connect".into()))
}

pub async fn memory_queue(name: &str) -> Result<(Connection, BrokerQueue), BrokerError> {
    let connection = memory_connection().await?;
    let queue = BrokerQueue::new(&connection, name)?;
    Ok((connection, queue))
}

/// Redis URL for the live-broker tests; they are skipped when unset.
pub fn redis_test_url() -> Option<String> {
    std::env::var("REDIS_TEST_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

pub fn payload_with_message(message: &str) -> JobPayload {
    let mut map = Map::new();
    map.insert("msg".to_string(), Value::String(message.to_string()));
    map
}
