//! Job lifecycle states and per-state count snapshots.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job inside the broker.
///
/// `waiting -> active -> completed | failed`, with `delayed` and `paused`
/// as holding states the broker may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Paused,
}

impl JobState {
    /// Every state, in the order counts are reported.
    pub const ALL: [JobState; 6] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
        JobState::Paused,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
            JobState::Paused => "paused",
        }
    }

    /// Check if the state is a final outcome.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for JobState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Point-in-time mapping from state to job count.
///
/// Always recomputed from the broker, never stored. The disabled
/// subsystem reports an empty snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobCounts(BTreeMap<JobState, u64>);

impl JobCounts {
    /// An empty snapshot (`{}` when serialized).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&mut self, state: JobState, count: u64) {
        self.0.insert(state, count);
    }

    pub fn with(mut self, state: JobState, count: u64) -> Self {
        self.set(state, count);
        self
    }

    /// Count for a state; states missing from the snapshot count as zero.
    pub fn get(&self, state: JobState) -> u64 {
        self.0.get(&state).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Jobs that reached a terminal state and are still retained.
    pub fn finished(&self) -> u64 {
        self.get(JobState::Completed) + self.get(JobState::Failed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobState, u64)> + '_ {
        self.0.iter().map(|(state, count)| (*state, *count))
    }
}

impl FromIterator<(JobState, u64)> for JobCounts {
    fn from_iter<T: IntoIterator<Item = (JobState, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn state_names_parse_back() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>(), Ok(state));
        }
        assert!("stalled".parse::<JobState>().is_err());
    }

    #[test]
    fn empty_counts_serialize_as_empty_object() {
        let json = serde_json::to_string(&JobCounts::empty()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn counts_serialize_by_state_name() {
        let counts = JobCounts::empty()
            .with(JobState::Waiting, 3)
            .with(JobState::Completed, 1);
        let value = serde_json::to_value(&counts).unwrap();
        assert_eq!(value, serde_json::json!({"waiting": 3, "completed": 1}));
        assert_eq!(counts.get(JobState::Failed), 0);
        assert_eq!(counts.finished(), 1);
    }
}
