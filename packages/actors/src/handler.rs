//! Job processor trait and the built-in processors.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use queue_core::{Job, JobResult};
use serde_json::json;

/// Result type for job processors. The error is the failure reason
/// recorded on the job.
pub type HandlerResult = Result<JobResult, String>;

/// Future type for async job processors.
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// Processes claimed jobs.
///
/// One processor serves every job of the worker's queue; dispatch on
/// [`Job::name`] inside the processor if a queue carries several kinds of
/// work. A panic inside the returned future fails the job, it does not
/// take the worker down.
pub trait JobProcessor: Send + Sync + 'static {
    fn process(&self, job: Job) -> HandlerFuture;
}

impl<P: JobProcessor + ?Sized> JobProcessor for Arc<P> {
    fn process(&self, job: Job) -> HandlerFuture {
        (**self).process(job)
    }
}

/// A simple function-based job processor.
pub struct FnProcessor<F>
where
    F: Fn(Job) -> HandlerFuture + Send + Sync + 'static,
{
    processor: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(Job) -> HandlerFuture + Send + Sync + 'static,
{
    pub fn new(processor: F) -> Self {
        Self { processor }
    }
}

impl<F> JobProcessor for FnProcessor<F>
where
    F: Fn(Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn process(&self, job: Job) -> HandlerFuture {
        (self.processor)(job)
    }
}

/// Helper macro for creating job processors from async closures.
#[macro_export]
macro_rules! job_processor {
    (|$job:ident| $body:expr) => {
        $crate::FnProcessor::new(|$job: ::queue_core::Job| -> $crate::HandlerFuture {
            Box::pin(async move {
                let result: $crate::HandlerResult = $body;
                result
            })
        })
    };
}

/// Stand-in processor: waits, then echoes the job back.
#[derive(Debug, Clone)]
pub struct DemoProcessor {
    delay: Duration,
}

impl DemoProcessor {
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DemoProcessor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY)
    }
}

impl JobProcessor for DemoProcessor {
    fn process(&self, job: Job) -> HandlerFuture {
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            let output = json!({
                "name": job.name,
                "data": job.data,
                "processedAt": Utc::now(),
            });
            Ok::<_, String>(JobResult::new(output))
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use queue_core::{JobId, JobOptions, JobPayload};

    fn job(name: &str) -> Job {
        let mut data = JobPayload::new();
        data.insert("hello".into(), json!("world"));
        Job::new(JobId::new("1"), name, data, JobOptions::default())
    }

    #[tokio::test]
    async fn demo_processor_echoes_the_job() {
        let processor = DemoProcessor::new(Duration::from_millis(1));
        let result = processor.process(job("demo")).await.unwrap();
        assert_eq!(result.output["name"], "demo");
        assert_eq!(result.output["data"]["hello"], "world");
        assert!(result.output["processedAt"].is_string());
    }

    #[tokio::test]
    async fn macro_builds_a_processor() {
        let processor = crate::job_processor!(|job| {
            if job.name == "bad" {
                Err("rejected".to_string())
            } else {
                Ok(JobResult::new(json!(job.id)))
            }
        });
        assert!(processor.process(job("good")).await.is_ok());
        assert_eq!(processor.process(job("bad")).await.unwrap_err(), "rejected");
    }
}
