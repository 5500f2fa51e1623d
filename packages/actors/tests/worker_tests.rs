#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{FnProcessor, HandlerFuture, JobProcessor, WorkerConfig, job_processor, start_worker};
use queue_core::{Job, JobId, JobOptions, JobResult, JobState};
use serde_json::json;

use common::{payload_with_message, wait_for_count};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        block_timeout: Duration::from_millis(50),
    }
}

fn echo_processor() -> Arc<dyn JobProcessor> {
    Arc::new(job_processor!(|job| Ok(JobResult::new(json!({ "echo": job.data })))))
}

#[tokio::test]
async fn worker_completes_jobs() -> Result<(), Box<dyn Error>> {
    let (_connection, queue) = common::memory_queue("demo").await?;
    let worker = start_worker(queue.clone(), echo_processor(), fast_config(2)).await?;

    for i in 0..3 {
        queue
            .add("echo", payload_with_message(&i.to_string()), JobOptions::default())
            .await?;
    }

    let counts = wait_for_count(&queue, JobState::Completed, 3, WAIT).await?;
    assert_eq!(counts.get(JobState::Completed), 3);
    assert_eq!(counts.get(JobState::Waiting), 0);

    let job = queue.get_job(&JobId::new("2")).await?.ok_or("job 2 missing")?;
    let return_value = job.return_value.ok_or("no return value")?;
    assert_eq!(return_value["output"]["echo"]["msg"], "1");

    worker.close().await?;
    Ok(())
}

#[tokio::test]
async fn failing_jobs_are_recorded_and_the_worker_keeps_going() -> Result<(), Box<dyn Error>> {
    let (_connection, queue) = common::memory_queue("demo").await?;
    let processor: Arc<dyn JobProcessor> = Arc::new(job_processor!(|job| {
        if job.name == "bad" {
            Err("invalid input".to_string())
        } else {
            Ok(JobResult::new(json!(null)))
        }
    }));
    let worker = start_worker(queue.clone(), processor, fast_config(1)).await?;

    queue.add("bad", payload_with_message("x"), JobOptions::default()).await?;
    queue.add("good", payload_with_message("y"), JobOptions::default()).await?;

    let counts = wait_for_count(&queue, JobState::Completed, 1, WAIT).await?;
    assert_eq!(counts.get(JobState::Failed), 1);
    assert_eq!(counts.get(JobState::Completed), 1);

    let failed = queue.get_job(&JobId::new("1")).await?.ok_or("job 1 missing")?;
    assert_eq!(failed.failed_reason.as_deref(), Some("invalid input"));

    worker.close().await?;
    Ok(())
}

#[tokio::test]
async fn panicking_processor_fails_the_job_only() -> Result<(), Box<dyn Error>> {
    let (_connection, queue) = common::memory_queue("demo").await?;
    let processor: Arc<dyn JobProcessor> = Arc::new(FnProcessor::new(|job: Job| -> HandlerFuture {
        Box::pin(async move {
            if job.name == "explode" {
                panic!("kaboom");
            }
            Ok::<_, String>(JobResult::new(json!("fine")))
        })
    }));
    let worker = start_worker(queue.clone(), processor, fast_config(1)).await?;

    queue.add("explode", payload_with_message("x"), JobOptions::default()).await?;
    queue.add("calm", payload_with_message("y"), JobOptions::default()).await?;

    let counts = wait_for_count(&queue, JobState::Completed, 1, WAIT).await?;
    assert_eq!(counts.get(JobState::Failed), 1);
    assert_eq!(counts.get(JobState::Completed), 1);

    let failed = queue.get_job(&JobId::new("1")).await?.ok_or("job 1 missing")?;
    let reason = failed.failed_reason.ok_or("no failure reason")?;
    assert!(reason.contains("kaboom"), "unexpected reason: {}", reason);

    worker.close().await?;
    Ok(())
}

#[tokio::test]
async fn processor_panicking_before_its_future_fails_the_job_only() -> Result<(), Box<dyn Error>> {
    let (_connection, queue) = common::memory_queue("demo").await?;
    let processor: Arc<dyn JobProcessor> = Arc::new(FnProcessor::new(|job: Job| -> HandlerFuture {
        if job.name == "explode" {
            panic!("rejected before start");
        }
        Box::pin(async move { Ok::<_, String>(JobResult::new(json!("fine"))) })
    }));
    let worker = start_worker(queue.clone(), processor, fast_config(1)).await?;

    queue.add("explode", payload_with_message("x"), JobOptions::default()).await?;
    queue.add("calm", payload_with_message("y"), JobOptions::default()).await?;

    let counts = wait_for_count(&queue, JobState::Completed, 1, WAIT).await?;
    assert_eq!(counts.get(JobState::Failed), 1);
    assert_eq!(counts.get(JobState::Completed), 1);
    assert_eq!(counts.get(JobState::Active), 0);

    let failed = queue.get_job(&JobId::new("1")).await?.ok_or("job 1 missing")?;
    let reason = failed.failed_reason.ok_or("no failure reason")?;
    assert!(reason.contains("rejected before start"), "unexpected reason: {}", reason);

    tokio::time::timeout(WAIT, worker.close()).await??;
    Ok(())
}

#[tokio::test]
async fn concurrency_cap_is_never_exceeded() -> Result<(), Box<dyn Error>> {
    let (_connection, queue) = common::memory_queue("demo").await?;
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let processor: Arc<dyn JobProcessor> = {
        let running = running.clone();
        let peak = peak.clone();
        Arc::new(FnProcessor::new(move |_job: Job| -> HandlerFuture {
            let running = running.clone();
            let peak = peak.clone();
            Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(JobResult::new(json!(null)))
            })
        }))
    };
    let worker = start_worker(queue.clone(), processor, fast_config(2)).await?;

    for i in 0..8 {
        queue
            .add("work", payload_with_message(&i.to_string()), JobOptions::default())
            .await?;
    }

    let mut max_active = 0;
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let counts = queue.counts().await?;
        max_active = max_active.max(counts.get(JobState::Active));
        if counts.get(JobState::Completed) == 8 || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(queue.counts().await?.get(JobState::Completed), 8);
    assert!(max_active <= 2, "saw {} active jobs", max_active);
    assert!(peak.load(Ordering::SeqCst) <= 2);

    worker.close().await?;
    Ok(())
}

#[tokio::test]
async fn close_waits_for_in_flight_jobs() -> Result<(), Box<dyn Error>> {
    let (_connection, queue) = common::memory_queue("demo").await?;
    let processor: Arc<dyn JobProcessor> = Arc::new(job_processor!(|_job| {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(JobResult::new(json!("slow")))
    }));
    let worker = start_worker(queue.clone(), processor, fast_config(1)).await?;

    queue.add("slow", payload_with_message("x"), JobOptions::default()).await?;
    wait_for_count(&queue, JobState::Active, 1, WAIT).await?;
    assert_eq!(worker.in_flight().await?, 1);

    worker.close().await?;

    let counts = queue.counts().await?;
    assert_eq!(counts.get(JobState::Completed), 1);
    assert_eq!(counts.get(JobState::Active), 0);
    Ok(())
}

#[tokio::test]
async fn closed_worker_leaves_new_jobs_waiting() -> Result<(), Box<dyn Error>> {
    let (_connection, queue) = common::memory_queue("demo").await?;
    let worker = start_worker(queue.clone(), echo_processor(), fast_config(2)).await?;
    worker.close().await?;

    queue.add("late", payload_with_message("x"), JobOptions::default()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.counts().await?.get(JobState::Waiting), 1);
    Ok(())
}

#[tokio::test]
async fn worker_stops_when_the_connection_closes() -> Result<(), Box<dyn Error>> {
    let (connection, queue) = common::memory_queue("demo").await?;
    let worker = start_worker(queue.clone(), echo_processor(), fast_config(1)).await?;

    connection.close().await;
    tokio::time::timeout(WAIT, worker.close()).await??;
    Ok(())
}
