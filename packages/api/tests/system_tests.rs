#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use actors::{DemoProcessor, FnProcessor, HandlerFuture, JobProcessor, job_processor};
use api::{
    EnqueueOptions, JobEvent, JobId, JobState, JobSystem, LifecycleState, QueueError, QueueStatus,
    Settings, ShutdownError, ShutdownOrchestrator, ShutdownOutcome, ShutdownTrigger,
};
use queue_core::{Job, JobResult};
use serde_json::json;

use common::{memory_settings, wait_for_count};

const WAIT: Duration = Duration::from_secs(5);

fn demo(settings: &Settings) -> Arc<dyn JobProcessor> {
    Arc::new(DemoProcessor::new(settings.demo_job_delay))
}

fn payload(value: serde_json::Value) -> Result<api::JobPayload, Box<dyn Error>> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err("payload must be an object".into()),
    }
}

#[tokio::test]
async fn no_broker_configured_disables_the_system() -> Result<(), Box<dyn Error>> {
    let settings = Settings::default();
    let system = JobSystem::start(settings.clone(), demo(&settings)).await?;
    let service = system.service();

    assert_eq!(system.state(), LifecycleState::Disabled);
    assert!(!service.is_enabled());
    assert_eq!(
        service.status(),
        QueueStatus {
            enabled: false,
            queue: None
        }
    );
    assert_eq!(serde_json::to_value(service.status())?, json!({ "enabled": false }));

    let stats = service.stats().await?;
    assert!(stats.is_empty());
    assert_eq!(serde_json::to_string(&stats)?, "{}");

    let result = service.enqueue("demo", payload(json!({ "a": 1 }))?).await;
    assert!(matches!(result, Err(QueueError::Unavailable)));
    assert!(matches!(service.subscribe().await, Err(QueueError::Unavailable)));
    assert!(matches!(
        service.get_job(&JobId::new("1")).await,
        Err(QueueError::Unavailable)
    ));

    assert_eq!(system.shutdown().await?, ShutdownOutcome::Disabled);
    assert_eq!(system.shutdown().await?, ShutdownOutcome::Disabled);
    assert_eq!(system.state(), LifecycleState::Disabled);
    Ok(())
}

#[tokio::test]
async fn demo_job_is_enqueued_and_completed() -> Result<(), Box<dyn Error>> {
    let settings = memory_settings();
    let system = JobSystem::start(settings.clone(), demo(&settings)).await?;
    let service = system.service();

    assert_eq!(system.state(), LifecycleState::Running);
    assert!(service.is_enabled());
    assert_eq!(
        serde_json::to_value(service.status())?,
        json!({ "enabled": true, "queue": "demo" })
    );

    let job = service
        .enqueue_value("demo", json!({ "hello": "world" }))
        .await?;
    assert_eq!(job.id, JobId::new("1"));

    let counts = wait_for_count(service, JobState::Completed, 1, WAIT).await?;
    assert_eq!(counts.get(JobState::Completed), 1);
    assert_eq!(counts.get(JobState::Failed), 0);
    assert_eq!(counts.get(JobState::Waiting), 0);

    // Nothing new was enqueued, so the snapshot does not move.
    assert_eq!(service.stats().await?, service.stats().await?);

    let stored = service.get_job(&job.id).await?.ok_or("job 1 missing")?;
    let return_value = stored.return_value.ok_or("no return value")?;
    assert_eq!(return_value["output"]["name"], "demo");
    assert_eq!(return_value["output"]["data"]["hello"], "world");
    assert!(return_value["completedAt"].is_string());

    assert_eq!(system.shutdown().await?, ShutdownOutcome::Closed);
    assert_eq!(system.state(), LifecycleState::Closed);
    Ok(())
}

#[tokio::test]
async fn without_inprocess_worker_jobs_stay_waiting() -> Result<(), Box<dyn Error>> {
    let settings = Settings {
        inprocess_worker: false,
        ..memory_settings()
    };
    let system = JobSystem::start(settings.clone(), demo(&settings)).await?;
    let service = system.service();
    assert!(service.is_enabled());

    service.enqueue("demo", payload(json!({ "n": 1 }))?).await?;
    service.enqueue("demo", payload(json!({ "n": 2 }))?).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let counts = service.stats().await?;
    assert_eq!(counts.get(JobState::Waiting), 2);
    assert_eq!(counts.get(JobState::Active), 0);
    assert_eq!(counts.get(JobState::Completed), 0);

    assert_eq!(system.shutdown().await?, ShutdownOutcome::Closed);
    Ok(())
}

#[tokio::test]
async fn non_object_payloads_are_rejected() -> Result<(), Box<dyn Error>> {
    let settings = Settings {
        inprocess_worker: false,
        ..memory_settings()
    };
    let system = JobSystem::start(settings.clone(), demo(&settings)).await?;

    let result = system.service().enqueue_value("demo", json!([1, 2, 3])).await;
    assert!(matches!(result, Err(QueueError::InvalidPayload(_))));
    assert!(system.service().stats().await?.get(JobState::Waiting) == 0);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn delayed_jobs_run_once_due() -> Result<(), Box<dyn Error>> {
    let settings = memory_settings();
    let system = JobSystem::start(settings.clone(), demo(&settings)).await?;
    let service = system.service();

    let options = EnqueueOptions {
        delay: Some(Duration::from_millis(300)),
    };
    service
        .enqueue_with("demo", payload(json!({ "later": true }))?, options)
        .await?;
    assert_eq!(service.stats().await?.get(JobState::Delayed), 1);

    let counts = wait_for_count(service, JobState::Completed, 1, WAIT).await?;
    assert_eq!(counts.get(JobState::Completed), 1);
    assert_eq!(counts.get(JobState::Delayed), 0);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn subscribers_receive_queue_events() -> Result<(), Box<dyn Error>> {
    let settings = memory_settings();
    let system = JobSystem::start(settings.clone(), demo(&settings)).await?;
    let mut events = system.service().subscribe().await?;

    let job = system
        .service()
        .enqueue_value("demo", json!({ "hello": "world" }))
        .await?;

    loop {
        let event = tokio::time::timeout(WAIT, events.recv()).await??;
        assert_eq!(event.job_id(), Some(&job.id));
        if matches!(event, JobEvent::Completed { .. }) {
            break;
        }
    }

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_jobs() -> Result<(), Box<dyn Error>> {
    let settings = memory_settings();
    let finished = Arc::new(AtomicUsize::new(0));
    let processor: Arc<dyn JobProcessor> = {
        let finished = finished.clone();
        Arc::new(FnProcessor::new(move |_job: Job| -> HandlerFuture {
            let finished = finished.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(JobResult::new(json!(null)))
            })
        }))
    };

    let system = JobSystem::start(settings.clone(), processor).await?;
    system.service().enqueue("demo", payload(json!({}))?).await?;
    wait_for_count(system.service(), JobState::Active, 1, WAIT).await?;

    let started = Instant::now();
    assert_eq!(system.shutdown().await?, ShutdownOutcome::Closed);
    assert!(started.elapsed() < settings.shutdown_timeout);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn hanging_job_times_out_the_shutdown() -> Result<(), Box<dyn Error>> {
    let settings = Settings {
        shutdown_timeout: Duration::from_millis(200),
        ..memory_settings()
    };
    let processor: Arc<dyn JobProcessor> =
        Arc::new(job_processor!(|_job| std::future::pending().await));

    let system = JobSystem::start(settings.clone(), processor).await?;
    system.service().enqueue("demo", payload(json!({}))?).await?;
    wait_for_count(system.service(), JobState::Active, 1, WAIT).await?;

    let result = system.shutdown().await;
    assert!(matches!(
        result,
        Err(ShutdownError::TimedOut(timeout)) if timeout == Duration::from_millis(200)
    ));
    assert_eq!(system.state(), LifecycleState::Closed);

    // The connection was force-closed.
    assert!(matches!(
        system.service().stats().await,
        Err(QueueError::Broker(_))
    ));
    Ok(())
}

#[tokio::test]
async fn shutdown_runs_once() -> Result<(), Box<dyn Error>> {
    let settings = memory_settings();
    let system = JobSystem::start(settings.clone(), demo(&settings)).await?;

    assert_eq!(system.shutdown().await?, ShutdownOutcome::Closed);
    assert_eq!(system.shutdown().await?, ShutdownOutcome::AlreadyShutdown);
    assert_eq!(system.state(), LifecycleState::Closed);
    Ok(())
}

#[tokio::test]
async fn orchestrator_handles_the_first_trigger_only() -> Result<(), Box<dyn Error>> {
    let settings = memory_settings();
    let system = Arc::new(JobSystem::start(settings.clone(), demo(&settings)).await?);
    let mut state = system.watch_state();

    let orchestrator = ShutdownOrchestrator::new(system.clone());
    let handle = orchestrator.trigger_handle();
    assert!(handle.trigger(ShutdownTrigger::Signal("SIGTERM")));
    assert!(handle.teardown());

    let outcome = tokio::time::timeout(WAIT, orchestrator.run()).await??;
    assert_eq!(outcome, ShutdownOutcome::Closed);

    state.wait_for(|s| *s == LifecycleState::Closed).await?;
    assert_eq!(system.shutdown().await?, ShutdownOutcome::AlreadyShutdown);
    Ok(())
}

#[tokio::test]
async fn dropping_every_trigger_handle_tears_down() -> Result<(), Box<dyn Error>> {
    let settings = memory_settings();
    let system = Arc::new(JobSystem::start(settings.clone(), demo(&settings)).await?);

    let orchestrator = ShutdownOrchestrator::new(system.clone());
    let outcome = tokio::time::timeout(WAIT, orchestrator.run()).await??;

    assert_eq!(outcome, ShutdownOutcome::Closed);
    assert!(system.state().is_stopping());
    Ok(())
}

#[tokio::test]
async fn timed_out_shutdown_exits_non_zero() -> Result<(), Box<dyn Error>> {
    let settings = Settings {
        shutdown_timeout: Duration::from_millis(200),
        ..memory_settings()
    };
    let processor: Arc<dyn JobProcessor> =
        Arc::new(job_processor!(|_job| std::future::pending().await));
    let system = Arc::new(JobSystem::start(settings.clone(), processor).await?);
    system.service().enqueue("demo", payload(json!({}))?).await?;
    wait_for_count(system.service(), JobState::Active, 1, WAIT).await?;

    // A caller stuck on the service does not hold the decision back.
    let service = system.service().clone();
    let stuck_request = tokio::spawn(async move {
        let _service = service;
        std::future::pending::<()>().await
    });

    let orchestrator = ShutdownOrchestrator::new(system.clone());
    orchestrator.trigger_handle().teardown();
    let started = Instant::now();
    let result = tokio::time::timeout(WAIT, orchestrator.run()).await?;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(result, Err(ShutdownError::TimedOut(_))));
    assert_eq!(api::exit_code(&result), 1);
    assert!(!stuck_request.is_finished());
    stuck_request.abort();
    Ok(())
}

#[tokio::test]
async fn completed_shutdown_exits_zero() -> Result<(), Box<dyn Error>> {
    let settings = memory_settings();
    let system = JobSystem::start(settings.clone(), demo(&settings)).await?;
    assert_eq!(api::exit_code(&system.shutdown().await), 0);

    let disabled = JobSystem::start(Settings::default(), demo(&settings)).await?;
    assert_eq!(api::exit_code(&disabled.shutdown().await), 0);
    Ok(())
}
