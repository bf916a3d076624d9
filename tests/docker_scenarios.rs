//! Integration tests against a real container engine.
//!
//! Tests are skipped if Docker/Podman is not available or SKIP_CONTAINER_TESTS=1.

#![cfg(feature = "containers")]

use ctrun::container::{
    ContainerClient, ContainerClientConfig, ContainerOrchestrator, ContainerOrchestratorConfig,
    RuntimeType,
};
use ctrun::task::{Assertion, Outcome, Scheduler, SchedulerConfig, TaskDescriptor};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use test_tag::tag;

const IMAGE: &str = "alpine:latest";

/// Check if container tests should run.
fn should_run_container_tests() -> bool {
    // Skip if explicitly disabled
    if let Ok(value) = std::env::var("SKIP_CONTAINER_TESTS") {
        if value == "1" || value.eq_ignore_ascii_case("true") {
            return false;
        }
    }

    // Check if Docker or Podman is available
    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
        || std::process::Command::new("podman")
            .arg("info")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
}

async fn orchestrator() -> ContainerOrchestrator {
    let client = ContainerClient::with_config(ContainerClientConfig::default())
        .await
        .expect("Failed to connect to Docker/Podman");
    ContainerOrchestrator::with_client(client, ContainerOrchestratorConfig::default())
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval: Duration::from_millis(500),
        ..Default::default()
    }
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_container_client_connection() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (Docker/Podman not available or SKIP_CONTAINER_TESTS=1)");
        return;
    }

    let client = ContainerClient::with_config(ContainerClientConfig::default()).await;
    assert!(
        client.is_ok(),
        "Failed to connect to Docker/Podman: {:?}",
        client.err().map(|e| e.to_string())
    );

    let runtime = client
        .unwrap()
        .runtime_type()
        .await
        .expect("Failed to get runtime type");
    assert!(matches!(runtime, RuntimeType::Docker | RuntimeType::Podman));
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_echo_tail_and_regex_scenarios() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = Arc::new(orchestrator().await);
    let scheduler = Scheduler::new(engine, scheduler_config());

    let tasks = vec![
        TaskDescriptor::new("hello", IMAGE)
            .with_entrypoint(["/bin/echo"])
            .with_command(["hello"])
            .with_assertion(Assertion::StringContains("hello".to_string())),
        TaskDescriptor::new("tail_missing", IMAGE)
            .with_entrypoint(["/usr/bin/tail"])
            .with_command(["/no/such/file"])
            .with_assertion(Assertion::StringContains("goodbye".to_string())),
        TaskDescriptor::new("dave", IMAGE)
            .with_entrypoint(["/bin/echo"])
            .with_command(["Will you stop, Dave?"])
            .with_assertion(Assertion::RegexMatch("^Will.*Dave".to_string())),
    ];

    let verdicts = scheduler.run(tasks).await.expect("Batch should run");

    assert!(verdicts[0].passed, "hello failed: {}", verdicts[0].reason);
    assert!(!verdicts[1].passed);
    assert!(verdicts[1].reason.contains("goodbye"));
    assert!(verdicts[2].passed, "dave failed: {}", verdicts[2].reason);
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_timeout_kills_sleeping_container() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = Arc::new(orchestrator().await);
    let config = SchedulerConfig {
        global_timeout: Some(Duration::from_secs(5)),
        kill_on_timeout: true,
        stop_grace: Duration::from_secs(2),
        ..scheduler_config()
    };
    let scheduler = Scheduler::new(engine, config);

    let tasks = vec![
        TaskDescriptor::new("sleeper", IMAGE)
            .with_entrypoint(["/bin/sleep"])
            .with_command(["90"]),
        TaskDescriptor::new("fast", IMAGE)
            .with_entrypoint(["/bin/true"]),
    ];

    let started = std::time::Instant::now();
    let verdicts = scheduler.run(tasks).await.expect("Batch should run");

    assert_eq!(verdicts[0].outcome, Outcome::TimedOut);
    assert!(verdicts[1].passed, "fast failed: {}", verdicts[1].reason);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_start_failure_is_an_engine_error() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let engine = Arc::new(orchestrator().await);
    let scheduler = Scheduler::new(engine, scheduler_config());

    let tasks = vec![
        TaskDescriptor::new("missing_binary", IMAGE).with_entrypoint(["/no/such/binary"]),
    ];

    let verdicts = scheduler.run(tasks).await.expect("Batch should run");
    assert_eq!(verdicts[0].outcome, Outcome::EngineError);
    assert!(!verdicts[0].passed);
}
