//! End-to-end batches through configuration loading, the scheduler and the
//! reports, against the in-memory engine.

use ctrun::cli::RunnerConfig;
use ctrun::report::{self, Summary};
use ctrun::task::{MockEngine, MockScript, Outcome, Scheduler, TIMEOUT_REASON};
use std::sync::Arc;
use std::time::Duration;

const SUITE: &str = r#"
image = "alpine:latest"
timeout_secs = 60
kill_on_timeout = true

[[tasks]]
name = "hello"
entrypoint = "/bin/echo"
command = "hello"
assertions = [{ string-contains = "hello" }]

[[tasks]]
name = "tail_passwd"
entrypoint = "/usr/bin/tail"
command = "/etc/passwd"
assertions = [{ string-contains = "goodbye" }, { exit-code-equals = 127 }]

[[tasks]]
name = "sleeper"
entrypoint = "/bin/sleep"
command = "90"

[[tasks]]
name = "dave"
entrypoint = "/bin/echo"
command = "'Will you stop, Dave?'"
assertions = [{ regex-match = "^Will.*Dave" }]
"#;

fn suite_engine() -> MockEngine {
    MockEngine::new()
        .with_script(
            "hello",
            MockScript::exits(0, "hello\n").running_for(Duration::from_secs(1)),
        )
        .with_script(
            "tail_passwd",
            MockScript::exits(127, "root:x:0:0:root:/root:/bin/bash\n")
                .running_for(Duration::from_secs(2)),
        )
        .with_script(
            "sleeper",
            MockScript::exits(0, "").running_for(Duration::from_secs(90)),
        )
        .with_script(
            "dave",
            MockScript::exits(0, "Will you stop, Dave?\n").running_for(Duration::from_secs(1)),
        )
}

#[tokio::test(start_paused = true)]
async fn test_suite_verdicts() {
    let config: RunnerConfig = toml::from_str(SUITE).unwrap();
    config.validate().unwrap();

    let engine = Arc::new(suite_engine());
    let scheduler = Scheduler::new(engine.clone(), config.scheduler_config());

    let verdicts = scheduler.run(config.resolve_tasks().unwrap()).await.unwrap();

    let names: Vec<&str> = verdicts.iter().map(|v| v.task_name.as_str()).collect();
    assert_eq!(names, vec!["hello", "tail_passwd", "sleeper", "dave"]);

    assert!(verdicts[0].passed);

    assert!(!verdicts[1].passed);
    assert!(verdicts[1].reason.contains("string-contains(\"goodbye\")"));

    assert!(!verdicts[2].passed);
    assert_eq!(verdicts[2].outcome, Outcome::TimedOut);
    assert_eq!(verdicts[2].reason, TIMEOUT_REASON);

    assert!(verdicts[3].passed, "{}", verdicts[3].reason);

    assert_eq!(engine.stopped(), vec!["sleeper".to_string()]);
    assert!(engine.max_concurrent() <= 3);

    let summary = Summary::from_verdicts(&verdicts);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.exit_code(), report::EXIT_TASKS_FAILED);
}

#[tokio::test(start_paused = true)]
async fn test_suite_reports() {
    let config: RunnerConfig = toml::from_str(SUITE).unwrap();
    let scheduler = Scheduler::new(Arc::new(suite_engine()), config.scheduler_config());
    let verdicts = scheduler.run(config.resolve_tasks().unwrap()).await.unwrap();

    let console = report::render_console(&verdicts, Duration::from_secs(60));
    assert!(console.contains("PASS hello (exit 0)"));
    assert!(console.contains("FAIL tail_passwd (exit 127)"));
    assert!(console.contains("FAIL sleeper (timed out): task timed out"));

    let temp_dir = tempfile::TempDir::new().unwrap();
    let junit_path = temp_dir.path().join("junit.xml");
    report::junit::write(&junit_path, &verdicts, Duration::from_secs(60)).unwrap();

    let xml = std::fs::read_to_string(&junit_path).unwrap();
    assert!(xml.contains(r#"tests="4" failures="2" errors="0""#));
    assert!(xml.contains(r#"name="test_sleeper""#));
    assert!(xml.contains(r#"type="timeout""#));
}

#[tokio::test(start_paused = true)]
async fn test_serial_suite_without_timeout() {
    let mut config: RunnerConfig = toml::from_str(SUITE).unwrap();
    config.max_running_tasks = 1;
    config.timeout_secs = None;

    let engine = Arc::new(suite_engine());
    let scheduler = Scheduler::new(engine.clone(), config.scheduler_config());
    let verdicts = scheduler.run(config.resolve_tasks().unwrap()).await.unwrap();

    // Without a deadline the sleeper runs to completion and passes
    assert!(verdicts[2].passed);
    assert_eq!(verdicts[2].outcome, Outcome::Completed);
    assert_eq!(engine.max_concurrent(), 1);
    assert!(engine.stopped().is_empty());
    assert_eq!(engine.remaining_containers(), 0);
}
