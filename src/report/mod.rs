//! Rendering of batch results.
//!
//! Verdicts come back from the scheduler in input order; this module turns them
//! into a console summary, an optional JUnit XML file and an optional JSON dump,
//! and derives the process exit code.

pub mod junit;

use crate::task::{Outcome, Verdict};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Exit code when every task passed
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code when at least one task failed
pub const EXIT_TASKS_FAILED: u8 = 1;

/// Exit code for configuration or engine connection errors
pub const EXIT_SETUP_ERROR: u8 = 2;

/// Characters of container output shown for a failed task
pub const OUTPUT_EXCERPT_CHARS: usize = 80;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize verdicts: {0}")]
    Json(#[from] serde_json::Error),
}

/// Counts over one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub engine_errors: usize,
}

impl Summary {
    pub fn from_verdicts(verdicts: &[Verdict]) -> Self {
        let mut summary = Summary {
            total: verdicts.len(),
            ..Default::default()
        };

        for verdict in verdicts {
            if verdict.passed {
                summary.passed += 1;
                continue;
            }
            summary.failed += 1;
            match verdict.outcome {
                Outcome::TimedOut => summary.timed_out += 1,
                Outcome::EngineError => summary.engine_errors += 1,
                Outcome::Completed => {}
            }
        }

        summary
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code for this batch
    pub fn exit_code(&self) -> u8 {
        if self.all_passed() {
            EXIT_SUCCESS
        } else {
            EXIT_TASKS_FAILED
        }
    }
}

/// First [`OUTPUT_EXCERPT_CHARS`] characters of `output`
pub fn output_excerpt(output: &str) -> &str {
    match output.char_indices().nth(OUTPUT_EXCERPT_CHARS) {
        Some((end, _)) => &output[..end],
        None => output,
    }
}

/// One line per verdict followed by the summary
pub fn render_console(verdicts: &[Verdict], elapsed: Duration) -> String {
    let mut out = String::new();

    for verdict in verdicts {
        let status = if verdict.passed { "PASS" } else { "FAIL" };
        let exit = verdict
            .exit_code
            .map(|code| format!("exit {}", code))
            .unwrap_or_else(|| verdict.outcome.to_string());
        let _ = writeln!(
            out,
            "{} {} ({}): {}",
            status, verdict.task_name, exit, verdict.reason
        );

        if !verdict.passed && !verdict.raw_output.is_empty() {
            let _ = writeln!(
                out,
                "     container output: {:?}",
                output_excerpt(&verdict.raw_output)
            );
        }
    }

    let summary = Summary::from_verdicts(verdicts);
    let _ = writeln!(
        out,
        "\n{} tasks in {:.1}s: {} passed, {} failed ({} timed out, {} engine errors)",
        summary.total,
        elapsed.as_secs_f64(),
        summary.passed,
        summary.failed,
        summary.timed_out,
        summary.engine_errors
    );

    out
}

/// Write the verdicts as a pretty-printed JSON array
pub fn write_json(path: &Path, verdicts: &[Verdict]) -> Result<(), ReportError> {
    let content = serde_json::to_string_pretty(verdicts)?;
    fs::write(path, content)?;
    Ok(())
}
