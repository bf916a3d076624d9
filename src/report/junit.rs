//! JUnit XML report.
//!
//! One `<testsuite>` per run with a `<testcase name="test_<task>">` per verdict.
//! Assertion failures and timeouts are `<failure>` elements, engine errors are
//! `<error>` elements, so CI systems tell broken infrastructure from broken tests.

use crate::env;
use crate::report::{ReportError, Summary};
use crate::task::{Outcome, Verdict};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Render the verdicts of one run as a JUnit XML document
pub fn render(verdicts: &[Verdict], elapsed: Duration) -> Result<String, ReportError> {
    let summary = Summary::from_verdicts(verdicts);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let failures = (summary.failed - summary.engine_errors).to_string();
    writer
        .create_element("testsuite")
        .with_attribute(("name", env::defaults::SUITE_NAME))
        .with_attribute(("tests", summary.total.to_string().as_str()))
        .with_attribute(("failures", failures.as_str()))
        .with_attribute(("errors", summary.engine_errors.to_string().as_str()))
        .with_attribute(("time", seconds(elapsed).as_str()))
        .write_inner_content(|writer| {
            for verdict in verdicts {
                write_testcase(writer, verdict)?;
            }
            Ok(())
        })?;

    let bytes = writer.into_inner();
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
}

/// Render and write the report to `path`
pub fn write(path: &Path, verdicts: &[Verdict], elapsed: Duration) -> Result<(), ReportError> {
    let document = render(verdicts, elapsed)?;
    fs::write(path, document)?;
    Ok(())
}

fn write_testcase(writer: &mut Writer<Vec<u8>>, verdict: &Verdict) -> io::Result<()> {
    let name = format!("test_{}", verdict.task_name);
    let time = seconds(verdict.duration.unwrap_or_default());
    let testcase = writer
        .create_element("testcase")
        .with_attribute(("classname", env::defaults::SUITE_NAME))
        .with_attribute(("name", name.as_str()))
        .with_attribute(("time", time.as_str()));

    let output = sanitize(&verdict.raw_output);

    if verdict.passed {
        if output.is_empty() {
            testcase.write_empty()?;
        } else {
            testcase.write_inner_content(|writer| {
                writer
                    .create_element("system-out")
                    .write_text_content(BytesText::new(&output))?;
                Ok(())
            })?;
        }
        return Ok(());
    }

    let (element, kind) = match verdict.outcome {
        Outcome::EngineError => ("error", "engine_error"),
        Outcome::TimedOut => ("failure", "timeout"),
        Outcome::Completed => ("failure", "assertion"),
    };
    let message = sanitize(&verdict.reason);

    testcase.write_inner_content(|writer| {
        let detail = writer
            .create_element(element)
            .with_attribute(("message", message.as_str()))
            .with_attribute(("type", kind));
        if output.is_empty() {
            detail.write_empty()?;
        } else {
            detail.write_text_content(BytesText::new(&output))?;
        }
        Ok(())
    })?;

    Ok(())
}

fn seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// Replace characters XML 1.0 cannot carry (terminal escapes, NULs)
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\t' | '\n' | '\r' => c,
            c if c < ' ' => '\u{FFFD}',
            c => c,
        })
        .collect()
}
