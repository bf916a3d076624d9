//! Assertion evaluation against a finished container.
//!
//! [`evaluate`] is a pure function of its arguments: it knows nothing about the
//! scheduler, the engine or timing, and returns on the first failing assertion.

use crate::task::types::Assertion;
use regex::Regex;

/// Reason reported when every assertion holds
pub const PASSED_REASON: &str = "all assertions passed";

/// Reason reported for a task with no assertions
pub const NO_ASSERTIONS_REASON: &str = "no assertions; container ran to completion";

/// Evaluate `assertions` conjunctively against captured output and exit code.
///
/// Returns `(passed, reason)`; on failure the reason names the first failing
/// assertion and its expected value. An empty set passes.
pub fn evaluate(assertions: &[Assertion], output: &str, exit_code: i64) -> (bool, String) {
    if assertions.is_empty() {
        return (true, NO_ASSERTIONS_REASON.to_string());
    }

    for assertion in assertions {
        if let Err(why) = check(assertion, output, exit_code) {
            return (false, format!("{} failed: {}", assertion, why));
        }
    }

    (true, PASSED_REASON.to_string())
}

fn check(assertion: &Assertion, output: &str, exit_code: i64) -> Result<(), String> {
    match assertion {
        Assertion::StringContains(expected) => {
            if output.contains(expected.as_str()) {
                Ok(())
            } else {
                Err("text not found in output".to_string())
            }
        }
        Assertion::RegexMatch(pattern) => {
            let regex = Regex::new(pattern).map_err(|e| format!("invalid regex: {}", e))?;
            if regex.is_match(output) {
                Ok(())
            } else {
                Err("no match in output".to_string())
            }
        }
        Assertion::ExitCodeEquals(expected) => {
            if exit_code == *expected {
                Ok(())
            } else {
                Err(format!("exit code was {}", exit_code))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_assertions_pass() {
        let (passed, reason) = evaluate(&[], "", 1);
        assert!(passed);
        assert_eq!(reason, NO_ASSERTIONS_REASON);
    }

    #[test]
    fn test_string_contains_is_case_sensitive() {
        let assertions = vec![Assertion::StringContains("hello".to_string())];
        assert!(evaluate(&assertions, "hello\n", 0).0);
        assert!(!evaluate(&assertions, "HELLO\n", 0).0);
    }

    #[test]
    fn test_regex_matches_anywhere() {
        let assertions = vec![Assertion::RegexMatch("^Will.*Dave".to_string())];
        let (passed, _) = evaluate(&assertions, "Will you stop, Dave?\n", 0);
        assert!(passed);

        let assertions = vec![Assertion::RegexMatch("stop,\\s+Dave".to_string())];
        assert!(evaluate(&assertions, "Will you stop, Dave?", 0).0);
    }

    #[test]
    fn test_invalid_regex_fails_with_reason() {
        let assertions = vec![Assertion::RegexMatch("(unclosed".to_string())];
        let (passed, reason) = evaluate(&assertions, "(unclosed", 0);
        assert!(!passed);
        assert!(reason.contains("invalid regex"));
    }

    #[test]
    fn test_exit_code_equals() {
        let assertions = vec![Assertion::ExitCodeEquals(127)];
        assert!(evaluate(&assertions, "", 127).0);

        let (passed, reason) = evaluate(&assertions, "", 0);
        assert!(!passed);
        assert_eq!(reason, "exit-code-equals(127) failed: exit code was 0");
    }

    #[test]
    fn test_first_failure_is_reported() {
        let assertions = vec![
            Assertion::StringContains("goodbye".to_string()),
            Assertion::ExitCodeEquals(127),
        ];
        let (passed, reason) = evaluate(&assertions, "root:x:0:0:root:/root:/bin/bash", 127);
        assert!(!passed);
        assert!(reason.starts_with("string-contains(\"goodbye\")"));
    }

    #[test]
    fn test_all_must_hold() {
        let assertions = vec![
            Assertion::StringContains("ok".to_string()),
            Assertion::RegexMatch("[0-9]+ tests".to_string()),
            Assertion::ExitCodeEquals(0),
        ];
        let (passed, reason) = evaluate(&assertions, "ok: 12 tests", 0);
        assert!(passed);
        assert_eq!(reason, PASSED_REASON);

        assert!(!evaluate(&assertions, "ok: 12 tests", 2).0);
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let assertions = vec![
            Assertion::RegexMatch("a+b".to_string()),
            Assertion::ExitCodeEquals(3),
        ];
        let first = evaluate(&assertions, "xaab", 3);
        let second = evaluate(&assertions, "xaab", 3);
        assert_eq!(first, second);
    }
}
