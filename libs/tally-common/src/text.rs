//! Text helpers applied to captured test output and failure messages.
//!
//! **Normalization Rules:**
//! - `normalize_line_endings` folds `\r\n` into `\n`
//! - `unexpected_failure_message` names a test that stopped without a verdict

pub fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n")
}

/// Failure message for a test that never reported how it ended
pub fn unexpected_failure_message(test: &str) -> String {
    format!("Test case {} failed unexpectedly.", test)
}
