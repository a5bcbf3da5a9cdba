//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Dispatcher code waits on semaphores, deadlines and provider
//! I/O. It MUST NOT sleep to pace work or poll for state changes.
//! **Exceptions**: the simulated provider (its latency is the point), test code

use std::path::Path;

use architectural_enforcement::{report, scan};

/// Files allowed to call `tokio::time::sleep`
const SIMULATED_LATENCY: &[&str] = &["provider/simulated.rs"];

fn is_sleep(path: &Path, code: &str) -> bool {
    if code.contains("std::thread::sleep") || code.contains("thread::sleep(") {
        return true;
    }
    if code.contains("::sleep(") || code.contains(".sleep(") {
        return !SIMULATED_LATENCY.iter().any(|allowed| path.ends_with(allowed));
    }
    false
}

#[test]
fn test_no_sleep_in_core() {
    let violations = scan("dispatcher/core/src", is_sleep);
    report("Sleep calls found in dispatcher core", &violations);
}

#[test]
fn test_no_sleep_in_cli() {
    let violations = scan("dispatcher/cli/src", is_sleep);
    report("Sleep calls found in dispatch CLI", &violations);
}

#[test]
fn test_thread_sleep_is_never_allowed() {
    assert!(is_sleep(
        Path::new("dispatcher/core/src/provider/simulated.rs"),
        "std::thread::sleep(d);"
    ));
    assert!(!is_sleep(
        Path::new("dispatcher/core/src/provider/simulated.rs"),
        "tokio::time::sleep(self.latency).await;"
    ));
    assert!(is_sleep(
        Path::new("dispatcher/core/src/routing/dispatcher.rs"),
        "tokio::time::sleep(backoff).await;"
    ));
}
