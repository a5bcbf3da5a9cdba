//! Integration Test: Panic-Free Library
//!
//! **Policy**: Library code returns errors; a panicking worker is a failed
//! task, never a crashed batch. Production code in the core crate MUST NOT
//! call `unwrap()` or `expect()`, and MUST NOT print to stdout.
//! **Exceptions**: test modules, the `unwrap_or*` family

use std::path::Path;

use architectural_enforcement::{report, scan};

fn is_unchecked(_path: &Path, code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

fn is_print(_path: &Path, code: &str) -> bool {
    code.contains("println!(") || code.contains("print!(") || code.contains("dbg!(")
}

#[test]
fn test_no_unwrap_in_core() {
    let violations = scan("dispatcher/core/src", is_unchecked);
    report("unwrap()/expect() found in dispatcher core", &violations);
}

#[test]
fn test_no_unwrap_in_cli() {
    let violations = scan("dispatcher/cli/src", is_unchecked);
    report("unwrap()/expect() found in dispatch CLI", &violations);
}

#[test]
fn test_core_does_not_print() {
    let violations = scan("dispatcher/core/src", is_print);
    report("stdout output found in dispatcher core (use tracing)", &violations);
}

#[test]
fn test_fallbacks_are_allowed() {
    let path = Path::new("lib.rs");
    assert!(!is_unchecked(path, "x.unwrap_or_default()"));
    assert!(!is_unchecked(path, "x.unwrap_or(0)"));
    assert!(is_unchecked(path, "x.unwrap();"));
    assert!(is_print(path, "println!(\"{x}\");"));
    assert!(!is_print(path, "writeln!(f, \"{x}\")?;"));
}
