//! Selftest command implementation.

use super::{CliError, CliResult};
use crate::Format;
use cipherlite_testkit::FunctionalSuite;

/// Runs the functional suite in a scratch directory and prints its report.
pub fn run(format: Format) -> CliResult<()> {
    let dir = tempfile::tempdir()?;
    let report = FunctionalSuite::new(dir.path()).run();
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => println!("{report}"),
    }
    if report.passed() {
        Ok(())
    } else {
        Err(CliError::Failed(format!(
            "{} errors from {} tests",
            report.errors(),
            report.tests()
        )))
    }
}
