//! `svbridge check`: report whether the installation is usable.

use std::path::Path;

use svbridge_core::{BridgeMode, InstallationReport, check_installation};

use crate::error::CliError;

fn describe(label: &str, found: Option<&Path>) -> String {
    match found {
        Some(path) => format!("  {label:<10} ok       {}", path.display()),
        None => format!("  {label:<10} MISSING"),
    }
}

pub fn render(report: &InstallationReport) -> String {
    let mut lines = vec![
        format!("Mode: {:?}", report.mode),
        describe("wrapper", report.wrapper.as_deref()),
        describe("engine", report.engine.as_deref()),
    ];
    if report.mode == BridgeMode::Remote {
        lines.push(describe("helper", report.host.as_deref()));
    }
    lines.join("\n")
}

pub fn execute(addon_dir: &Path, mode: BridgeMode) -> Result<(), CliError> {
    let report = check_installation(addon_dir, mode);
    println!("{}", render(&report));
    if report.is_complete() {
        Ok(())
    } else {
        Err(CliError::Installation(report.missing()))
    }
}
