//! Node + Playwright plumbing shared by the browser transport and the PNG renderer

use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Check if Playwright is installed
pub fn check_playwright_installed() -> HarnessResult<()> {
    let status = Command::new("npx")
        .args(["--no-install", "playwright", "--version"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(HarnessError::PlaywrightNotFound),
    }
}

/// Run a generated script with node inside `workdir` and return its stdout
pub fn run_script(script: &str, workdir: &Path) -> HarnessResult<String> {
    let script_path = workdir.join("apiscope.js");
    std::fs::write(&script_path, script)?;

    debug!("Running Playwright script: {}", script_path.display());

    let output = Command::new("node")
        .arg(&script_path)
        .current_dir(workdir)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        return Err(HarnessError::Playwright(format!(
            "Script failed:\nstdout: {}\nstderr: {}",
            stdout, stderr
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Quote a value as a JavaScript literal
pub fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> HarnessResult<String> {
    Ok(serde_json::to_string(value)?)
}
