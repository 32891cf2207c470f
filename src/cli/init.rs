//! libres init command implementation
//!
//! Writes a default `libres.toml`.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::{emit_success, OutputOptions, Summary};

#[derive(serde::Serialize)]
struct InitReport {
    config: PathBuf,
    created: bool,
    overwritten: bool,
}

pub fn run(path: &Path, force: bool, output: OutputOptions) -> Result<()> {
    let existed = ensure_writable(path)?;

    let write = !existed || force;
    if write {
        Config::default().save(path)?;
    }

    let report = InitReport {
        config: path.to_path_buf(),
        created: write && !existed,
        overwritten: write && existed,
    };

    let header = if write {
        "libres init: wrote default configuration".to_string()
    } else {
        "libres init: nothing to do".to_string()
    };

    let mut summary = Summary::new(header);
    summary.line("Config", path.display().to_string());
    if !write {
        summary.note("configuration already exists; pass --force to overwrite");
    }
    summary.suggest("libres demo");
    summary.suggest("libres shell");

    emit_success(output, "init", &report, Some(&summary))?;

    Ok(())
}

/// Returns whether a config file already exists at `path`
fn ensure_writable(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    if !path.is_file() {
        return Err(Error::OperationFailed(format!(
            "{} exists but is not a file",
            path.display()
        )));
    }
    Ok(true)
}
