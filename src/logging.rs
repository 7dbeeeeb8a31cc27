//! Log file setup
//!
//! The terminal is owned by the UI, so tracing output goes to a file:
//! `~/.cache/pricedash/pricedash.log` on Linux unless `--log-file` is given.
//! The level comes from `RUST_LOG` and defaults to `info`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use tracing_subscriber::EnvFilter;

/// File name of the log inside the cache directory
const LOG_FILE_NAME: &str = "pricedash.log";

/// Returns the default log path in the XDG cache directory
///
/// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
pub fn default_log_path() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "pricedash")?;
    Some(project_dirs.cache_dir().join(LOG_FILE_NAME))
}

/// Opens `path` for appending, creating parent directories as needed
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global tracing subscriber writing to `path`
///
/// Returns the path actually used, or `None` when no location is available
/// and logging stays disabled.
pub fn init(path: Option<PathBuf>) -> io::Result<Option<PathBuf>> {
    let Some(path) = path.or_else(default_log_path) else {
        return Ok(None);
    };
    let file = open_log_file(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok();

    Ok(installed.then_some(path))
}
