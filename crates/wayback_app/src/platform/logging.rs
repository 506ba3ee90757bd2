//! Logger setup for the `wayback-mirror` binary.
//!
//! The terminal always gets the log; `--log-file` adds a copy on disk.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Installs the global logger. A log file that cannot be created is
/// reported on stderr and the session continues with terminal output only.
pub fn initialize(verbose: bool, log_file: Option<&Path>) {
    let level = engine_logging::level_for(verbose);
    let config = build_config();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => loggers.push(WriteLogger::new(level, config, file)),
            Err(err) => eprintln!("Warning: could not create log file at {}: {err}", path.display()),
        }
    }

    let _ = CombinedLogger::init(loggers);
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build()
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn log_file_parent_directories_are_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("mirror.log");
        open_log_file(&path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn bare_file_names_open_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.log");
        open_log_file(&path).unwrap();
        assert!(path.is_file());
    }
}
