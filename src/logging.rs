use eyre::{Result, eyre};
use log::LevelFilter;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Append to the given file, or to the default log file when `None`.
    File(Option<PathBuf>),
    Stderr,
}

/// Initialize the global logger. Level comes from `RUST_LOG`, default INFO.
pub fn init_logging(target: LogTarget) -> Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    let destination = match target {
        LogTarget::Stderr => {
            builder.target(env_logger::Target::Stderr);
            "stderr".to_string()
        }
        LogTarget::File(path) => {
            let log_path = match path {
                Some(path) => path,
                None => get_log_file_path()?,
            };
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = fs::OpenOptions::new().create(true).append(true).open(&log_path)?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            log_path.display().to_string()
        }
    };

    builder.try_init()?;

    log::info!("Logging initialized to: {}", destination);
    log::info!("Log level: {}", log_level);

    Ok(())
}

/// `<local data dir>/scanjob/logs/scanjob.log`
pub fn get_log_file_path() -> Result<PathBuf> {
    let log_dir = dirs::data_local_dir()
        .ok_or_else(|| eyre!("Could not find local data directory"))?
        .join("scanjob")
        .join("logs");

    Ok(log_dir.join("scanjob.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_generation() {
        if let Ok(path) = get_log_file_path() {
            assert!(path.to_string_lossy().contains("scanjob"));
            assert!(path.to_string_lossy().ends_with("scanjob.log"));
        }
    }
}
