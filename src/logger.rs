//! Logger initialisation for the planner binaries

use log::{info, LevelFilter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(#[from] log::SetLoggerError),
}

/// Initialise the logger, writing to stdout.
///
/// Must only be called once per process.
pub fn logger_init(min_level: LevelFilter) -> Result<(), LoggerInitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            // include the target for debug and trace output
            if record.level() > log::Level::Info {
                out.finish(format_args!(
                    "[{}] {}: {}",
                    level_to_str(record.level()),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!("[{}] {}", level_to_str(record.level()), message))
            }
        })
        .level(min_level)
        .chain(std::io::stdout())
        .apply()?;

    info!("Logging initialised, level {:?}", min_level);
    Ok(())
}

fn level_to_str(level: log::Level) -> &'static str {
    match level {
        log::Level::Trace => "TRC",
        log::Level::Debug => "DBG",
        log::Level::Info => "INF",
        log::Level::Warn => "WRN",
        log::Level::Error => "ERR",
    }
}
