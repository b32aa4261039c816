use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::ParseError,
    fmt::writer::MakeWriterExt as _,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Environment variable holding the log filter, its `_DIRECTORY` sibling
/// enables file output.
pub const LOG_ENV: &str = "RIFT_PRELAUNCH_LOG";
pub const APP_NAME: &str = "rift-prelaunch";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize default log level"))]
    DefaultFilter { source: ParseError },

    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    FileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Initializes `tracing` logging with the filter given in the `env`
/// environment variable, INFO if unset.
///
/// Log output is copied to a rotated file when `{env}_DIRECTORY` points to a
/// directory.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_env(env) {
        Ok(env_filter) => env_filter,
        _ => EnvFilter::try_new(tracing::Level::INFO.to_string()).context(DefaultFilterSnafu)?,
    };

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender = rolling_file_appender(file_appender_directory.as_deref(), app_name)?;

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout.and(file_appender));
    Registry::default()
        .with(filter)
        .with(fmt)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // need to delay logging until after tracing is initialized
    match file_appender_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}

/// Rotated log file inside `directory`, none without a directory.
fn rolling_file_appender(
    directory: Option<&Path>,
    app_name: &str,
) -> Result<Option<RollingFileAppender>, Error> {
    directory
        .map(|directory| {
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(directory)
                .context(FileAppenderSnafu { directory })
        })
        .transpose()
}
