use std::process::ExitCode;

use clap::Parser;
use rift_prelaunch::{
    cli::PrelaunchArguments,
    command::ProcessRunner,
    logging::{self, APP_NAME, LOG_ENV},
    prelaunch::{self, Prelaunch},
};
use snafu::{Report, ResultExt, Snafu};

/// Exit status of a failed run.
const FAILURE_EXIT_CODE: u8 = 255;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("prelaunch failed"))]
    Prelaunch { source: prelaunch::Error },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let arguments = PrelaunchArguments::parse();

    match run(&arguments).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error @ Error::InitializeLogging { .. }) => {
            eprintln!("{}", Report::from_error(error));
            ExitCode::from(FAILURE_EXIT_CODE)
        }
        Err(error) => {
            tracing::error!(error = %Report::from_error(error), "Prelaunch script failed");
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}

async fn run(arguments: &PrelaunchArguments) -> Result<(), Error> {
    logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;

    let store = arguments.paths.env_store();
    Prelaunch {
        arguments,
        store: &store,
        runner: &ProcessRunner,
    }
    .run()
    .await
    .context(PrelaunchSnafu)
}
