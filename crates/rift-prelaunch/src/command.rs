//! Running external programs.
//!
//! Everything prelaunch shells out to goes through [`CommandRunner`], so the
//! stages can be exercised with a scripted runner instead of real binaries.

use std::{io, process::Command};

use snafu::{OptionExt, ResultExt, Snafu, ensure};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("refusing to run an empty command"))]
    EmptyCommand,

    #[snafu(display("failed to spawn {program:?}"))]
    Spawn { source: io::Error, program: String },

    #[snafu(display("{command:?} exited with status {code}"))]
    NonZeroExit { command: String, code: i32 },

    #[snafu(display("{command:?} was terminated by a signal"))]
    Terminated { command: String },
}

/// Runs an argument list and reports the exit code, [`None`] meaning the
/// process did not exit normally.
pub trait CommandRunner {
    fn run(&self, argv: &[String]) -> Result<Option<i32>>;
}

/// [`CommandRunner`] spawning real processes and waiting for them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, argv: &[String]) -> Result<Option<i32>> {
        let (program, args) = argv.split_first().context(EmptyCommandSnafu)?;

        let status = Command::new(program)
            .args(args)
            .status()
            .context(SpawnSnafu { program })?;

        Ok(status.code())
    }
}

/// Splits a command line on whitespace. Quoting is not supported.
pub fn split_command_line(command_line: &str) -> Vec<String> {
    command_line.split_whitespace().map(str::to_owned).collect()
}

/// Runs `argv` and fails unless it exits with status 0.
pub fn run_checked(runner: &dyn CommandRunner, argv: &[String]) -> Result<()> {
    ensure!(!argv.is_empty(), EmptyCommandSnafu);
    let command = argv.join(" ");
    tracing::info!(%command, "running command");

    match runner.run(argv)? {
        Some(0) => {
            tracing::info!(%command, "command succeeded");
            Ok(())
        }
        Some(code) => NonZeroExitSnafu { command, code }.fail(),
        None => TerminatedSnafu { command }.fail(),
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::cell::RefCell;

    use super::*;

    /// [`CommandRunner`] returning a fixed exit code and recording every call.
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        pub exit_code: Option<i32>,
        pub calls: RefCell<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        pub fn exiting_with(code: i32) -> Self {
            Self {
                exit_code: Some(code),
                calls: RefCell::default(),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, argv: &[String]) -> Result<Option<i32>> {
            self.calls.borrow_mut().push(argv.to_vec());
            Ok(self.exit_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{scripted::ScriptedRunner, *};

    #[test]
    fn split_command_line_drops_extra_whitespace() {
        assert_eq!(
            split_command_line("  python3 /usr/bin/tool.py   --flag "),
            vec!["python3", "/usr/bin/tool.py", "--flag"]
        );
    }

    #[test]
    fn run_checked_succeeds_on_zero() {
        let runner = ScriptedRunner::exiting_with(0);
        let argv = split_command_line("true --now");

        run_checked(&runner, &argv).expect("command succeeds");
        assert_eq!(*runner.calls.borrow(), vec![argv]);
    }

    #[rstest]
    #[case(Some(1))]
    #[case(Some(-1))]
    #[case(None)]
    fn run_checked_fails_otherwise(#[case] exit_code: Option<i32>) {
        let runner = ScriptedRunner {
            exit_code,
            ..Default::default()
        };

        let err = run_checked(&runner, &split_command_line("false")).expect_err("command fails");
        assert!(matches!(
            err,
            Error::NonZeroExit { .. } | Error::Terminated { .. }
        ));
    }

    #[test]
    fn process_runner_rejects_empty_command() {
        let err = ProcessRunner.run(&[]).expect_err("empty command");
        assert!(matches!(err, Error::EmptyCommand));
    }

    #[test]
    fn process_runner_reports_exit_code() {
        let argv = ["sh", "-c", "exit 3"].map(str::to_owned);
        let code = ProcessRunner.run(&argv).expect("spawn sh");
        assert_eq!(code, Some(3));
    }
}
