//! Preparing the data stores for running an older release.

use snafu::{Report, ResultExt, Snafu};

use crate::{
    command::{self, CommandRunner},
    env_store::{self, EnvStore},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Environment store key telling the HA manager how this boot came about.
pub const BOOT_FLAG_KEY: &str = "RW_HA_BOOT_FLAG";
pub const ROLLBACK: &str = "ROLLBACK";
pub const ROLLBACK_FAIL: &str = "ROLLBACK_FAIL";

/// Default command restoring the Redis backup taken before the upgrade.
pub const DEFAULT_BACKUP_COMMAND: &str =
    "python3 /usr/rift/usr/bin/rw_redis_backup.py --disable_redis_sync --rollback-apply";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to apply the rollback backup"))]
    ApplyBackup { source: command::Error },

    #[snafu(display("failed to record the boot flag {value:?}"))]
    RecordBootFlag {
        source: env_store::Error,
        value: &'static str,
    },
}

/// Applies the backup through `runner` and records the outcome in the boot
/// flag. The flag is set to [`ROLLBACK_FAIL`] before any error is returned.
pub fn prepare_rollback(
    runner: &dyn CommandRunner,
    backup_command: &[String],
    store: &dyn EnvStore,
) -> Result<()> {
    tracing::info!("Preparing rollback");

    if let Err(source) = command::run_checked(runner, backup_command) {
        record_boot_flag(store, ROLLBACK_FAIL)?;
        return Err(source).context(ApplyBackupSnafu);
    }

    if let Err(error) = record_boot_flag(store, ROLLBACK) {
        if let Err(fail_error) = record_boot_flag(store, ROLLBACK_FAIL) {
            tracing::error!(
                error = %Report::from_error(fail_error),
                "failed to record the rollback failure"
            );
        }
        return Err(error);
    }
    tracing::info!("Rollback prepared");
    Ok(())
}

fn record_boot_flag(store: &dyn EnvStore, value: &'static str) -> Result<()> {
    store
        .set(BOOT_FLAG_KEY, value)
        .context(RecordBootFlagSnafu { value })
}

#[cfg(test)]
mod tests {
    use std::{io, path::PathBuf};

    use super::*;
    use crate::{
        command::{scripted::ScriptedRunner, split_command_line},
        env_store::memory::MemoryEnvStore,
    };

    /// Store refusing to persist one particular value.
    #[derive(Debug, Default)]
    struct RejectingStore {
        rejected_value: &'static str,
        inner: MemoryEnvStore,
    }

    impl EnvStore for RejectingStore {
        fn get(&self, key: &str) -> Result<Option<String>, env_store::Error> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), env_store::Error> {
            if value == self.rejected_value {
                return Err(env_store::Error::WriteEntry {
                    source: io::Error::other("read-only entry"),
                    key: key.to_owned(),
                    path: PathBuf::from(key),
                });
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<bool, env_store::Error> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn successful_backup_flags_rollback() {
        let runner = ScriptedRunner::exiting_with(0);
        let store = MemoryEnvStore::default();
        let backup_command = split_command_line(DEFAULT_BACKUP_COMMAND);

        prepare_rollback(&runner, &backup_command, &store).expect("rollback prepared");

        assert_eq!(store.value(BOOT_FLAG_KEY).as_deref(), Some(ROLLBACK));
        assert_eq!(*runner.calls.borrow(), vec![backup_command]);
    }

    #[test]
    fn failed_backup_flags_rollback_failure() {
        let runner = ScriptedRunner::exiting_with(2);
        let store = MemoryEnvStore::default();

        let err = prepare_rollback(&runner, &split_command_line(DEFAULT_BACKUP_COMMAND), &store)
            .expect_err("backup fails");

        assert!(matches!(
            err,
            Error::ApplyBackup {
                source: command::Error::NonZeroExit { code: 2, .. }
            }
        ));
        assert_eq!(store.value(BOOT_FLAG_KEY).as_deref(), Some(ROLLBACK_FAIL));
    }

    #[test]
    fn empty_backup_command_flags_rollback_failure() {
        let runner = ScriptedRunner::exiting_with(0);
        let store = MemoryEnvStore::default();

        prepare_rollback(&runner, &[], &store).expect_err("nothing to run");

        assert_eq!(store.value(BOOT_FLAG_KEY).as_deref(), Some(ROLLBACK_FAIL));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn unrecorded_rollback_flags_rollback_failure() {
        let runner = ScriptedRunner::exiting_with(0);
        let store = RejectingStore {
            rejected_value: ROLLBACK,
            ..Default::default()
        };

        let err = prepare_rollback(&runner, &split_command_line(DEFAULT_BACKUP_COMMAND), &store)
            .expect_err("boot flag not recorded");

        assert!(matches!(
            err,
            Error::RecordBootFlag {
                value: ROLLBACK,
                ..
            }
        ));
        assert_eq!(
            store.inner.value(BOOT_FLAG_KEY).as_deref(),
            Some(ROLLBACK_FAIL)
        );
    }
}
