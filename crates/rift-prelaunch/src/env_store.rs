//! Access to the RIFT.ware environment store.
//!
//! The runtime persists environment values as one file per key inside the
//! `env.d` directory of the versioned runtime root. Other processes pick them
//! up on start, so everything written here outlives the prelaunch run.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read environment entry {key:?} from {path:?}"))]
    ReadEntry {
        source: io::Error,
        key: String,
        path: PathBuf,
    },

    #[snafu(display("failed to create environment directory {path:?}"))]
    CreateDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("failed to write environment entry {key:?} to {path:?}"))]
    WriteEntry {
        source: io::Error,
        key: String,
        path: PathBuf,
    },

    #[snafu(display("failed to remove environment entry {key:?} at {path:?}"))]
    RemoveEntry {
        source: io::Error,
        key: String,
        path: PathBuf,
    },
}

/// A string key/value store for values shared with the rest of the runtime.
pub trait EnvStore {
    /// Returns the value stored for `key`. Missing and empty values are both
    /// reported as [`None`].
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`, returning whether it was present.
    fn remove(&self, key: &str) -> Result<bool>;
}

/// [`EnvStore`] backed by a directory with one file per key.
#[derive(Clone, Debug)]
pub struct FileEnvStore {
    directory: PathBuf,
}

impl FileEnvStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }
}

impl EnvStore for FileEnvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(value) => {
                let value = value.trim();
                Ok((!value.is_empty()).then(|| value.to_owned()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context(ReadEntrySnafu { key, path }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.directory).context(CreateDirectorySnafu {
            path: &self.directory,
        })?;

        let path = self.entry_path(key);
        fs::write(&path, value).context(WriteEntrySnafu { key, path: &path })?;
        tracing::debug!(key, path = %path.display(), "environment entry written");

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).context(RemoveEntrySnafu { key, path }),
        }
    }
}
