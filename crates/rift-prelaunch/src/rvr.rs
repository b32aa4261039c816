//! Management of the versioned runtime root (RVR).
//!
//! Every installed release keeps its runtime data in `<var>/rift-<version>`.
//! The `<var>/rift` symlink selects the directory of the running release. On
//! start we compare the release the link pointed to with the release being
//! installed, carry state forward on upgrades, flag rollbacks and finally
//! repoint the link.

use std::{
    cmp::Ordering,
    fs::{self, DirBuilder},
    io,
    os::unix::fs::{DirBuilderExt, symlink},
    path::{Path, PathBuf},
};

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use walkdir::WalkDir;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Name of the symlink pointing at the current versioned directory.
pub const RVR_LINK_NAME: &str = "rift";

/// Prefix of every versioned directory, followed by the version.
pub const VERSIONED_DIR_PREFIX: &str = "rift-";

/// Directory left behind by 8.2 installations that were prepared for the
/// upgrade to 8.3. It already contains the migrated state.
const LEGACY_UPGRADE_DIR: &str = "rvr-8.3-up";

/// State directories carried over into the new versioned directory on
/// upgrades, relative to the RVR.
pub const MIGRATED_DIRECTORIES: [&str; 10] = [
    "persist.riftware",
    "launchpad",
    "env.d",
    "ha_client",
    "lpmon_client",
    "glance",
    "rw.ui",
    "mongo_cert",
    "version",
    "log/cfgmgr",
];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to rename legacy upgrade directory {from:?} to {to:?}"))]
    RenameLegacyDirectory {
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    #[snafu(display("failed to create versioned directory {path:?}"))]
    CreateVersionedDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("failed to inspect RVR path {path:?}"))]
    InspectRvr { source: io::Error, path: PathBuf },

    #[snafu(display("failed to remove {path:?}, which is not a symbolic link"))]
    RemoveStaleRvr { source: io::Error, path: PathBuf },

    #[snafu(display("RVR path {path:?} is a directory, not a symbolic link"))]
    RvrNotSymlink { path: PathBuf },

    #[snafu(display("RVR inconsistency detected, target of symbolic link {path:?} does not exist"))]
    DanglingRvrLink { source: io::Error, path: PathBuf },

    #[snafu(display("invalid RVR path format: {target:?}"))]
    UnrecognizedRvrTarget { target: PathBuf },

    #[snafu(display("failed to remove existing directory {path:?}"))]
    RemoveMigratedDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("failed to walk directory {path:?}"))]
    WalkDirectory {
        source: walkdir::Error,
        path: PathBuf,
    },

    #[snafu(display("directory entry {entry:?} is outside of {path:?}"))]
    ForeignEntry { entry: PathBuf, path: PathBuf },

    #[snafu(display("failed to create directory {path:?}"))]
    CreateDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("failed to copy {from:?} to {to:?}"))]
    CopyFile {
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    #[snafu(display("failed to remove RVR symbolic link {path:?}"))]
    UnlinkRvr { source: io::Error, path: PathBuf },

    #[snafu(display("failed to link {path:?} to {target:?}"))]
    CreateRvrLink {
        source: io::Error,
        path: PathBuf,
        target: PathBuf,
    },
}

/// Location of the versioned runtime directories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RvrLayout {
    var_dir: PathBuf,
}

impl RvrLayout {
    pub fn new(var_dir: impl Into<PathBuf>) -> Self {
        Self {
            var_dir: var_dir.into(),
        }
    }

    /// The symlink selecting the current versioned directory.
    pub fn rvr_path(&self) -> PathBuf {
        self.var_dir.join(RVR_LINK_NAME)
    }

    pub fn versioned_dir(&self, version: &str) -> PathBuf {
        self.var_dir.join(format!("{VERSIONED_DIR_PREFIX}{version}"))
    }

    fn legacy_upgrade_dir(&self) -> PathBuf {
        self.var_dir.join(LEGACY_UPGRADE_DIR)
    }
}

/// What happened to the RVR while preparing it for the installed release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RvrTransition {
    /// There was no previous versioned directory.
    Fresh,

    /// The previous release is the installed one, or the versions could not
    /// be compared.
    SameVersion { previous: String },

    /// State of the older, previous release was copied forward.
    Upgrade { previous: String },

    /// The previous release is newer than the installed one.
    Rollback { previous: String },
}

impl RvrTransition {
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

/// Points the RVR at the versioned directory of `install_version`, migrating
/// state from the previous release on upgrades.
pub fn prepare_rvr(layout: &RvrLayout, install_version: &str) -> Result<RvrTransition> {
    let versioned_dir = layout.versioned_dir(install_version);

    let legacy_dir = layout.legacy_upgrade_dir();
    if legacy_dir.exists() {
        tracing::info!(
            from = %legacy_dir.display(),
            to = %versioned_dir.display(),
            "Adopting legacy upgrade directory"
        );
        fs::rename(&legacy_dir, &versioned_dir).context(RenameLegacyDirectorySnafu {
            from: &legacy_dir,
            to: &versioned_dir,
        })?;
    }

    if !versioned_dir.exists() {
        tracing::info!(path = %versioned_dir.display(), "Versioned directory does not exist, creating it");
        DirBuilder::new()
            .recursive(true)
            .mode(0o777)
            .create(&versioned_dir)
            .context(CreateVersionedDirectorySnafu {
                path: &versioned_dir,
            })?;
    }

    let rvr_path = layout.rvr_path();
    let transition = match previous_version(&rvr_path)? {
        None => RvrTransition::Fresh,
        Some(previous) => match rift_version::compare_lenient(&previous, install_version) {
            Ordering::Less => {
                tracing::info!(%previous, new = install_version, "New install version detected");
                copy_from_previous(&rvr_path, &versioned_dir)?;
                RvrTransition::Upgrade { previous }
            }
            Ordering::Greater => {
                tracing::info!(%previous, new = install_version, "Rollback detected");
                RvrTransition::Rollback { previous }
            }
            Ordering::Equal => RvrTransition::SameVersion { previous },
        },
    };

    relink(&rvr_path, &versioned_dir)?;

    Ok(transition)
}

/// Returns the version the RVR symlink currently points at, or [`None`] if
/// there is no symlink. A plain file at the RVR path is removed, a directory
/// is left alone and reported as an error.
fn previous_version(rvr_path: &Path) -> Result<Option<String>> {
    let metadata = match fs::symlink_metadata(rvr_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context(InspectRvrSnafu { path: rvr_path }),
    };

    ensure!(!metadata.is_dir(), RvrNotSymlinkSnafu { path: rvr_path });
    if !metadata.file_type().is_symlink() {
        tracing::warn!(path = %rvr_path.display(), "RVR path is not a symbolic link, removing it");
        fs::remove_file(rvr_path).context(RemoveStaleRvrSnafu { path: rvr_path })?;
        return Ok(None);
    }

    let target = fs::canonicalize(rvr_path).context(DanglingRvrLinkSnafu { path: rvr_path })?;
    let version = target
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| {
            name.find(VERSIONED_DIR_PREFIX)
                .map(|pos| &name[pos + VERSIONED_DIR_PREFIX.len()..])
        })
        .context(UnrecognizedRvrTargetSnafu { target: &target })?;

    Ok(Some(version.to_owned()))
}

/// Copies [`MIGRATED_DIRECTORIES`] from the RVR into `new_versioned_dir`,
/// replacing anything already there.
fn copy_from_previous(rvr_path: &Path, new_versioned_dir: &Path) -> Result<()> {
    for directory in MIGRATED_DIRECTORIES {
        let destination = new_versioned_dir.join(directory);
        if destination.is_dir() {
            fs::remove_dir_all(&destination).context(RemoveMigratedDirectorySnafu {
                path: &destination,
            })?;
        } else if destination.exists() {
            fs::remove_file(&destination).context(RemoveMigratedDirectorySnafu {
                path: &destination,
            })?;
        }

        let source = rvr_path.join(directory);
        if !source.exists() {
            tracing::debug!(directory, "Directory missing in previous version, skipping");
            continue;
        }

        tracing::info!(directory, "Starting copy of directory");
        copy_tree(&source, &destination)?;
        tracing::info!(directory, "Copy of directory finished");
    }

    Ok(())
}

/// Recursively copies `source` to `destination`, following symbolic links.
fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.context(WalkDirectorySnafu { path: source })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .ok()
            .context(ForeignEntrySnafu {
                entry: entry.path(),
                path: source,
            })?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).context(CreateDirectorySnafu { path: &target })?;
        } else {
            fs::copy(entry.path(), &target).context(CopyFileSnafu {
                from: entry.path(),
                to: &target,
            })?;
        }
    }

    Ok(())
}

/// Replaces whatever is at `rvr_path` with a relative symlink to
/// `versioned_dir`.
fn relink(rvr_path: &Path, versioned_dir: &Path) -> Result<()> {
    if fs::symlink_metadata(rvr_path).is_ok() {
        tracing::info!(path = %rvr_path.display(), "RVR path exists, recreating it");
        fs::remove_file(rvr_path).context(UnlinkRvrSnafu { path: rvr_path })?;
    }

    let target = versioned_dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| versioned_dir.to_path_buf());
    symlink(&target, rvr_path).context(CreateRvrLinkSnafu {
        path: rvr_path,
        target: &target,
    })?;
    tracing::info!(path = %rvr_path.display(), target = %target.display(), "RVR linked");

    Ok(())
}
