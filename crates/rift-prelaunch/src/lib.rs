//! Boot-time provisioning of RIFT.ware launchpad containers.
//!
//! Runs once per container start before the launchpad processes come up:
//!
//! - [`rvr`] points the `rift` symlink at the versioned runtime directory of
//!   the installed release and carries state forward on upgrades.
//! - [`rollback`] restores the data stores when an older release boots.
//! - [`discovery`], [`access`] and [`config_files`] turn the Kubernetes
//!   services of the namespace into flat config files.
//!
//! [`prelaunch`] runs these as ordered stages.

pub mod access;
pub mod cli;
pub mod command;
pub mod config_files;
pub mod discovery;
pub mod env_store;
pub mod logging;
pub mod prelaunch;
pub mod rollback;
pub mod rvr;
