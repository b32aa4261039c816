//! Command line arguments of the prelaunch binary.
//!
//! Every option can also be passed through the environment, which is how the
//! container image configures it.

use std::path::PathBuf;

use clap::{Args, Parser};
use http::Uri;

use crate::{
    command::split_command_line, env_store::FileEnvStore, rollback::DEFAULT_BACKUP_COMMAND,
    rvr::RvrLayout,
};

/// Name of the environment store directory inside the RVR.
pub const ENV_DIR_NAME: &str = "env.d";

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = "rift-prelaunch",
    version,
    about = "Prepares the RIFT.ware runtime and service discovery config before launch"
)]
pub struct PrelaunchArguments {
    /// The RIFT.ware release installed in this image, e.g. `8.4.0.0.12345`.
    #[arg(long, env = "RIFT_IMAGE_VERSION")]
    pub install_version: String,

    /// Externally visible address of the launchpad.
    ///
    /// Required unless the ingress proxy runs as a `LoadBalancer` service, in which
    /// case its load balancer IP is used when this is not set.
    #[arg(long, env = "RIFT_EXTERNAL_ADDRESS")]
    pub external_address: Option<String>,

    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    pub paths: PathOptions,

    #[command(flatten)]
    pub kubernetes: KubernetesOptions,

    #[command(flatten)]
    pub hooks: HookOptions,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Path Options")]
pub struct PathOptions {
    /// Directory the service discovery config files are written to.
    #[arg(long, env = "RIFT_PRELAUNCH_CONFIG_DIR", default_value = "/config")]
    pub config_dir: PathBuf,

    /// Directory holding the versioned runtime directories and the `rift` symlink.
    #[arg(long, env = "RIFT_PRELAUNCH_VAR_DIR", default_value = "/usr/rift/var")]
    pub var_dir: PathBuf,

    /// Directory of the environment store. Defaults to `env.d` inside the `rift`
    /// symlink of the var directory.
    #[arg(long, env = "RIFT_PRELAUNCH_ENV_DIR")]
    pub env_dir: Option<PathBuf>,
}

impl PathOptions {
    pub fn rvr_layout(&self) -> RvrLayout {
        RvrLayout::new(&self.var_dir)
    }

    pub fn env_store(&self) -> FileEnvStore {
        let directory = self
            .env_dir
            .clone()
            .unwrap_or_else(|| self.rvr_layout().rvr_path().join(ENV_DIR_NAME));
        FileEnvStore::new(directory)
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Kubernetes Options")]
pub struct KubernetesOptions {
    /// Base URL of the Kubernetes API server.
    #[arg(
        long,
        env = "RIFT_PRELAUNCH_API_SERVER",
        default_value = "https://kubernetes.default.svc"
    )]
    pub api_server: Uri,

    /// Verify the certificate of the API server.
    ///
    /// Off by default, the API server certificate of launchpad deployments is
    /// usually not issued for the in-cluster service name.
    #[arg(long, env = "RIFT_PRELAUNCH_VERIFY_API_SERVER_TLS")]
    pub verify_api_server_tls: bool,

    /// Directory the service account token and namespace are mounted at.
    #[arg(
        long,
        env = "RIFT_PRELAUNCH_SERVICE_ACCOUNT_DIR",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount"
    )]
    pub service_account_dir: PathBuf,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Hook Options")]
pub struct HookOptions {
    /// Command applying the Redis backup when rolling back to an older release.
    ///
    /// Split on whitespace, quoting is not supported.
    #[arg(long, env = "RIFT_PRELAUNCH_ROLLBACK_COMMAND", default_value = DEFAULT_BACKUP_COMMAND)]
    pub rollback_command: String,

    /// Command checking for pending imports. Failures are logged and ignored.
    #[arg(long, env = "RIFT_PRELAUNCH_IMPORT_CHECKER_COMMAND")]
    pub import_checker_command: Option<String>,

    /// Command marking the model data for upgrade. Failures abort the prelaunch.
    #[arg(long, env = "RIFT_PRELAUNCH_PRE_UPGRADE_COMMAND")]
    pub pre_upgrade_command: Option<String>,
}

impl HookOptions {
    pub fn rollback_argv(&self) -> Vec<String> {
        split_command_line(&self.rollback_command)
    }

    pub fn import_checker_argv(&self) -> Option<Vec<String>> {
        self.import_checker_command.as_deref().map(split_command_line)
    }

    pub fn pre_upgrade_argv(&self) -> Option<Vec<String>> {
        self.pre_upgrade_command.as_deref().map(split_command_line)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        PrelaunchArguments::command()
            .print_long_help()
            .expect("print help");
        PrelaunchArguments::command().debug_assert()
    }

    #[test]
    fn defaults() {
        let arguments =
            PrelaunchArguments::try_parse_from(["rift-prelaunch", "--install-version", "8.4.0.0.1"])
                .expect("valid arguments");

        assert_eq!(arguments.install_version, "8.4.0.0.1");
        assert_eq!(arguments.paths.config_dir, Path::new("/config"));
        assert_eq!(
            arguments.paths.env_store().directory(),
            Path::new("/usr/rift/var/rift/env.d")
        );
        assert_eq!(
            arguments.kubernetes.api_server,
            Uri::from_static("https://kubernetes.default.svc")
        );
        assert!(!arguments.kubernetes.verify_api_server_tls);
        assert_eq!(arguments.hooks.rollback_argv()[0], "python3");
        assert_eq!(arguments.hooks.import_checker_argv(), None);
    }

    #[test]
    fn env_dir_override() {
        let arguments = PrelaunchArguments::try_parse_from([
            "rift-prelaunch",
            "--install-version",
            "8.4.0.0.1",
            "--env-dir",
            "/tmp/env.d",
            "--pre-upgrade-command",
            "/usr/bin/pre-upgrade --mark",
        ])
        .expect("valid arguments");

        assert_eq!(arguments.paths.env_store().directory(), Path::new("/tmp/env.d"));
        assert_eq!(
            arguments.hooks.pre_upgrade_argv(),
            Some(vec!["/usr/bin/pre-upgrade".to_owned(), "--mark".to_owned()])
        );
    }
}
