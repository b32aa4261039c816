//! The ordered boot stages.
//!
//! Stages run top to bottom. Each owns its failure boundary: fatal stages
//! return an [`Error`], the others log and let the boot continue.

use std::{fs, io, path::PathBuf};

use snafu::{Report, ResultExt, Snafu};

use crate::{
    access::{self, ExternalAccess, ResolvedAddress},
    cli::PrelaunchArguments,
    command::{self, CommandRunner},
    config_files::{self, ConfigDirectory},
    discovery::{self, ServiceAccount, ServiceRegistry, client},
    env_store::EnvStore,
    rollback,
    rvr::{self, RvrLayout, RvrTransition},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Environment store key left behind by an interrupted upgrade rollback.
pub const UPGRADE_ROLLBACK_KEY: &str = "RW_NODE_UPGRADE_ROLLBACK";

/// Directories the runtime expects inside the RVR before it starts.
pub const REQUIRED_RVR_DIRECTORIES: [&str; 5] = [
    "log/rwlogd",
    "env.d",
    "log/cfgmgr",
    "cfgmgr/tmp",
    "persist.riftware",
];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to prepare the RVR"))]
    PrepareRvr { source: rvr::Error },

    #[snafu(display("failed to prepare the rollback"))]
    PrepareRollback { source: rollback::Error },

    #[snafu(display("failed to create runtime directory {path:?}"))]
    CreateRuntimeDirectory { source: io::Error, path: PathBuf },

    #[snafu(display("failed to run the pre-upgrade hook"))]
    PreUpgrade { source: command::Error },

    #[snafu(display("failed to load the service account"))]
    LoadServiceAccount { source: client::Error },

    #[snafu(display("failed to fetch the services"))]
    FetchServices { source: client::Error },

    #[snafu(display("failed to write the config files"))]
    WriteConfigFiles { source: config_files::Error },

    #[snafu(display("failed to parse the services"))]
    ParseServices { source: discovery::service::Error },

    #[snafu(display("invalid external access setup"))]
    ExternalAccess { source: access::Error },
}

/// Collaborators shared by the stages.
pub struct Prelaunch<'a> {
    pub arguments: &'a PrelaunchArguments,
    pub store: &'a dyn EnvStore,
    pub runner: &'a dyn CommandRunner,
}

impl Prelaunch<'_> {
    /// Runs all stages in order, stopping at the first fatal failure.
    pub async fn run(&self) -> Result<()> {
        let layout = self.arguments.paths.rvr_layout();

        let transition = prepare_rvr(&layout, &self.arguments.install_version)?;
        if transition.is_rollback() {
            rollback::prepare_rollback(
                self.runner,
                &self.arguments.hooks.rollback_argv(),
                self.store,
            )
            .context(PrepareRollbackSnafu)?;
        }

        clear_upgrade_rollback_flag(self.store);
        check_for_import(self.runner, self.arguments.hooks.import_checker_argv().as_deref());
        pre_upgrade(
            &layout,
            self.runner,
            self.arguments.hooks.pre_upgrade_argv().as_deref(),
        )?;

        self.discover_services().await
    }

    async fn discover_services(&self) -> Result<()> {
        let kubernetes = &self.arguments.kubernetes;
        let account =
            ServiceAccount::load(&kubernetes.service_account_dir).context(LoadServiceAccountSnafu)?;
        let service_list = discovery::fetch_services(
            &kubernetes.api_server,
            &account,
            kubernetes.verify_api_server_tls,
        )
        .await
        .context(FetchServicesSnafu)?;

        provision(
            &service_list,
            &ConfigDirectory::new(&self.arguments.paths.config_dir),
            self.arguments.external_address.as_deref(),
            self.store,
        )
        .map(|_| ())
    }
}

/// Points the RVR at the installed release.
pub fn prepare_rvr(layout: &RvrLayout, install_version: &str) -> Result<RvrTransition> {
    let transition = rvr::prepare_rvr(layout, install_version).context(PrepareRvrSnafu)?;
    tracing::info!(?transition, %install_version, "RVR prepared");
    Ok(transition)
}

/// Removes the flag of an interrupted upgrade rollback. Failures are logged.
pub fn clear_upgrade_rollback_flag(store: &dyn EnvStore) {
    match store.remove(UPGRADE_ROLLBACK_KEY) {
        Ok(true) => tracing::info!(key = UPGRADE_ROLLBACK_KEY, "Cleared upgrade rollback flag"),
        Ok(false) => {}
        Err(error) => log_stage_failure("env cleanup", error),
    }
}

/// Runs the import checker if one is configured. Failures are logged.
pub fn check_for_import(runner: &dyn CommandRunner, import_checker: Option<&[String]>) {
    let Some(argv) = import_checker else {
        tracing::debug!("No import checker configured");
        return;
    };

    if let Err(error) = command::run_checked(runner, argv) {
        log_stage_failure("import checker", error);
    }
}

/// Creates the directories the runtime expects and runs the pre-upgrade hook
/// if one is configured.
pub fn pre_upgrade(
    layout: &RvrLayout,
    runner: &dyn CommandRunner,
    hook: Option<&[String]>,
) -> Result<()> {
    let rvr_path = layout.rvr_path();
    for directory in REQUIRED_RVR_DIRECTORIES {
        let path = rvr_path.join(directory);
        fs::create_dir_all(&path).context(CreateRuntimeDirectorySnafu { path })?;
    }

    if let Some(argv) = hook {
        command::run_checked(runner, argv).context(PreUpgradeSnafu)?;
    }

    Ok(())
}

/// Turns a raw services list into config files and a committed external
/// address.
///
/// The raw list is dumped before it is parsed so a malformed one can be
/// inspected afterwards.
pub fn provision(
    service_list: &str,
    config: &ConfigDirectory,
    override_address: Option<&str>,
    store: &dyn EnvStore,
) -> Result<(ExternalAccess, ResolvedAddress)> {
    config
        .write_discovery_dump(service_list)
        .context(WriteConfigFilesSnafu)?;

    let registry = ServiceRegistry::from_json(service_list).context(ParseServicesSnafu)?;
    let access = access::validate_external_access(&registry, override_address, store)
        .context(ExternalAccessSnafu)?;
    let resolved =
        access::resolve_external_address(&access, store).context(ExternalAccessSnafu)?;

    config
        .write_service_files(&registry, &access)
        .context(WriteConfigFilesSnafu)?;

    Ok((access, resolved))
}

fn log_stage_failure<E>(stage: &str, error: E)
where
    E: std::error::Error + 'static,
{
    tracing::error!(
        stage,
        error = %Report::from_error(error),
        "Prelaunch stage failed, continuing"
    );
}
