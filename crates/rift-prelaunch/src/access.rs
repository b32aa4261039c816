//! External access to the launchpad.
//!
//! All traffic from outside the cluster enters through the ingress proxy. It
//! is reachable either via its load balancer IP or, for `NodePort` setups, via
//! an externally configured address.

use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::{
    discovery::{KnownService, ServiceRegistry, ServiceType},
    env_store::{self, EnvStore},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Environment store key, and environment variable, carrying the externally
/// visible address of the launchpad.
pub const EXTERNAL_ADDRESS_KEY: &str = "RIFT_EXTERNAL_ADDRESS";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("service type of the HAProxy ingress not found"))]
    IngressNotFound,

    #[snafu(display(
        "external address not set for proxy {service_type} configuration, set {EXTERNAL_ADDRESS_KEY}"
    ))]
    MissingExternalAddress { service_type: ServiceType },

    #[snafu(display("no external address configured"))]
    NoExternalAddress,

    #[snafu(display("failed to access the environment store"))]
    EnvStore { source: env_store::Error },
}

/// Where the launchpad is reachable from outside the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalAccess {
    /// A DNS name or address configured by the operator.
    pub address: Option<String>,

    /// The load balancer IP of the ingress.
    pub ip: Option<String>,
}

impl ExternalAccess {
    /// The address if configured, the load balancer IP otherwise.
    pub fn preferred(&self) -> Option<&str> {
        self.address.as_deref().or(self.ip.as_deref())
    }
}

/// The value committed to the environment store by
/// [`resolve_external_address`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedAddress {
    /// The store already carried an address and was left untouched.
    AlreadySet(String),
    Address(String),
    Ip(String),
}

/// Checks that the ingress is the single entry point and derives how it is
/// reached.
///
/// `override_address` is the externally configured address, an address
/// already present in `store` takes precedence over it.
pub fn validate_external_access(
    registry: &ServiceRegistry,
    override_address: Option<&str>,
    store: &dyn EnvStore,
) -> Result<ExternalAccess> {
    tracing::info!("Validating external access config");

    let ingress = registry.ingress();
    let service_type = ingress.service_type.context(IngressNotFoundSnafu)?;
    let override_address = override_address
        .filter(|address| !address.is_empty())
        .map(str::to_owned);

    let mut access = if service_type == ServiceType::LoadBalancer {
        ExternalAccess {
            address: override_address,
            ip: ingress.external_ip.clone(),
        }
    } else {
        ensure!(
            override_address.is_some(),
            MissingExternalAddressSnafu { service_type }
        );
        ExternalAccess {
            address: override_address,
            ip: None,
        }
    };

    if let Some(stored) = store.get(EXTERNAL_ADDRESS_KEY).context(EnvStoreSnafu)? {
        access.address = Some(stored);
    }

    for (known, record) in registry.discovered() {
        if known != KnownService::INGRESS && record.service_type == Some(ServiceType::LoadBalancer)
        {
            tracing::error!(
                service = %known,
                "Found service in LoadBalancer mode even with proxy setup"
            );
        }
    }

    Ok(access)
}

/// Commits the external address to the environment store unless one is
/// already present.
pub fn resolve_external_address(
    access: &ExternalAccess,
    store: &dyn EnvStore,
) -> Result<ResolvedAddress> {
    if let Some(existing) = store.get(EXTERNAL_ADDRESS_KEY).context(EnvStoreSnafu)? {
        tracing::info!(address = %existing, "External address already set, keeping it");
        return Ok(ResolvedAddress::AlreadySet(existing));
    }

    let (value, resolved) = match (&access.address, &access.ip) {
        (Some(address), _) => (address, ResolvedAddress::Address(address.clone())),
        (None, Some(ip)) => (ip, ResolvedAddress::Ip(ip.clone())),
        (None, None) => return NoExternalAddressSnafu.fail(),
    };

    store
        .set(EXTERNAL_ADDRESS_KEY, value)
        .context(EnvStoreSnafu)?;
    tracing::info!(address = %value, "External address set");

    Ok(resolved)
}
